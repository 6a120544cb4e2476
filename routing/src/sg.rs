// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Security groups

use acl::{Acl, SgId};
use std::sync::Arc;
use uuid::Uuid;

/// A security group: a pair of ACLs applied to the interfaces that carry it.
/// Directions are relative to the VM: ingress is traffic towards the VM.
#[derive(Debug, Clone)]
pub struct SecurityGroup {
    pub id: SgId,
    pub uuid: Uuid,
    pub name: String,
    pub ingress_acl: Option<Arc<Acl>>,
    pub egress_acl: Option<Arc<Acl>>,
}

impl SecurityGroup {
    #[must_use]
    pub fn new(id: SgId, name: &str) -> Self {
        Self {
            id,
            uuid: Uuid::from_u128(u128::from(id)),
            name: name.to_owned(),
            ingress_acl: None,
            egress_acl: None,
        }
    }

    #[must_use]
    pub fn with_ingress(mut self, acl: Arc<Acl>) -> Self {
        self.ingress_acl = Some(acl);
        self
    }

    #[must_use]
    pub fn with_egress(mut self, acl: Arc<Acl>) -> Self {
        self.egress_acl = Some(acl);
        self
    }

    /// Whether this group carries any rule at all. A group with rules in one
    /// direction only still counts, so the other direction becomes implicit deny.
    #[must_use]
    pub fn is_acl_set(&self) -> bool {
        self.ingress_acl.is_some() || self.egress_acl.is_some()
    }

    /// The ACL for a flow direction. Flow direction is relative to the vrouter,
    /// so a flow ingressing the vrouter is egressing the VM.
    #[must_use]
    pub fn acl_for_flow(&self, flow_ingress: bool) -> Option<&Arc<Acl>> {
        if flow_ingress {
            self.egress_acl.as_ref()
        } else {
            self.ingress_acl.as_ref()
        }
    }
}
