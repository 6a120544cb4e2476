// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Virtual networks

use acl::{Acl, QosConfigIdx, VrfId};
use std::sync::Arc;
use uuid::Uuid;

pub type VnId = Uuid;

#[derive(Debug, Clone)]
pub struct VirtualNetwork {
    pub id: VnId,
    pub name: String,
    pub vrf: Option<VrfId>,
    pub acl: Option<Arc<Acl>>,
    pub mirror_acl: Option<Arc<Acl>>,
    pub mirror_cfg_acl: Option<Arc<Acl>>,
    /// Firewall-as-a-service policies attached to the network
    pub fwaas_acls: Vec<Arc<Acl>>,
    pub enable_rpf: bool,
    pub flood_unknown_unicast: bool,
    pub vxlan_id: u32,
    pub qos_config: Option<QosConfigIdx>,
}

impl VirtualNetwork {
    #[must_use]
    pub fn new(id: VnId, name: &str) -> Self {
        Self {
            id,
            name: name.to_owned(),
            vrf: None,
            acl: None,
            mirror_acl: None,
            mirror_cfg_acl: None,
            fwaas_acls: Vec::new(),
            enable_rpf: true,
            flood_unknown_unicast: false,
            vxlan_id: 0,
            qos_config: None,
        }
    }

    #[must_use]
    pub fn with_vrf(mut self, vrf: VrfId) -> Self {
        self.vrf = Some(vrf);
        self
    }

    #[must_use]
    pub fn with_acl(mut self, acl: Arc<Acl>) -> Self {
        self.acl = Some(acl);
        self
    }

    #[must_use]
    pub fn with_mirror_acl(mut self, acl: Arc<Acl>) -> Self {
        self.mirror_acl = Some(acl);
        self
    }

    #[must_use]
    pub fn with_fwaas(mut self, acl: Arc<Acl>) -> Self {
        self.fwaas_acls.push(acl);
        self
    }

    #[must_use]
    pub fn with_rpf(mut self, enable: bool) -> Self {
        self.enable_rpf = enable;
        self
    }

    #[must_use]
    pub fn with_qos(mut self, qos: QosConfigIdx) -> Self {
        self.qos_config = Some(qos);
        self
    }

    /// ACLs the flows of this network depend on
    pub fn acl_ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.acl
            .iter()
            .chain(self.mirror_acl.iter())
            .chain(self.mirror_cfg_acl.iter())
            .chain(self.fwaas_acls.iter())
            .map(|a| a.id)
    }
}
