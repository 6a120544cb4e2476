// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Errors of the oper db

use crate::interfaces::interface::IfIndex;
use crate::nexthop::NextHopId;
use acl::{SgId, VrfId};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, PartialEq)]
pub enum OperError {
    #[error("No virtual network with id {0}")]
    NoSuchVn(Uuid),
    #[error("No security group with id {0}")]
    NoSuchSg(SgId),
    #[error("No interface with index {0}")]
    NoSuchInterface(IfIndex),
    #[error("Interface with index {0} already exists")]
    InterfaceExists(IfIndex),
    #[error("No vrf with id {0}")]
    NoSuchVrf(VrfId),
    #[error("Vrf name '{0}' is already used by vrf {1}")]
    VrfNameInUse(String, VrfId),
    #[error("No nexthop with id {0}")]
    NoSuchNextHop(NextHopId),
    #[error("Invalid nexthop: {0}")]
    InvalidNextHop(String),
}
