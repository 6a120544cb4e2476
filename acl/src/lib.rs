// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Access control lists, traffic actions and the ordered ACL-list evaluator
//! used by the flow policy engine.

#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod acl;
mod action;
mod entry;
mod errors;
mod header;
mod matcher;

pub use acl::{Acl, AclId};
pub use action::{FlowAction, HbsSide, MirrorAction, QosConfigIdx, TrafficAction, VrfTranslateAction};
pub use entry::{AclEntry, AclMatch, AddressMatch, PortRange};
pub use errors::AclError;
pub use header::{PacketHeader, SgId, TagId, VrfId};
pub use matcher::{
    DNS_SERVER_PORT, FlowCategory, FlowPolicyInfo, MatchAclContext, MatchAclParams,
    MatchAclParamsList, PolicyState, match_acl,
};

use tracectl::trace_target;
trace_target!("acl", LevelFilter::INFO, &["flow"]);
