// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Requests handled by flow partitions

use acl::{AclId, VrfId};
use flow_entry::{FlowKey, PendingAction};
use flow_policy::{PacketInfo, PairDecision};
use routing::{IfIndex, NextHopId, VnId};
use std::fmt::Display;
use tokio::sync::oneshot;

use crate::errors::FlowMgmtError;

/// Notification that an object flows may depend on changed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DbChange {
    Vn(VnId),
    Acl(AclId),
    Interface(IfIndex),
    InterfaceDeleted(IfIndex),
    /// Routes of a vrf changed
    Vrf(VrfId),
    VrfDeleted(VrfId),
    NextHop(NextHopId),
}

impl DbChange {
    /// The work a change requires from the flows depending on it
    #[must_use]
    pub fn pending_action(&self) -> PendingAction {
        match self {
            DbChange::Vn(_) | DbChange::Acl(_) | DbChange::Interface(_) => {
                PendingAction::Revaluate
            }
            DbChange::Vrf(_) | DbChange::NextHop(_) => PendingAction::RecomputeDbEntry,
            DbChange::InterfaceDeleted(_) | DbChange::VrfDeleted(_) => PendingAction::Delete,
        }
    }
}

impl Display for DbChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbChange::Vn(id) => write!(f, "vn {id}"),
            DbChange::Acl(id) => write!(f, "acl {id}"),
            DbChange::Interface(ifindex) => write!(f, "interface {ifindex}"),
            DbChange::InterfaceDeleted(ifindex) => write!(f, "interface {ifindex} deleted"),
            DbChange::Vrf(id) => write!(f, "vrf {id}"),
            DbChange::VrfDeleted(id) => write!(f, "vrf {id} deleted"),
            DbChange::NextHop(id) => write!(f, "nexthop {id}"),
        }
    }
}

/// Counters of one partition
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PartitionStats {
    pub flows: usize,
    pub created: u64,
    pub deleted: u64,
    pub evaluated: u64,
    /// Notifications absorbed by work already pending on a flow
    pub coalesced: u64,
}

#[derive(Debug)]
pub enum FlowRequest {
    /// First packet of a flow, or a packet of a flow the partition may know
    Packet(Box<PacketInfo>),
    /// A dataplane flow without agent state
    Audit(FlowKey, Option<IfIndex>),
    /// Re-evaluate from scratch
    Recompute(FlowKey),
    Delete(FlowKey),
    Change(DbChange),
    Lookup(FlowKey),
    Stats,
}

#[derive(Debug)]
pub enum FlowResponse {
    Decision(Result<PairDecision, FlowMgmtError>),
    Lookup(Option<PairDecision>),
    /// Flows whose pending action a change escalated
    Change(usize),
    Deleted(bool),
    Stats(PartitionStats),
}

pub(crate) type FlowResponseChannel = oneshot::Sender<FlowResponse>;

/// A request to a partition and the channel the answer goes back on
#[derive(Debug)]
pub struct FlowChannelRequest {
    pub(crate) request: FlowRequest,
    pub(crate) reply_tx: FlowResponseChannel,
}

impl FlowChannelRequest {
    #[must_use]
    pub fn new(request: FlowRequest) -> (Self, oneshot::Receiver<FlowResponse>) {
        let (reply_tx, reply_rx) = oneshot::channel();
        (Self { request, reply_tx }, reply_rx)
    }
}
