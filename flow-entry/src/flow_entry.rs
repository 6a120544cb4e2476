// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The flow entry

use crate::flags::FlowFlags;
use crate::flow_key::FlowKey;
use crate::linklocal::LinkLocalBinding;
use crate::match_policy::MatchPolicy;
use crate::pending::PendingState;
use crate::reasons::{DropReason, ShortReason};
use crate::table::FlowIndex;
use acl::{HbsSide, PolicyState, QosConfigIdx, SgId, TagId, VrfId};
use routing::{IfIndex, MacAddr, NextHopId, VnId};
use std::net::IpAddr;
use uuid::Uuid;

#[allow(unused)]
use tracing::{debug, warn};

/// Reverse-path-forwarding state of a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpfState {
    /// Nexthop of the route to the source address, resolved at creation
    pub src_ip_nh: Option<NextHopId>,
    /// Nexthop incoming packets are validated against
    pub rpf_nh: Option<NextHopId>,
    /// Composite nexthop set by the ECMP resolution of the paired flow
    pub ecmp_rpf_nh: Option<NextHopId>,
    pub enable_rpf: bool,
    /// Prefix length of the route `rpf_nh` was taken from, for layer-2 flows
    pub l2_rpf_plen: u8,
}

impl Default for RpfState {
    fn default() -> Self {
        Self {
            src_ip_nh: None,
            rpf_nh: None,
            ecmp_rpf_nh: None,
            enable_rpf: true,
            l2_rpf_plen: 32,
        }
    }
}

/// Endpoint, route and policy snapshot of a flow
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlowData {
    pub vn: Option<VnId>,
    pub intf: Option<IfIndex>,
    pub vm: Option<Uuid>,

    /// Vrf of the key
    pub vrf: VrfId,
    /// Vrf the destination is looked up in
    pub dest_vrf: VrfId,
    pub flow_source_vrf: VrfId,
    pub flow_dest_vrf: VrfId,

    pub source_vn_list: Vec<String>,
    pub dest_vn_list: Vec<String>,
    pub source_vn_match: String,
    pub dest_vn_match: String,
    pub source_sg_id_l: Vec<SgId>,
    pub dest_sg_id_l: Vec<SgId>,
    pub source_tags: Vec<TagId>,
    pub dest_tags: Vec<TagId>,
    pub source_plen: u8,
    pub dest_plen: u8,

    pub smac: MacAddr,
    pub dmac: MacAddr,
    /// Compute node the remote endpoint lives on
    pub peer_vrouter: Option<IpAddr>,
    /// Destination address after translation, for NAT'd flows
    pub nat_addr: Option<(IpAddr, u16)>,

    pub rpf: RpfState,
    pub component_nh_idx: Option<usize>,

    pub acl_assigned_vrf: Option<VrfId>,
    pub vrf_assign_evaluated: bool,
    pub mirror_vrf: Option<VrfId>,
    pub qos_config: Option<QosConfigIdx>,
    pub hbs: Option<HbsSide>,

    pub match_p: MatchPolicy,
}

/// A unidirectional flow. Forward and reverse flows are paired through the
/// [`crate::FlowTable`] that owns them.
#[derive(Debug)]
pub struct FlowEntry {
    key: FlowKey,
    pub data: FlowData,
    pub flags: FlowFlags,
    pub short_reason: Option<ShortReason>,
    pub drop_reason: Option<DropReason>,
    /// Network ACL rule that decided, for audit
    pub nw_ace_uuid: Uuid,
    pub pending: PendingState,
    pub linklocal: Option<LinkLocalBinding>,
    pub(crate) reverse: Option<FlowIndex>,
}

impl FlowEntry {
    #[must_use]
    pub fn new(key: FlowKey, flags: FlowFlags) -> Self {
        let data = FlowData {
            vrf: key.vrf,
            dest_vrf: key.vrf,
            flow_source_vrf: key.vrf,
            flow_dest_vrf: key.vrf,
            ..Default::default()
        };
        Self {
            key,
            data,
            flags,
            short_reason: None,
            drop_reason: None,
            nw_ace_uuid: PolicyState::NotEvaluated.uuid(),
            pending: PendingState::default(),
            linklocal: None,
            reverse: None,
        }
    }

    #[must_use]
    pub fn key(&self) -> &FlowKey {
        &self.key
    }

    /// Index of the paired flow, unchecked. Use [`crate::FlowTable::reverse_of`]
    /// to get it validated against the table.
    #[must_use]
    pub fn reverse_index(&self) -> Option<FlowIndex> {
        self.reverse
    }

    #[must_use]
    pub fn is_set(&self, flags: FlowFlags) -> bool {
        self.flags.intersects(flags)
    }

    pub fn set_flags(&mut self, flags: FlowFlags) {
        self.flags.insert(flags);
    }

    pub fn reset_flags(&mut self, flags: FlowFlags) {
        self.flags.remove(flags);
    }

    #[must_use]
    pub fn is_short(&self) -> bool {
        self.flags.contains(FlowFlags::SHORT)
    }

    #[must_use]
    pub fn is_reverse(&self) -> bool {
        self.flags.contains(FlowFlags::REVERSE)
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        self.flags.contains(FlowFlags::LOCAL)
    }

    #[must_use]
    pub fn is_ingress(&self) -> bool {
        self.flags.contains(FlowFlags::INGRESS_DIR)
    }

    #[must_use]
    pub fn is_l3(&self) -> bool {
        !self.flags.contains(FlowFlags::L2)
    }

    /// Mark this flow short. The first reason sticks. Returns true if the flow
    /// was not short before.
    pub fn set_short(&mut self, reason: ShortReason) -> bool {
        if self.is_short() {
            return false;
        }
        debug!("Flow {} short: {reason}", self.key);
        self.flags.insert(FlowFlags::SHORT);
        self.short_reason = Some(reason);
        true
    }

    /// Hand the linklocal port of this flow over to a replacement flow
    pub fn take_linklocal(&mut self) -> Option<LinkLocalBinding> {
        self.linklocal.take()
    }

    /// Vrf the destination of this flow is forwarded in, after translation
    #[must_use]
    pub fn destination_vrf(&self) -> VrfId {
        if self.data.match_p.action_info.action.contains(acl::TrafficAction::VRF_TRANSLATE) {
            if let Some(vrf) = self.data.acl_assigned_vrf {
                return vrf;
            }
        }
        if self.is_set(FlowFlags::NAT) {
            self.data.dest_vrf
        } else {
            self.data.vrf
        }
    }
}
