// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The decision record handed to dataplane programming and telemetry

use acl::{HbsSide, MirrorAction, QosConfigIdx, TrafficAction, VrfId};
use flow_entry::{DropReason, FlowEntry, FlowFlags, FlowKey, ShortReason};
use routing::NextHopId;
use std::fmt::Display;
use uuid::Uuid;

/// Rule that decided one reflexive source, for audit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleAudit {
    pub uuid: Uuid,
    pub acl_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlowDecision {
    pub key: FlowKey,
    pub action: TrafficAction,
    pub drop_reason: Option<DropReason>,
    pub short_reason: Option<ShortReason>,
    pub mirror_l: Vec<MirrorAction>,
    pub mirror_vrf: Option<VrfId>,
    /// Set only when the action translates
    pub vrf_translate: Option<VrfId>,
    pub qos_config: Option<QosConfigIdx>,
    pub rpf_nh: Option<NextHopId>,
    pub component_nh_idx: Option<usize>,
    pub hbs: Option<HbsSide>,
    pub trap: bool,
    pub nw_ace_uuid: Uuid,
    pub sg_rule: RuleAudit,
    pub aps_rule: RuleAudit,
    pub fwaas_rule: RuleAudit,
}

impl FlowDecision {
    #[must_use]
    pub fn is_drop(&self) -> bool {
        self.action.contains(TrafficAction::DENY)
    }
}

impl From<&FlowEntry> for FlowDecision {
    fn from(flow: &FlowEntry) -> Self {
        let mp = &flow.data.match_p;
        let audit = |sp: &flow_entry::SessionPolicy| RuleAudit {
            uuid: sp.rule_uuid,
            acl_name: sp.acl_name.clone(),
        };
        let action = mp.action_info.action;
        Self {
            key: *flow.key(),
            action,
            drop_reason: flow.drop_reason,
            short_reason: flow.short_reason,
            mirror_l: mp.action_info.mirror_l.clone(),
            mirror_vrf: flow.data.mirror_vrf,
            vrf_translate: flow
                .data
                .acl_assigned_vrf
                .filter(|_| action.contains(TrafficAction::VRF_TRANSLATE)),
            qos_config: flow.data.qos_config,
            rpf_nh: flow.data.rpf.rpf_nh,
            component_nh_idx: flow.data.component_nh_idx,
            hbs: flow.data.hbs,
            trap: flow.is_set(FlowFlags::TRAPPED),
            nw_ace_uuid: flow.nw_ace_uuid,
            sg_rule: audit(&mp.sg_policy),
            aps_rule: audit(&mp.aps_policy),
            fwaas_rule: audit(&mp.fwaas_policy),
        }
    }
}

impl Display for FlowDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} action:{}", self.key, self.action)?;
        if let Some(reason) = self.drop_reason {
            write!(f, " drop:'{reason}'")?;
        }
        if let Some(vrf) = self.vrf_translate {
            write!(f, " vrf-translate:{vrf}")?;
        }
        if let Some(nh) = self.rpf_nh {
            write!(f, " rpf-nh:{nh}")?;
        }
        if self.trap {
            write!(f, " trap")?;
        }
        Ok(())
    }
}

/// Decisions for both flows of a pair, forward first
#[derive(Debug, Clone, PartialEq)]
pub struct PairDecision {
    pub forward: FlowDecision,
    pub reverse: Option<FlowDecision>,
}

impl PairDecision {
    #[must_use]
    pub fn new(flow: &FlowEntry, rflow: Option<&FlowEntry>) -> Self {
        Self {
            forward: FlowDecision::from(flow),
            reverse: rflow.map(FlowDecision::from),
        }
    }
}
