// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Reflexive evaluation of security groups, application policy sets and FWaaS

use crate::header::{out_packet_header, packet_header};
use acl::{
    FlowAction, FlowPolicyInfo, MatchAclContext, MirrorAction, QosConfigIdx, TrafficAction,
    match_acl,
};
use flow_entry::{FlowEntry, SessionPolicy};

#[allow(unused)]
use tracing::{debug, trace};

/// Side results of a session evaluation that do not live in the [`SessionPolicy`]
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SessionOutcome {
    /// The session denies but its reverse direction would pass
    pub trap: bool,
    pub mirror_l: Vec<MirrorAction>,
    pub qos_config: Option<QosConfigIdx>,
}

impl SessionOutcome {
    fn merge(&mut self, result: FlowAction) {
        self.mirror_l.extend(result.mirror_l);
        if self.qos_config.is_none() {
            self.qos_config = result.qos_config;
        }
    }
}

//////////////////////////////////////////////////////////////////
/// Evaluate one reflexive rule source for `flow`.
///
/// The forward lists are matched first. The reverse lists are only matched
/// when the forward direction denies or the flow carries a TCP ACK: the reverse
/// verdict then tells whether the session was opened from the other side.
/// A plain flow is denied if any evaluated direction denies. An ACK passes
/// if either direction passes as a whole.
//////////////////////////////////////////////////////////////////
pub fn session_match(
    ctx: &MatchAclContext<'_>,
    flow: &FlowEntry,
    rflow: Option<&FlowEntry>,
    sp: &mut SessionPolicy,
    tcp_ack: bool,
) -> SessionOutcome {
    let mut outcome = SessionOutcome::default();
    let mut info = FlowPolicyInfo::new();
    let mut rinfo = FlowPolicyInfo::new();

    let hdr = packet_header(flow);
    let result = match_acl(ctx, &hdr, &mut sp.acl_l, true, !sp.rule_present, Some(&mut info));
    sp.action = result.action;
    outcome.merge(result);

    if let Some(rflow) = rflow {
        if !sp.action.should_drop() {
            let out_hdr = out_packet_header(rflow);
            let result = match_acl(
                ctx,
                &out_hdr,
                &mut sp.out_acl_l,
                true,
                !sp.out_rule_present,
                Some(&mut info),
            );
            sp.out_action = result.action;
            outcome.merge(result);
        }

        let forward = sp.action | sp.out_action;
        if forward.should_drop() || tcp_ack {
            let rhdr = packet_header(rflow);
            sp.reverse_action = match_acl(
                ctx,
                &rhdr,
                &mut sp.reverse_acl_l,
                true,
                !sp.reverse_rule_present,
                Some(&mut rinfo),
            )
            .action;
            if !sp.reverse_action.should_drop() {
                let rout_hdr = out_packet_header(flow);
                sp.reverse_out_action = match_acl(
                    ctx,
                    &rout_hdr,
                    &mut sp.reverse_out_acl_l,
                    true,
                    !sp.reverse_out_rule_present,
                    Some(&mut rinfo),
                )
                .action;
            }
        }
    }

    let forward = sp.action | sp.out_action;
    let reverse = sp.reverse_action | sp.reverse_out_action;
    let decided_by_reverse = tcp_ack && forward.should_drop() && reverse.is_pass();
    sp.action_summary = if !tcp_ack {
        forward | reverse
    } else if decided_by_reverse {
        reverse
    } else {
        forward
    };

    let decider = if decided_by_reverse { &rinfo } else { &info };
    sp.rule_uuid = decider.uuid;
    sp.acl_name.clone_from(&decider.acl_name);

    outcome.trap =
        sp.action_summary.should_drop() && sp.reverse_any_rule_present() && reverse.is_pass();
    trace!(
        "session {}: fwd {forward} rev {reverse} -> {} trap:{}",
        flow.key(),
        sp.action_summary,
        outcome.trap
    );
    outcome
}

//////////////////////////////////////////////////////////////////
/// Take over the verdict the forward flow computed for the session.
/// Reverse flows never evaluate reflexive rules themselves.
//////////////////////////////////////////////////////////////////
pub fn reflect_session(own: &mut SessionPolicy, fwd: &SessionPolicy) {
    own.action = TrafficAction::PASS;
    own.out_action = TrafficAction::PASS;
    own.reverse_action = TrafficAction::PASS;
    own.reverse_out_action = TrafficAction::PASS;
    own.action_summary = fwd.action_summary;
    own.rule_uuid = fwd.rule_uuid;
    own.acl_name.clone_from(&fwd.acl_name);
    if own.action_summary.should_drop() {
        // packets of a denied session are punted so the pair is re-evaluated
        own.action.remove(TrafficAction::DROP_FLAGS);
        own.action.insert(TrafficAction::TRAP);
    }
}
