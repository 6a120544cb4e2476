// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Policy evaluation of a single flow and the merge of its results

use crate::config::EngineConfig;
use crate::header::{out_packet_header, packet_header};
use crate::session::{SessionOutcome, reflect_session, session_match};
use acl::{FlowCategory, FlowPolicyInfo, HbsSide, MatchAclContext, TrafficAction, match_acl};
use flow_entry::{DropReason, FlowEntry, FlowFlags, MatchPolicy, SessionPolicy, ShortReason};
use routing::{OperDb, VirtualNetwork, VmInterface};

#[allow(unused)]
use tracing::{debug, trace, warn};

/// Read-only inputs of a policy evaluation
#[derive(Clone, Copy)]
pub struct PolicyContext<'a> {
    pub db: &'a OperDb,
    pub config: &'a EngineConfig,
}

impl<'a> PolicyContext<'a> {
    #[must_use]
    pub fn new(db: &'a OperDb, config: &'a EngineConfig) -> Self {
        Self { db, config }
    }

    pub(crate) fn vm_port(&self, flow: &FlowEntry) -> Option<&'a VmInterface> {
        flow.data
            .intf
            .and_then(|i| self.db.interface(i))
            .and_then(|i| i.as_vm())
    }

    pub(crate) fn vn(&self, flow: &FlowEntry) -> Option<&'a VirtualNetwork> {
        flow.data.vn.and_then(|vn| self.db.vn(&vn)).map(|vn| &**vn)
    }

    fn acl_context(&self, flow: &FlowEntry) -> MatchAclContext<'a> {
        let category = if flow.is_set(FlowFlags::LINKLOCAL) {
            FlowCategory::LinkLocal
        } else if flow.is_set(FlowFlags::MULTICAST) {
            FlowCategory::Multicast
        } else if flow.is_set(FlowFlags::BGP_ROUTER_SERVICE) {
            FlowCategory::BgpRouterService
        } else {
            FlowCategory::Plain
        };
        let gateways = match self.vm_port(flow) {
            Some(vmi) if self.config.auto_allow_gw => vmi.gateways.as_slice(),
            _ => &[],
        };
        MatchAclContext { category, gateways }
    }
}

fn session_drop_reason(sp: &SessionPolicy, reasons: [DropReason; 4]) -> Option<DropReason> {
    [sp.action, sp.out_action, sp.reverse_action, sp.reverse_out_action]
        .into_iter()
        .zip(reasons)
        .find(|(action, _)| action.should_drop())
        .map(|(_, reason)| reason)
}

/// The single drop reason of a denied flow, by fixed priority
fn drop_reason(flow: &FlowEntry, ignore_acl: bool) -> DropReason {
    if let Some(reason) = flow.short_reason.filter(|_| flow.is_short()) {
        return DropReason::Short(reason);
    }
    let mp = &flow.data.match_p;
    if !ignore_acl {
        if mp.policy_action.should_drop() {
            return DropReason::Policy;
        }
        if mp.out_policy_action.should_drop() {
            return DropReason::OutPolicy;
        }
    }
    session_drop_reason(
        &mp.sg_policy,
        [
            DropReason::Sg,
            DropReason::OutSg,
            DropReason::ReverseSg,
            DropReason::ReverseOutSg,
        ],
    )
    .or_else(|| {
        session_drop_reason(
            &mp.aps_policy,
            [
                DropReason::FirewallPolicy,
                DropReason::OutFirewallPolicy,
                DropReason::ReverseFirewallPolicy,
                DropReason::ReverseOutFirewallPolicy,
            ],
        )
    })
    .or_else(|| {
        session_drop_reason(
            &mp.fwaas_policy,
            [
                DropReason::Fwaas,
                DropReason::OutFwaas,
                DropReason::ReverseFwaas,
                DropReason::ReverseOutFwaas,
            ],
        )
    })
    .unwrap_or(DropReason::Unknown)
}

//////////////////////////////////////////////////////////////////
/// Merge the per-source actions of `flow` into its final action and pick
/// the drop reason. Returns true if the final action changed.
//////////////////////////////////////////////////////////////////
pub fn action_recompute(flow: &mut FlowEntry) -> bool {
    let mp = &flow.data.match_p;
    let mut action = mp.policy_action
        | mp.out_policy_action
        | mp.sg_policy.action_summary
        | mp.mirror_action
        | mp.out_mirror_action
        | mp.aps_policy.action_summary
        | mp.fwaas_policy.action_summary;

    // only the vrf-assign rules may translate
    action.remove(TrafficAction::VRF_TRANSLATE);
    action |= mp.vrf_assign_acl_action;

    let ignore_acl = mp.action_info.vrf_translate.ignore_acl;
    if ignore_acl {
        action = mp.vrf_assign_acl_action
            | mp.sg_policy.action_summary
            | mp.mirror_action
            | mp.out_mirror_action;
        if (mp.policy_action | mp.out_policy_action).contains(TrafficAction::MIRROR) {
            action |= TrafficAction::MIRROR;
        }
    }

    if flow.is_short() {
        action |= TrafficAction::DENY;
    }

    let reason = if action.should_drop() {
        action.remove(TrafficAction::DENY | TrafficAction::PASS);
        action.insert(TrafficAction::DENY);
        Some(drop_reason(flow, ignore_acl))
    } else {
        None
    };

    if action.contains(TrafficAction::TRAP) || flow.is_set(FlowFlags::TRAPPED) {
        action = TrafficAction::TRAP;
    }

    let changed = action != flow.data.match_p.action_info.action || reason != flow.drop_reason;
    if changed {
        debug!(
            "Flow {} action {} -> {action}{}",
            flow.key(),
            flow.data.match_p.action_info.action,
            reason.map(|r| format!(" ({r})")).unwrap_or_default()
        );
    }
    flow.data.match_p.action_info.action = action;
    flow.drop_reason = reason;
    changed
}

//////////////////////////////////////////////////////////////////
/// Make a reverse flow carry the reflexive verdicts of its forward flow
//////////////////////////////////////////////////////////////////
pub fn update_reflexive_action(mp: &mut MatchPolicy, fwd: Option<&FlowEntry>) {
    let Some(fwd) = fwd else {
        return;
    };
    let theirs = &fwd.data.match_p;
    reflect_session(&mut mp.sg_policy, &theirs.sg_policy);
    reflect_session(&mut mp.aps_policy, &theirs.aps_policy);
    reflect_session(&mut mp.fwaas_policy, &theirs.fwaas_policy);
}

/// A mirror coming from the flow's own lists mirrors in its network's vrf,
/// one coming from the out lists in the network of the paired flow
fn set_mirror_vrf(pctx: &PolicyContext<'_>, flow: &mut FlowEntry, rflow: Option<&FlowEntry>) {
    let mp = &flow.data.match_p;
    let own = (mp.mirror_action | mp.policy_action).contains(TrafficAction::MIRROR);
    let out = (mp.out_mirror_action | mp.out_policy_action).contains(TrafficAction::MIRROR);
    let mut mirror_vrf = None;
    if own {
        mirror_vrf = pctx.vn(flow).and_then(|vn| vn.vrf);
    }
    if out {
        if let Some(vrf) = rflow.and_then(|r| pctx.vn(r)).and_then(|vn| vn.vrf) {
            mirror_vrf = Some(vrf);
        }
    }
    flow.data.mirror_vrf = mirror_vrf;
}

/// Record the translation decided by the vrf-assign rules. A target that
/// changes once the flow was evaluated, or one that does not resolve, makes
/// the flow short.
fn set_vrf_assign_entry(
    pctx: &PolicyContext<'_>,
    flow: &mut FlowEntry,
    previous: &str,
    was_evaluated: bool,
) -> Option<ShortReason> {
    let name = flow.data.match_p.action_info.vrf_translate.vrf_name.clone();
    let mut short = None;
    if name.is_empty() {
        flow.data.acl_assigned_vrf = None;
        if was_evaluated && !previous.is_empty() {
            short = Some(ShortReason::VrfChange);
        }
    } else if was_evaluated && previous != name {
        short = Some(ShortReason::VrfChange);
    } else {
        match pctx.db.vrf_by_name(&name) {
            Some(vrf) => flow.data.acl_assigned_vrf = Some(vrf.id),
            None => {
                warn!("Flow {}: vrf-assign target {name} is unknown", flow.key());
                flow.data.acl_assigned_vrf = None;
                short = Some(ShortReason::VrfChange);
            }
        }
    }
    flow.data.vrf_assign_evaluated = true;
    if let Some(reason) = short {
        flow.set_short(reason);
    }
    short
}

fn set_vn_match(flow: &mut FlowEntry, info: &FlowPolicyInfo) {
    let data = &mut flow.data;
    data.source_vn_match = if info.src_match_vn.is_empty() {
        data.source_vn_list.first().cloned().unwrap_or_default()
    } else {
        info.src_match_vn.clone()
    };
    data.dest_vn_match = if info.dst_match_vn.is_empty() {
        data.dest_vn_list.first().cloned().unwrap_or_default()
    } else {
        info.dst_match_vn.clone()
    };
}

fn evaluate(
    pctx: &PolicyContext<'_>,
    flow: &FlowEntry,
    rflow: Option<&FlowEntry>,
    mp: &mut MatchPolicy,
    nw_info: &mut FlowPolicyInfo,
) -> (SessionOutcome, Option<acl::QosConfigIdx>) {
    let ctx = pctx.acl_context(flow);
    let hdr = packet_header(flow);
    let out_hdr = rflow.map(out_packet_header);
    let mut sessions = SessionOutcome::default();

    let vrf_assign = match_acl(&ctx, &hdr, &mut mp.m_vrf_assign_acl_l, false, true, None);
    mp.vrf_assign_acl_action = vrf_assign.action;
    if vrf_assign.action.contains(TrafficAction::VRF_TRANSLATE) {
        mp.action_info.vrf_translate = vrf_assign.vrf_translate;
    }

    // mirroring holds even for flows that end up dropped
    let mirror = match_acl(&ctx, &hdr, &mut mp.m_mirror_acl_l, false, true, None);
    mp.mirror_action = mirror.action;
    mp.action_info.mirror_l.extend(mirror.mirror_l);
    if let Some(out_hdr) = &out_hdr {
        let mirror = match_acl(&ctx, out_hdr, &mut mp.m_out_mirror_acl_l, false, true, None);
        mp.out_mirror_action = mirror.action;
        mp.action_info.mirror_l.extend(mirror.mirror_l);
    }

    let policy = match_acl(&ctx, &hdr, &mut mp.m_acl_l, true, true, Some(nw_info));
    mp.policy_action = policy.action;
    let acl_qos = policy.qos_config;
    mp.action_info.mirror_l.extend(policy.mirror_l);
    if mp.policy_action.should_drop() {
        return (sessions, acl_qos);
    }

    if let Some(out_hdr) = &out_hdr {
        let out = match_acl(&ctx, out_hdr, &mut mp.m_out_acl_l, true, true, Some(nw_info));
        mp.out_policy_action = out.action;
        mp.action_info.mirror_l.extend(out.mirror_l);
        if mp.out_policy_action.should_drop() {
            return (sessions, acl_qos);
        }
    }

    if flow.is_reverse() {
        update_reflexive_action(mp, rflow);
        return (sessions, acl_qos);
    }

    let tcp_ack = flow.is_set(FlowFlags::TCP_ACK);
    let sg = session_match(&ctx, flow, rflow, &mut mp.sg_policy, tcp_ack);
    sessions.trap |= sg.trap;
    sessions.mirror_l.extend(sg.mirror_l);
    sessions.qos_config = sg.qos_config;
    if mp.sg_policy.action_summary.should_drop() {
        return (sessions, acl_qos);
    }

    let fwaas = session_match(&ctx, flow, rflow, &mut mp.fwaas_policy, tcp_ack);
    sessions.trap |= fwaas.trap;
    sessions.mirror_l.extend(fwaas.mirror_l);
    if mp.fwaas_policy.action_summary.should_drop() {
        return (sessions, acl_qos);
    }

    let aps = session_match(&ctx, flow, rflow, &mut mp.aps_policy, tcp_ack);
    sessions.trap |= aps.trap;
    sessions.mirror_l.extend(aps.mirror_l);
    (sessions, acl_qos)
}

//////////////////////////////////////////////////////////////////
/// Evaluate every rule list of `flow` and set its final action.
///
/// Rule lists must have been gathered beforehand. Evaluation stops at the
/// first denying source; mirroring, vrf assignment and the merge are done in
/// all cases. Returns the reason the flow became short, if it did, so that the
/// caller can make the paired flow short too.
//////////////////////////////////////////////////////////////////
pub fn do_policy(
    pctx: &PolicyContext<'_>,
    flow: &mut FlowEntry,
    rflow: Option<&FlowEntry>,
) -> Option<ShortReason> {
    let previous_vrf = flow.data.match_p.action_info.vrf_translate.vrf_name.clone();
    let was_evaluated = flow.data.vrf_assign_evaluated;
    let previous_action = flow.data.match_p.action_info.action;

    let mut mp = std::mem::take(&mut flow.data.match_p);
    mp.reset_actions();
    // kept until action_recompute replaces it
    mp.action_info.action = previous_action;

    let mut nw_info = FlowPolicyInfo::new();
    let (sessions, acl_qos) = evaluate(pctx, flow, rflow, &mut mp, &mut nw_info);
    mp.action_info.mirror_l.extend(sessions.mirror_l);
    flow.data.match_p = mp;

    // the session trap holds only as long as this evaluation asks for it
    flow.reset_flags(FlowFlags::TRAP);
    if sessions.trap {
        flow.set_flags(FlowFlags::TRAP);
    }
    flow.data.hbs = if mp_has_hbs(&flow.data.match_p) {
        pctx.vm_port(flow).and_then(|vmi| vmi.hbs_side)
    } else {
        None
    };
    flow.reset_flags(FlowFlags::HBS);
    match flow.data.hbs {
        Some(HbsSide::Left) => flow.set_flags(FlowFlags::HBS_LEFT),
        Some(HbsSide::Right) => flow.set_flags(FlowFlags::HBS_RIGHT),
        None => {}
    }

    flow.nw_ace_uuid = nw_info.uuid;
    set_vn_match(flow, &nw_info);
    set_mirror_vrf(pctx, flow, rflow);
    let short = set_vrf_assign_entry(pctx, flow, &previous_vrf, was_evaluated);

    let qos = sessions
        .qos_config
        .or_else(|| pctx.vm_port(flow).and_then(|vmi| vmi.qos_config))
        .or(acl_qos)
        .or_else(|| pctx.vn(flow).and_then(|vn| vn.qos_config));
    flow.data.qos_config = qos;
    flow.data.match_p.action_info.qos_config = qos;

    action_recompute(flow);
    short
}

fn mp_has_hbs(mp: &MatchPolicy) -> bool {
    mp.aps_policy.action_summary.contains(TrafficAction::HBS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use acl::{Acl, AclEntry, AclMatch, FlowAction, MatchAclParams, PolicyState};
    use etherparse::IpNumber;
    use flow_entry::FlowKey;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tracing_test::traced_test;
    use uuid::Uuid;

    fn acl(entries: Vec<AclEntry>) -> MatchAclParams {
        MatchAclParams::new(Arc::new(Acl::new(Uuid::new_v4(), "acl", entries).unwrap()))
    }

    fn flow() -> FlowEntry {
        let key = FlowKey::new(
            1,
            IpNumber::TCP,
            "10.0.0.5".parse().unwrap(),
            "10.0.0.9".parse().unwrap(),
            1234,
            80,
        );
        FlowEntry::new(key, FlowFlags::INGRESS_DIR)
    }

    #[traced_test]
    #[test]
    fn test_network_deny_stops_evaluation() {
        let db = OperDb::new();
        let config = EngineConfig::default();
        let pctx = PolicyContext::new(&db, &config);
        let mut flow = flow();
        let deny = AclEntry::new(1, AclMatch::default(), FlowAction::new(TrafficAction::DENY));
        flow.data.match_p.m_acl_l.push(acl(vec![deny]));
        flow.data.match_p.sg_policy.acl_l.push(acl(vec![]));
        flow.data.match_p.sg_policy.rule_present = true;

        assert_eq!(do_policy(&pctx, &mut flow, None), None);
        assert_eq!(flow.data.match_p.action_info.action, TrafficAction::DENY);
        assert_eq!(flow.drop_reason, Some(DropReason::Policy));
        // never reached
        assert!(flow.data.match_p.sg_policy.action.is_empty());
        assert_ne!(flow.nw_ace_uuid, PolicyState::NotEvaluated.uuid());
    }

    #[test]
    fn test_short_flow_denied_with_its_reason() {
        let db = OperDb::new();
        let config = EngineConfig::default();
        let pctx = PolicyContext::new(&db, &config);
        let mut flow = flow();
        flow.set_short(ShortReason::NoSrcRoute);
        do_policy(&pctx, &mut flow, None);
        assert_eq!(flow.data.match_p.action_info.action, TrafficAction::DENY);
        assert_eq!(flow.drop_reason, Some(DropReason::Short(ShortReason::NoSrcRoute)));
    }

    #[test]
    fn test_recompute_reports_changes() {
        let mut flow = flow();
        flow.data.match_p.policy_action = TrafficAction::PASS;
        assert!(action_recompute(&mut flow));
        assert!(!action_recompute(&mut flow));
        assert_eq!(flow.data.match_p.action_info.action, TrafficAction::PASS);

        flow.data.match_p.sg_policy.out_action = TrafficAction::DENY;
        flow.data.match_p.sg_policy.action_summary = TrafficAction::DENY;
        assert!(action_recompute(&mut flow));
        assert_eq!(flow.data.match_p.action_info.action, TrafficAction::DENY);
        assert_eq!(flow.drop_reason, Some(DropReason::OutSg));
    }

    #[test]
    fn test_drop_reason_priority() {
        let mut flow = flow();
        let mp = &mut flow.data.match_p;
        mp.fwaas_policy.action = TrafficAction::DENY;
        mp.fwaas_policy.action_summary = TrafficAction::DENY;
        mp.aps_policy.reverse_out_action = TrafficAction::DENY;
        mp.aps_policy.action_summary = TrafficAction::DENY;
        action_recompute(&mut flow);
        assert_eq!(flow.drop_reason, Some(DropReason::ReverseOutFirewallPolicy));
    }

    #[test]
    fn test_trap_flag_overrides_action() {
        let mut flow = flow();
        flow.data.match_p.sg_policy.action = TrafficAction::DENY;
        flow.data.match_p.sg_policy.action_summary = TrafficAction::DENY;
        flow.set_flags(FlowFlags::TRAP);
        action_recompute(&mut flow);
        assert_eq!(flow.data.match_p.action_info.action, TrafficAction::TRAP);
        assert_eq!(flow.drop_reason, Some(DropReason::Sg));
    }

    #[test]
    fn test_ignore_acl_discards_network_verdict() {
        let mut flow = flow();
        let mp = &mut flow.data.match_p;
        mp.policy_action = TrafficAction::DENY;
        mp.vrf_assign_acl_action = TrafficAction::PASS | TrafficAction::VRF_TRANSLATE;
        mp.action_info.vrf_translate.vrf_name = "svc-vrf".into();
        mp.action_info.vrf_translate.ignore_acl = true;
        action_recompute(&mut flow);
        assert_eq!(
            flow.data.match_p.action_info.action,
            TrafficAction::PASS | TrafficAction::VRF_TRANSLATE
        );
        assert_eq!(flow.drop_reason, None);
    }
}
