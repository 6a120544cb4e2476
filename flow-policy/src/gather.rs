// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Assembly of the rule lists of a flow.
//!
//! Lists are always rebuilt from scratch out of the current snapshot.
//! Security groups, application policy sets and FWaaS are reflexive: a rule is
//! stated once and applies to both directions of a session. For a flow whose
//! both endpoints live on this node, the rules of both ports are gathered so
//! that the flow is checked from each endpoint's point of view.

use acl::{Acl, MatchAclParams, MatchAclParamsList};
use flow_entry::{FlowEntry, FlowFlags, SessionPolicy};
use routing::{OperDb, VirtualNetwork, VmInterface};
use std::sync::Arc;

#[allow(unused)]
use tracing::{debug, trace};

/// Rules of one endpoint for one flow direction, and whether the endpoint
/// carries any rule of the kind at all
type RuleSource<'a> = dyn Fn(bool) -> (Vec<Arc<Acl>>, bool) + 'a;

fn push_rules(list: &mut MatchAclParamsList, (acls, present): (Vec<Arc<Acl>>, bool)) -> bool {
    list.extend(acls.into_iter().map(MatchAclParams::new));
    present
}

/// Direction-aware fill of a session policy. `own` are the rules of the
/// flow's port, `other` those of the port at the far end of a local flow.
fn fill_session(
    policy: &mut SessionPolicy,
    flags: FlowFlags,
    own: &RuleSource<'_>,
    other: Option<&RuleSource<'_>>,
) {
    if flags.contains(FlowFlags::LOCAL) {
        policy.rule_present = push_rules(&mut policy.acl_l, own(true));
        policy.reverse_out_rule_present = push_rules(&mut policy.reverse_out_acl_l, own(false));
        if let Some(other) = other {
            policy.out_rule_present = push_rules(&mut policy.out_acl_l, other(false));
            policy.reverse_rule_present = push_rules(&mut policy.reverse_acl_l, other(true));
        }
    } else {
        let ingress = flags.contains(FlowFlags::INGRESS_DIR);
        policy.rule_present = push_rules(&mut policy.acl_l, own(ingress));
        policy.reverse_out_rule_present = push_rules(&mut policy.reverse_out_acl_l, own(!ingress));
    }
}

fn sg_rules<'a>(db: &'a OperDb, vmi: &'a VmInterface) -> impl Fn(bool) -> (Vec<Arc<Acl>>, bool) + 'a {
    move |ingress| {
        let sgs = vmi.sg_list.iter().filter_map(|id| db.sg(*id));
        let mut present = false;
        let mut acls = Vec::new();
        for sg in sgs {
            present |= sg.is_acl_set();
            if let Some(acl) = sg.acl_for_flow(ingress) {
                acls.push(Arc::clone(acl));
            }
        }
        (acls, present)
    }
}

fn aps_rules(vmi: &VmInterface) -> impl Fn(bool) -> (Vec<Arc<Acl>>, bool) + '_ {
    move |_| (vmi.fw_acls.clone(), !vmi.fw_acls.is_empty())
}

fn fwaas_rules(vn: Option<&VirtualNetwork>) -> impl Fn(bool) -> (Vec<Arc<Acl>>, bool) + '_ {
    move |_| match vn {
        Some(vn) => (vn.fwaas_acls.clone(), !vn.fwaas_acls.is_empty()),
        None => (Vec::new(), false),
    }
}

fn vm_port<'a>(db: &'a OperDb, flow: &FlowEntry) -> Option<&'a VmInterface> {
    flow.data.intf.and_then(|i| db.interface(i)).and_then(|i| i.as_vm())
}

fn vn_of<'a>(db: &'a OperDb, flow: &FlowEntry) -> Option<&'a VirtualNetwork> {
    flow.data.vn.and_then(|vn| db.vn(&vn)).map(|vn| &**vn)
}

fn push_opt(list: &mut MatchAclParamsList, acl: Option<&Arc<Acl>>) {
    if let Some(acl) = acl {
        list.push(MatchAclParams::new(Arc::clone(acl)));
    }
}

fn get_policy(db: &OperDb, flow: &mut FlowEntry, rflow: Option<&FlowEntry>) {
    let Some(vn) = vn_of(db, flow) else {
        return;
    };
    let mp = &mut flow.data.match_p;
    // mirroring applies to policy exempt flows too
    push_opt(&mut mp.m_mirror_acl_l, vn.mirror_acl.as_ref());
    push_opt(&mut mp.m_mirror_acl_l, vn.mirror_cfg_acl.as_ref());

    if flow.flags.is_policy_exempt() {
        return;
    }
    push_opt(&mut mp.m_acl_l, vn.acl.as_ref());

    if !flow.flags.contains(FlowFlags::LOCAL) {
        return;
    }
    let Some(rvn) = rflow.and_then(|r| vn_of(db, r)) else {
        return;
    };
    push_opt(&mut mp.m_out_acl_l, rvn.acl.as_ref());
    push_opt(&mut mp.m_out_mirror_acl_l, rvn.mirror_acl.as_ref());
    push_opt(&mut mp.m_out_mirror_acl_l, rvn.mirror_cfg_acl.as_ref());
}

fn get_session_lists(db: &OperDb, flow: &mut FlowEntry, rflow: Option<&FlowEntry>) {
    if flow.flags.is_policy_exempt() || flow.is_reverse() {
        return;
    }
    let Some(vmi) = vm_port(db, flow) else {
        return;
    };
    let rvmi = rflow.and_then(|r| vm_port(db, r));
    let vn = vn_of(db, flow);
    let rvn = rflow.and_then(|r| vn_of(db, r));
    let flags = flow.flags;
    let mp = &mut flow.data.match_p;

    let own = sg_rules(db, vmi);
    let other = rvmi.map(|r| sg_rules(db, r));
    fill_session(
        &mut mp.sg_policy,
        flags,
        &own,
        other.as_ref().map(|o| o as &RuleSource<'_>),
    );

    let own = aps_rules(vmi);
    let other = rvmi.map(aps_rules);
    fill_session(
        &mut mp.aps_policy,
        flags,
        &own,
        other.as_ref().map(|o| o as &RuleSource<'_>),
    );

    let own = fwaas_rules(vn);
    let other = rflow.map(|_| fwaas_rules(rvn));
    fill_session(
        &mut mp.fwaas_policy,
        flags,
        &own,
        other.as_ref().map(|o| o as &RuleSource<'_>),
    );
}

fn get_vrf_assign_acl(db: &OperDb, flow: &mut FlowEntry) {
    if flow.flags.is_policy_exempt() {
        return;
    }
    let Some(vmi) = vm_port(db, flow) else {
        return;
    };
    let acl = if flow.is_set(FlowFlags::NAT) {
        None
    } else {
        vmi.vrf_assign_acl.as_ref()
    };
    let acl = acl.or_else(|| vn_of(db, flow).and_then(|vn| vn.acl.as_ref()));
    push_opt(&mut flow.data.match_p.m_vrf_assign_acl_l, acl);
}

//////////////////////////////////////////////////////////////////
/// Rebuild every rule list of `flow` from the snapshot `db`.
/// Short flows and flows not attached to a VM port get no rules.
//////////////////////////////////////////////////////////////////
pub fn get_policy_info(db: &OperDb, flow: &mut FlowEntry, rflow: Option<&FlowEntry>) {
    flow.data.match_p.reset_rules();
    if flow.is_short() || vm_port(db, flow).is_none() {
        return;
    }
    get_policy(db, flow, rflow);
    get_session_lists(db, flow, rflow);
    get_vrf_assign_acl(db, flow);
    trace!(
        "Gathered rules for {}: {} network, {} sg",
        flow.key(),
        flow.data.match_p.m_acl_l.len(),
        flow.data.match_p.sg_policy.acl_l.len()
    );
}
