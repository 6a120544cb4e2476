// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Reverse-path-forwarding nexthop selection and ECMP member tracking

use flow_entry::{FlowEntry, FlowFlags, ShortReason};
use routing::{NextHopId, OperDb, Route};

#[allow(unused)]
use tracing::{debug, trace, warn};

fn is_composite(db: &OperDb, nh: Option<NextHopId>) -> bool {
    nh.and_then(|id| db.nexthop(id))
        .is_some_and(routing::NextHop::is_composite)
}

/// Record the source nexthop of a flow. Moving from a plain nexthop onto a
/// composite one traps the flow until the member it uses is learnt.
pub fn set_rpf_nh_state(db: &OperDb, flow: &mut FlowEntry, nh: Option<NextHopId>) {
    let old = flow.data.rpf.src_ip_nh;
    if old != nh {
        if old.is_some() && !is_composite(db, old) && is_composite(db, nh) {
            debug!("Flow {}: rpf nexthop became ecmp, trapping", flow.key());
            flow.set_flags(FlowFlags::RPF_TRAP);
        }
        trace!("Flow {}: source nexthop {old:?} -> {nh:?}", flow.key());
    }
    flow.data.rpf.src_ip_nh = nh;
}

//////////////////////////////////////////////////////////////////
/// Resolve the source nexthop of `flow` from `route`, the route to its
/// source in the flow's source vrf (the bridge route for layer-2 flows).
///
/// Layer-2 flows validate against the layer-3 route of the source when there
/// is a usable one: always on ingress, and for host routes on egress. An ecmp
/// layer-3 route, or a bare-metal port, keeps the bridge route. An ingress
/// layer-2 flow without any layer-3 route cannot be validated and is returned
/// short.
//////////////////////////////////////////////////////////////////
pub fn set_rpf_nh(db: &OperDb, flow: &mut FlowEntry, route: Option<&Route>) -> Option<ShortReason> {
    if flow.data.rpf.ecmp_rpf_nh.is_some() {
        return None;
    }
    flow.data.rpf.l2_rpf_plen = 32;
    let Some(route) = route else {
        set_rpf_nh_state(db, flow, None);
        return None;
    };
    let mut nh = route.active_nh();

    let baremetal = flow
        .data
        .intf
        .and_then(|i| db.interface(i))
        .is_some_and(routing::Interface::is_baremetal);
    if !flow.is_l3() && !baremetal {
        let src = flow.key().src_addr;
        match db.uc_route(flow.data.flow_source_vrf, src) {
            None if flow.is_ingress() => {
                set_rpf_nh_state(db, flow, nh);
                return Some(ShortReason::NoSrcRouteL2Rpf);
            }
            None => {}
            Some(l3) if is_composite(db, l3.active_nh()) => {}
            Some(l3) if flow.is_ingress() || l3.is_host_route() => {
                nh = l3.active_nh();
                flow.data.rpf.l2_rpf_plen = l3.plen();
            }
            Some(_) => {}
        }
    }
    set_rpf_nh_state(db, flow, nh);
    None
}

/// Route to the source of `flow` in its source vrf, layer-2 aware
fn source_route<'a>(db: &'a OperDb, flow: &FlowEntry) -> Option<&'a Route> {
    let vrf = db.vrf(flow.data.flow_source_vrf)?;
    if flow.is_l3() {
        vrf.uc_route(flow.key().src_addr)
    } else {
        vrf.l2_route(flow.data.smac)
    }
}

/// Initial source nexthop resolution, at flow creation
pub fn rpf_init(db: &OperDb, flow: &mut FlowEntry) -> Option<ShortReason> {
    let route = source_route(db, flow).cloned();
    set_rpf_nh(db, flow, route.as_ref())
}

/// Pin the source nexthop to the composite the paired flow resolved, or
/// release the pin and resolve from the routes again.
pub fn set_ecmp_rpf_nh(db: &OperDb, flow: &mut FlowEntry, nh: Option<NextHopId>) {
    if flow.data.rpf.ecmp_rpf_nh == nh {
        return;
    }
    flow.data.rpf.ecmp_rpf_nh = nh;
    match nh {
        Some(nh) => {
            set_rpf_nh_state(db, flow, Some(nh));
            flow.reset_flags(FlowFlags::RPF_TRAP);
        }
        None => {
            if let Some(reason) = rpf_init(db, flow) {
                flow.set_short(reason);
            }
        }
    }
}

/// Refresh whether the network of the flow wants reverse-path checks
pub fn update_rpf(db: &OperDb, flow: &mut FlowEntry) {
    flow.data.rpf.enable_rpf = flow
        .data
        .vn
        .and_then(|vn| db.vn(&vn))
        .is_none_or(|vn| vn.enable_rpf);
}

//////////////////////////////////////////////////////////////////
/// Decide the nexthop incoming packets of `flow` are validated against.
///
/// Runs after policy: a translation of the paired flow's destination vrf
/// changes where an egress flow's source is looked up. For an ecmp source,
/// an ingress flow validates against the member of its own interface. When
/// the interface is not a member the whole composite is used, which no
/// packet can arrive on.
//////////////////////////////////////////////////////////////////
pub fn rpf_update(db: &OperDb, flow: &mut FlowEntry, rflow: Option<&FlowEntry>) {
    let rpf_nh = compute_rpf_nh(db, flow, rflow);
    if rpf_nh != flow.data.rpf.rpf_nh {
        debug!("Flow {}: rpf nexthop {:?} -> {rpf_nh:?}", flow.key(), flow.data.rpf.rpf_nh);
    }
    flow.data.rpf.rpf_nh = rpf_nh;
}

fn compute_rpf_nh(db: &OperDb, flow: &FlowEntry, rflow: Option<&FlowEntry>) -> Option<NextHopId> {
    if !flow.data.rpf.enable_rpf {
        return None;
    }
    let src_nh = flow.data.rpf.src_ip_nh?;
    let Some(comp) = db.nexthop(src_nh).and_then(|nh| nh.as_composite()) else {
        return Some(src_nh);
    };
    if flow.is_ingress() {
        let member = flow
            .data
            .intf
            .and_then(|intf| db.nexthops().member_for_interface(comp, intf));
        return Some(member.unwrap_or(src_nh));
    }
    let vrf = rflow.map_or(flow.data.flow_source_vrf, FlowEntry::destination_vrf);
    db.uc_route(vrf, flow.key().src_addr)
        .and_then(Route::active_nh)
}

/// Whether a packet of `flow` received from `arrival_nh` passes the reverse path check
#[must_use]
pub fn rpf_check(flow: &FlowEntry, arrival_nh: NextHopId) -> bool {
    if !flow.data.rpf.enable_rpf {
        return true;
    }
    flow.data.rpf.rpf_nh == Some(arrival_nh)
}

//////////////////////////////////////////////////////////////////
/// For an ecmp flow, find which member of the destination composite the
/// paired flow's traffic is coming from, so both directions of the session
/// stick to the same path. The paired flow gets the composite as source.
//////////////////////////////////////////////////////////////////
pub fn update_ecmp_info(db: &OperDb, flow: &mut FlowEntry, rflow: &mut FlowEntry) {
    if !flow.is_set(FlowFlags::ECMP) || flow.is_short() || !flow.is_l3() {
        return;
    }
    let vrf = flow.destination_vrf();
    let Some(route) = db.uc_route(vrf, rflow.key().src_addr) else {
        return;
    };
    let local = flow.is_local() || !flow.is_ingress();
    // traffic arriving with an mpls label resolves through the local path
    let mpls_path = !flow.is_local();
    let comp_id = match &route.path {
        Some(path) if local && mpls_path => path.local_nh.unwrap_or(path.nh),
        Some(path) => path.nh,
        None => return,
    };
    let Some(comp) = db.nexthop(comp_id).and_then(|nh| nh.as_composite()) else {
        flow.data.component_nh_idx = None;
        set_ecmp_rpf_nh(db, rflow, None);
        return;
    };

    let idx = if local {
        rflow
            .data
            .intf
            .and_then(|intf| db.nexthops().member_for_interface(comp, intf))
            .and_then(|member| comp.index_of_nh(member))
    } else {
        flow.data
            .peer_vrouter
            .and_then(|dip| db.nexthops().member_for_tunnel(comp, dip))
            .and_then(|member| comp.index_of(member))
    };
    if let Some(idx) = idx {
        trace!("Flow {}: ecmp member {idx} of nh {comp_id}", flow.key());
        flow.data.component_nh_idx = Some(idx);
        set_ecmp_rpf_nh(db, rflow, Some(comp_id));
    } else {
        flow.data.component_nh_idx = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::policy::{PolicyContext, do_policy};
    use acl::{Acl, AclEntry, AclMatch, FlowAction, MatchAclParams, TrafficAction};
    use etherparse::IpNumber;
    use flow_entry::FlowKey;
    use std::sync::Arc;
    use pretty_assertions::assert_eq;
    use routing::{
        ComponentNh, Interface, MacAddr, NextHop, OperDbChange, RoutePath, VirtualNetwork,
        VmInterface,
    };
    use std::net::IpAddr;
    use uuid::Uuid;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    /// vrf 1 with an ecmp route to 10.1.0.0/24 over interfaces 10, 11 and 12
    fn ecmp_db() -> OperDb {
        let mut db = OperDb::new();
        let vn = Uuid::new_v4();
        let changes = vec![
            OperDbChange::AddVn(VirtualNetwork::new(vn, "app").with_vrf(1).into()),
            OperDbChange::AddVrf(1, "app-vrf".into(), Some(vn)),
            OperDbChange::AddNextHop(NextHop::interface(1, 10)),
            OperDbChange::AddNextHop(NextHop::interface(2, 11)),
            OperDbChange::AddNextHop(NextHop::interface(3, 12)),
            OperDbChange::AddNextHop(NextHop::interface(4, 13)),
            OperDbChange::AddNextHop(NextHop::composite(
                5,
                vec![
                    ComponentNh { label: 16, nh: Some(1) },
                    ComponentNh { label: 17, nh: Some(2) },
                    ComponentNh { label: 18, nh: Some(3) },
                ],
            )),
            OperDbChange::AddRoute(
                1,
                Route::inet("10.1.0.0/24".parse().unwrap(), RoutePath::new(5, "app")),
            ),
            OperDbChange::AddRoute(
                1,
                Route::inet("10.2.0.0/24".parse().unwrap(), RoutePath::new(4, "app")),
            ),
        ];
        for change in changes {
            db.apply(change).unwrap();
        }
        for ifindex in [10, 11, 12, 13] {
            let vmi = VmInterface::new(vn, 1, MacAddr::default(), ip("10.1.0.1"));
            db.apply(OperDbChange::AddInterface(Interface::vm(ifindex, "tap", vmi)))
                .unwrap();
        }
        db
    }

    fn ingress_flow(db: &OperDb, src: &str, intf: u32) -> FlowEntry {
        let key = FlowKey::new(1, IpNumber::UDP, ip(src), ip("10.9.0.1"), 1000, 2000);
        let mut flow = FlowEntry::new(key, FlowFlags::INGRESS_DIR);
        flow.data.intf = Some(intf);
        assert_eq!(rpf_init(db, &mut flow), None);
        flow
    }

    #[test]
    fn test_ecmp_ingress_picks_own_member() {
        let db = ecmp_db();
        let mut flow = ingress_flow(&db, "10.1.0.7", 11);
        assert_eq!(flow.data.rpf.src_ip_nh, Some(5));
        rpf_update(&db, &mut flow, None);
        assert_eq!(flow.data.rpf.rpf_nh, Some(2));
        assert!(rpf_check(&flow, 2));
        assert!(!rpf_check(&flow, 1));
    }

    #[test]
    fn test_ecmp_ingress_fails_closed() {
        let db = ecmp_db();
        let mut flow = ingress_flow(&db, "10.1.0.7", 13);
        rpf_update(&db, &mut flow, None);
        assert_eq!(flow.data.rpf.rpf_nh, Some(5));
        for member in [1, 2, 3, 4] {
            assert!(!rpf_check(&flow, member));
        }
    }

    /// Reverse of `flow`, translated by a vrf-assign rule to `target` if any
    fn reverse_of(db: &OperDb, flow: &FlowEntry, target: Option<&str>) -> FlowEntry {
        let mut rflow = FlowEntry::new(
            flow.key().reversed(flow.key().vrf),
            FlowFlags::INGRESS_DIR | FlowFlags::REVERSE,
        );
        if let Some(target) = target {
            let entry = AclEntry::new(
                1,
                AclMatch::default(),
                FlowAction::new(TrafficAction::PASS).with_vrf_translate(target, false),
            );
            let acl = Acl::new(Uuid::new_v4(), "vrf-assign", vec![entry]).unwrap();
            rflow
                .data
                .match_p
                .m_vrf_assign_acl_l
                .push(MatchAclParams::new(Arc::new(acl)));
        }
        let config = EngineConfig::default();
        let pctx = PolicyContext::new(db, &config);
        assert_eq!(do_policy(&pctx, &mut rflow, Some(flow)), None);
        rflow
    }

    #[test]
    fn test_ecmp_egress_follows_reverse_translation() {
        let mut db = ecmp_db();
        let changes = vec![
            OperDbChange::AddVrf(2, "svc-vrf".into(), None),
            OperDbChange::AddVrf(3, "other-vrf".into(), None),
            OperDbChange::AddRoute(
                2,
                Route::inet("10.1.0.0/16".parse().unwrap(), RoutePath::new(1, "svc")),
            ),
            OperDbChange::AddRoute(
                3,
                Route::inet("10.1.0.7/32".parse().unwrap(), RoutePath::new(2, "other")),
            ),
        ];
        for change in changes {
            db.apply(change).unwrap();
        }

        // egress flow from the ecmp destination 10.1.0.0/24 to a local port
        let key = FlowKey::new(1, IpNumber::UDP, ip("10.1.0.7"), ip("10.2.0.7"), 1000, 2000);
        let mut flow = FlowEntry::new(key, FlowFlags::empty());
        flow.data.intf = Some(13);
        assert_eq!(rpf_init(&db, &mut flow), None);
        assert_eq!(flow.data.rpf.src_ip_nh, Some(5));

        let rflow = reverse_of(&db, &flow, None);
        assert_eq!(rflow.destination_vrf(), 1);
        rpf_update(&db, &mut flow, Some(&rflow));
        assert_eq!(flow.data.rpf.rpf_nh, Some(5));

        let rflow = reverse_of(&db, &flow, Some("svc-vrf"));
        assert_eq!(rflow.destination_vrf(), 2);
        rpf_update(&db, &mut flow, Some(&rflow));
        assert_eq!(flow.data.rpf.rpf_nh, Some(1));
        assert!(rpf_check(&flow, 1));
        assert!(!rpf_check(&flow, 5));

        let rflow = reverse_of(&db, &flow, Some("other-vrf"));
        assert_eq!(rflow.destination_vrf(), 3);
        rpf_update(&db, &mut flow, Some(&rflow));
        assert_eq!(flow.data.rpf.rpf_nh, Some(2));
    }

    #[test]
    fn test_rpf_disabled() {
        let db = ecmp_db();
        let mut flow = ingress_flow(&db, "10.2.0.7", 13);
        rpf_update(&db, &mut flow, None);
        assert_eq!(flow.data.rpf.rpf_nh, Some(4));
        flow.data.rpf.enable_rpf = false;
        rpf_update(&db, &mut flow, None);
        assert_eq!(flow.data.rpf.rpf_nh, None);
        assert!(rpf_check(&flow, 1));
    }

    #[test]
    fn test_trap_on_move_to_ecmp() {
        let db = ecmp_db();
        let mut flow = ingress_flow(&db, "10.2.0.7", 13);
        assert!(!flow.is_set(FlowFlags::TRAPPED));
        set_rpf_nh_state(&db, &mut flow, Some(5));
        assert!(flow.is_set(FlowFlags::RPF_TRAP));
        assert!(!flow.is_set(FlowFlags::TRAP));

        // pinning the composite learns the member and releases the flow
        set_ecmp_rpf_nh(&db, &mut flow, Some(5));
        assert!(!flow.is_set(FlowFlags::TRAPPED));
    }

    #[test]
    fn test_l2_ingress_without_l3_route_is_short() {
        let db = ecmp_db();
        let key = FlowKey::new(1, IpNumber::UDP, ip("10.7.0.1"), ip("10.1.0.2"), 1, 2);
        let mut flow = FlowEntry::new(key, FlowFlags::INGRESS_DIR | FlowFlags::L2);
        flow.data.intf = Some(10);
        let bridge = Route::bridge(RoutePath::new(1, "app"));
        assert_eq!(
            set_rpf_nh(&db, &mut flow, Some(&bridge)),
            Some(ShortReason::NoSrcRouteL2Rpf)
        );

        // egress keeps the bridge nexthop
        let mut flow = FlowEntry::new(key, FlowFlags::L2);
        assert_eq!(set_rpf_nh(&db, &mut flow, Some(&bridge)), None);
        assert_eq!(flow.data.rpf.src_ip_nh, Some(1));
    }

    #[test]
    fn test_ecmp_component_index() {
        let db = ecmp_db();
        // local flow from 10.2.0.7 (intf 13) to an ecmp destination 10.1.0.7
        let key = FlowKey::new(1, IpNumber::UDP, ip("10.2.0.7"), ip("10.1.0.7"), 1000, 2000);
        let mut flow = FlowEntry::new(key, FlowFlags::INGRESS_DIR | FlowFlags::LOCAL | FlowFlags::ECMP);
        flow.data.intf = Some(13);
        let mut rflow = FlowEntry::new(key.reversed(1), FlowFlags::LOCAL | FlowFlags::REVERSE);
        rflow.data.intf = Some(12);

        update_ecmp_info(&db, &mut flow, &mut rflow);
        assert_eq!(flow.data.component_nh_idx, Some(2));
        assert_eq!(rflow.data.rpf.ecmp_rpf_nh, Some(5));
        assert_eq!(rflow.data.rpf.src_ip_nh, Some(5));
    }
}
