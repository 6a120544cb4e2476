// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Creation of a flow pair from a parsed packet

use crate::config::EngineConfig;
use crate::rpf::rpf_init;
use acl::{SgId, TagId, VrfId};
use etherparse::IpNumber;
use flow_entry::{
    FlowEntry, FlowFlags, FlowKey, FlowTable, LinkLocalPorts, ShortReason,
};
use routing::{IfIndex, MacAddr, NextHopKind, OperDb, Route};
use std::net::IpAddr;

#[allow(unused)]
use tracing::{debug, info, warn};

/// Network name given to endpoints no route describes
pub const UNKNOWN_VN: &str = "__UNKNOWN__";

/// Translation applied to a flow. Addresses and ports are those of the
/// translated packet; `dest_vrf` is where the translated destination lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NatInfo {
    pub src: IpAddr,
    pub src_port: u16,
    pub dst: IpAddr,
    pub dst_port: u16,
    pub dest_vrf: VrfId,
}

/// What the packet parser and the ingress path know about the first packet
#[derive(Debug, Clone, PartialEq)]
pub struct PacketInfo {
    pub key: FlowKey,
    pub ingress_ifindex: IfIndex,
    pub tcp_ack: bool,
    pub l2: bool,
    pub smac: MacAddr,
    pub dmac: MacAddr,
    pub nat: Option<NatInfo>,
    /// Compute node a packet received over a tunnel came from
    pub peer_vrouter: Option<IpAddr>,
}

impl PacketInfo {
    #[must_use]
    pub fn new(key: FlowKey, ingress_ifindex: IfIndex) -> Self {
        Self {
            key,
            ingress_ifindex,
            tcp_ack: false,
            l2: false,
            smac: MacAddr::default(),
            dmac: MacAddr::default(),
            nat: None,
            peer_vrouter: None,
        }
    }

    #[must_use]
    pub fn with_tcp_ack(mut self) -> Self {
        self.tcp_ack = true;
        self
    }

    #[must_use]
    pub fn with_l2(mut self, smac: MacAddr, dmac: MacAddr) -> Self {
        self.l2 = true;
        self.smac = smac;
        self.dmac = dmac;
        self
    }

    #[must_use]
    pub fn with_nat(mut self, nat: NatInfo) -> Self {
        self.nat = Some(nat);
        self
    }

    #[must_use]
    pub fn with_peer(mut self, peer: IpAddr) -> Self {
        self.peer_vrouter = Some(peer);
        self
    }
}

/// Endpoint attributes taken from the active path of a route
struct Endpoint {
    vns: Vec<String>,
    sgs: Vec<SgId>,
    tags: Vec<TagId>,
    plen: u8,
}

impl Endpoint {
    fn from_route(route: Option<&Route>) -> Self {
        match route.and_then(|r| r.path.as_ref().map(|p| (r, p))) {
            Some((route, path)) => Self {
                vns: path.dest_vn_list.clone(),
                sgs: path.sg_list.clone(),
                tags: path.tag_list.clone(),
                plen: route.plen(),
            },
            None => Self::unknown(),
        }
    }

    fn unknown() -> Self {
        Self {
            vns: vec![UNKNOWN_VN.to_owned()],
            sgs: Vec::new(),
            tags: Vec::new(),
            plen: 0,
        }
    }
}

fn is_linklocal(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(a) => a.is_link_local(),
        IpAddr::V6(a) => a.is_unicast_link_local(),
    }
}

/// Builds flow pairs against one snapshot of the oper db
pub struct FlowBuilder<'a> {
    db: &'a OperDb,
    config: &'a EngineConfig,
    ports: Option<&'a LinkLocalPorts>,
}

impl<'a> FlowBuilder<'a> {
    #[must_use]
    pub fn new(db: &'a OperDb, config: &'a EngineConfig) -> Self {
        Self {
            db,
            config,
            ports: None,
        }
    }

    #[must_use]
    pub fn with_linklocal_ports(mut self, ports: &'a LinkLocalPorts) -> Self {
        self.ports = Some(ports);
        self
    }

    fn route(&self, vrf: VrfId, addr: IpAddr, mac: MacAddr, l2: bool) -> Option<&'a Route> {
        let vrf = self.db.vrf(vrf)?;
        if l2 { vrf.l2_route(mac) } else { vrf.uc_route(addr) }
    }

    /// Local VM interface a route delivers to, if any
    fn local_vm_intf(&self, route: Option<&Route>) -> Option<IfIndex> {
        let nh = self.db.nexthop(route?.active_nh()?)?;
        match nh.kind {
            NextHopKind::Interface { ifindex } => self
                .db
                .interface(ifindex)
                .filter(|i| i.is_vm())
                .map(|_| ifindex),
            _ => None,
        }
    }

    fn is_ecmp(&self, route: Option<&Route>) -> bool {
        route
            .and_then(Route::active_nh)
            .and_then(|nh| self.db.nexthop(nh))
            .is_some_and(routing::NextHop::is_composite)
    }

    fn attach_intf(&self, flow: &mut FlowEntry, ifindex: Option<IfIndex>) {
        flow.data.intf = ifindex;
        let vmi = ifindex
            .and_then(|i| self.db.interface(i))
            .and_then(|i| i.as_vm());
        flow.data.vn = vmi.and_then(|v| v.vn);
        flow.data.vm = vmi.and_then(|v| v.vm);
    }

    fn is_bgp_router_service(&self, pkt: &PacketInfo) -> bool {
        let key = &pkt.key;
        if key.protocol() != IpNumber::TCP || key.dst_port != self.config.bgp_service_port {
            return false;
        }
        self.db
            .interface(pkt.ingress_ifindex)
            .and_then(|i| i.as_vm())
            .is_some_and(|vmi| vmi.gateways.contains(&key.dst_addr))
    }

    //////////////////////////////////////////////////////////////////
    /// Build the forward flow of `pkt` and its reverse flow.
    ///
    /// Whatever prevents a durable decision makes both flows short, with the
    /// same reason. The reverse flow is `None` only when it would have the
    /// key of the forward flow.
    //////////////////////////////////////////////////////////////////
    #[must_use]
    pub fn build(&self, pkt: &PacketInfo, table: &FlowTable) -> (FlowEntry, Option<FlowEntry>) {
        let key = pkt.key;
        let mut short = None;

        let ingress_if = self.db.interface(pkt.ingress_ifindex);
        if !ingress_if.is_some_and(|i| i.active) {
            short = Some(ShortReason::UnavailableInterface);
        }
        let src_vm_intf = ingress_if.filter(|i| i.is_vm()).map(|i| i.ifindex);
        if self.db.vrf(key.vrf).is_none() {
            short = short.or(Some(ShortReason::UnavailableVrf));
        }

        let dest_vrf = pkt.nat.map_or(key.vrf, |nat| nat.dest_vrf);
        if self.db.vrf(dest_vrf).is_none() {
            short = short.or(Some(ShortReason::UnavailableVrf));
        }
        let (dst_addr, dst_port) = pkt.nat.map_or((key.dst_addr, key.dst_port), |n| (n.dst, n.dst_port));

        let src_route = self.route(key.vrf, key.src_addr, pkt.smac, pkt.l2);
        let dst_route = self.route(dest_vrf, dst_addr, pkt.dmac, pkt.l2);
        let dest_vm_intf = self.local_vm_intf(dst_route);

        let mut flags = FlowFlags::empty();
        if pkt.l2 {
            flags |= FlowFlags::L2;
        }
        if pkt.nat.is_some() {
            flags |= FlowFlags::NAT;
        }
        if src_vm_intf.is_some() && dest_vm_intf.is_some() {
            flags |= FlowFlags::LOCAL;
        }
        if self.is_ecmp(src_route) || self.is_ecmp(dst_route) {
            flags |= FlowFlags::ECMP;
        }
        if key.dst_addr.is_multicast() {
            flags |= FlowFlags::MULTICAST;
        }
        if is_linklocal(key.dst_addr) && pkt.nat.is_some() {
            flags |= FlowFlags::LINKLOCAL;
        }
        if self.is_bgp_router_service(pkt) {
            flags |= FlowFlags::BGP_ROUTER_SERVICE;
        }
        if self.config.is_fabric_control(&key) {
            flags |= FlowFlags::FABRIC_CONTROL;
        }
        if pkt.tcp_ack {
            flags |= FlowFlags::TCP_ACK;
        }

        let flood = pkt.l2 && dst_route.is_none();
        if flood {
            flags |= FlowFlags::UNKNOWN_UNICAST_FLOOD;
        }
        if src_vm_intf.is_some() && src_route.is_none() && !pkt.l2 {
            short = short.or(Some(ShortReason::NoSrcRoute));
        }
        if dst_route.is_none() && !pkt.l2 && !flags.contains(FlowFlags::MULTICAST) {
            short = short.or(Some(ShortReason::NoDstRoute));
        }

        let mut fwd_flags = flags;
        let mut rev_flags = flags;
        if src_vm_intf.is_some() {
            fwd_flags |= FlowFlags::INGRESS_DIR;
        }
        if dest_vm_intf.is_some() {
            rev_flags |= FlowFlags::INGRESS_DIR;
        }
        rev_flags.remove(FlowFlags::TCP_ACK);

        let mut fwd = FlowEntry::new(key, fwd_flags);
        self.attach_intf(&mut fwd, src_vm_intf.or(dest_vm_intf));

        let src = Endpoint::from_route(src_route);
        let mut dst = Endpoint::from_route(dst_route);
        if flood {
            dst.vns.clone_from(&src.vns);
        }
        let data = &mut fwd.data;
        data.dest_vrf = dest_vrf;
        data.flow_dest_vrf = dest_vrf;
        data.smac = pkt.smac;
        data.dmac = pkt.dmac;
        data.peer_vrouter = pkt.peer_vrouter;
        data.nat_addr = pkt.nat.map(|n| (n.dst, n.dst_port));
        data.source_vn_list.clone_from(&src.vns);
        data.source_sg_id_l.clone_from(&src.sgs);
        data.source_tags.clone_from(&src.tags);
        data.source_plen = src.plen;
        data.dest_vn_list.clone_from(&dst.vns);
        data.dest_sg_id_l.clone_from(&dst.sgs);
        data.dest_tags.clone_from(&dst.tags);
        data.dest_plen = dst.plen;

        let limit = self.config.max_vm_flows;
        if limit > 0 && fwd.data.vm.is_some_and(|vm| table.vm_flow_count(&vm) + 2 > limit) {
            short = short.or(Some(ShortReason::FlowLimit));
        }

        let (rsrc_addr, mut rsrc_port) = (dst_addr, dst_port);
        let (rdst_addr, mut rdst_port) = pkt
            .nat
            .map_or((key.src_addr, key.src_port), |n| (n.src, n.src_port));
        if fwd.is_set(FlowFlags::LINKLOCAL) && short.is_none() {
            match self.bind_linklocal(&mut fwd) {
                Some(port) => rdst_port = port,
                None => short = Some(ShortReason::LinklocalSrcNat),
            }
        }
        if !key.has_ports() {
            rsrc_port = key.src_port;
            rdst_port = key.dst_port;
        }
        let rkey = FlowKey::new(
            dest_vrf,
            key.protocol(),
            rsrc_addr,
            rdst_addr,
            rsrc_port,
            rdst_port,
        );

        let mut rev = if rkey == key {
            short = short.or(Some(ShortReason::SameFlowRflowKey));
            None
        } else {
            let mut rev = FlowEntry::new(rkey, rev_flags | FlowFlags::REVERSE);
            self.attach_intf(&mut rev, dest_vm_intf.or(src_vm_intf));
            let data = &mut rev.data;
            data.vrf = dest_vrf;
            data.flow_source_vrf = dest_vrf;
            data.dest_vrf = key.vrf;
            data.flow_dest_vrf = key.vrf;
            data.smac = pkt.dmac;
            data.dmac = pkt.smac;
            data.peer_vrouter = pkt.peer_vrouter;
            data.source_vn_list = dst.vns;
            data.source_sg_id_l = dst.sgs;
            data.source_tags = dst.tags;
            data.source_plen = dst.plen;
            data.dest_vn_list = src.vns;
            data.dest_sg_id_l = src.sgs;
            data.dest_tags = src.tags;
            data.dest_plen = src.plen;
            Some(rev)
        };

        if short.is_none() {
            short = rpf_init(self.db, &mut fwd);
        }
        if let Some(rev) = rev.as_mut() {
            if let Some(reason) = rpf_init(self.db, rev) {
                short = short.or(Some(reason));
            }
        }

        if let Some(reason) = short {
            fwd.set_short(reason);
            if let Some(rev) = rev.as_mut() {
                rev.set_short(reason);
            }
        }
        debug!("Built flow {} [{}]", fwd.key(), fwd.flags);
        (fwd, rev)
    }

    fn bind_linklocal(&self, fwd: &mut FlowEntry) -> Option<u16> {
        let ports = self.ports?;
        let vm = fwd.data.vm?;
        match ports.allocate(vm, fwd.key().protocol()) {
            Ok(binding) => {
                let port = binding.port();
                fwd.linklocal = Some(binding);
                fwd.set_flags(FlowFlags::LINKLOCAL_BIND_PORT);
                Some(port)
            }
            Err(e) => {
                warn!("No linklocal port for {}: {e}", fwd.key());
                None
            }
        }
    }

    //////////////////////////////////////////////////////////////////
    /// Build the flow for a dataplane entry the agent has no record of.
    /// It is kept short so the dataplane drops its packets.
    //////////////////////////////////////////////////////////////////
    #[must_use]
    pub fn build_audit(&self, key: FlowKey, ifindex: Option<IfIndex>) -> FlowEntry {
        let mut flow = FlowEntry::new(key, FlowFlags::empty());
        self.attach_intf(&mut flow, ifindex);
        let unknown = Endpoint::unknown();
        flow.data.source_vn_list.clone_from(&unknown.vns);
        flow.data.dest_vn_list = unknown.vns;
        flow.set_short(ShortReason::AuditEntry);
        info!("Created audit flow {key}");
        flow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use routing::{
        Interface, InterfaceKind, NextHop, OperDbChange, RoutePath, VirtualNetwork, VmInterface,
    };
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    /// Two local VMs, .5 on tap1 and .9 on tap2, and a remote subnet over a tunnel
    fn db() -> OperDb {
        let mut db = OperDb::new();
        let vn = Uuid::new_v4();
        let fabric = ip("192.0.2.20");
        let changes = vec![
            OperDbChange::AddVn(Arc::new(VirtualNetwork::new(vn, "app").with_vrf(1))),
            OperDbChange::AddVrf(1, "app-vrf".into(), Some(vn)),
            OperDbChange::AddVrf(0, "fabric".into(), None),
            OperDbChange::AddNextHop(NextHop::interface(1, 1)),
            OperDbChange::AddNextHop(NextHop::interface(2, 2)),
            OperDbChange::AddNextHop(NextHop::tunnel(3, fabric, 0)),
            OperDbChange::AddNextHop(NextHop::interface(4, 100)),
            OperDbChange::AddRoute(1, Route::inet("10.0.0.5/32".parse().unwrap(), RoutePath::new(1, "app").with_sgs(&[7]))),
            OperDbChange::AddRoute(1, Route::inet("10.0.0.9/32".parse().unwrap(), RoutePath::new(2, "app"))),
            OperDbChange::AddRoute(1, Route::inet("10.5.0.0/24".parse().unwrap(), RoutePath::new(3, "remote"))),
            OperDbChange::AddRoute(0, Route::inet("192.0.2.0/24".parse().unwrap(), RoutePath::new(4, "fabric"))),
        ];
        for change in changes {
            db.apply(change).unwrap();
        }
        let vm5 = VmInterface::new(vn, 1, MacAddr::default(), ip("10.0.0.5")).with_vm(Uuid::new_v4());
        let vm9 = VmInterface::new(vn, 1, MacAddr::default(), ip("10.0.0.9"));
        db.apply(OperDbChange::AddInterface(Interface::vm(1, "tap1", vm5))).unwrap();
        db.apply(OperDbChange::AddInterface(Interface::vm(2, "tap2", vm9))).unwrap();
        db.apply(OperDbChange::AddInterface(Interface::new(100, "eth0", InterfaceKind::Physical)))
            .unwrap();
        db
    }

    fn tcp(src: &str, dst: &str) -> FlowKey {
        FlowKey::new(1, IpNumber::TCP, ip(src), ip(dst), 1234, 80)
    }

    #[test]
    fn test_local_pair() {
        let db = db();
        let config = EngineConfig::default();
        let table = FlowTable::new(16);
        let builder = FlowBuilder::new(&db, &config);
        let (fwd, rev) = builder.build(&PacketInfo::new(tcp("10.0.0.5", "10.0.0.9"), 1), &table);
        let rev = rev.unwrap();

        assert!(!fwd.is_short());
        assert!(fwd.is_local() && fwd.is_ingress());
        assert!(rev.is_local() && rev.is_ingress() && rev.is_reverse());
        assert_eq!(fwd.data.intf, Some(1));
        assert_eq!(rev.data.intf, Some(2));
        assert_eq!(*rev.key(), fwd.key().reversed(1));
        assert_eq!(fwd.data.source_sg_id_l, vec![7]);
        assert_eq!(rev.data.dest_sg_id_l, vec![7]);
        assert_eq!(fwd.data.dest_plen, 32);
        assert_eq!(fwd.data.rpf.src_ip_nh, Some(1));
        assert_eq!(rev.data.rpf.src_ip_nh, Some(2));
    }

    #[test]
    fn test_remote_destination() {
        let db = db();
        let config = EngineConfig::default();
        let table = FlowTable::new(16);
        let builder = FlowBuilder::new(&db, &config);
        let (fwd, rev) = builder.build(&PacketInfo::new(tcp("10.0.0.5", "10.5.0.1"), 1), &table);
        let rev = rev.unwrap();
        assert!(!fwd.is_local() && fwd.is_ingress());
        assert!(!rev.is_ingress());
        assert_eq!(rev.data.intf, Some(1));
        assert_eq!(fwd.data.dest_vn_list, vec!["remote".to_string()]);
    }

    #[test]
    fn test_short_reasons_shared() {
        let db = db();
        let config = EngineConfig::default();
        let table = FlowTable::new(16);
        let builder = FlowBuilder::new(&db, &config);

        let (fwd, rev) = builder.build(&PacketInfo::new(tcp("10.0.0.5", "10.0.0.9"), 42), &table);
        assert_eq!(fwd.short_reason, Some(ShortReason::UnavailableInterface));
        assert_eq!(rev.unwrap().short_reason, Some(ShortReason::UnavailableInterface));

        let (fwd, _) = builder.build(&PacketInfo::new(tcp("10.0.0.5", "10.77.0.1"), 1), &table);
        assert_eq!(fwd.short_reason, Some(ShortReason::NoDstRoute));

        let same = FlowKey::new(1, IpNumber::UDP, ip("10.0.0.5"), ip("10.0.0.5"), 53, 53);
        let (fwd, rev) = builder.build(&PacketInfo::new(same, 1), &table);
        assert!(rev.is_none());
        assert_eq!(fwd.short_reason, Some(ShortReason::SameFlowRflowKey));
    }

    #[test]
    fn test_vm_flow_limit() {
        let db = db();
        let config = EngineConfig::default().with_max_vm_flows(1);
        let table = FlowTable::new(16);
        let builder = FlowBuilder::new(&db, &config);
        let (fwd, _) = builder.build(&PacketInfo::new(tcp("10.0.0.5", "10.0.0.9"), 1), &table);
        assert_eq!(fwd.short_reason, Some(ShortReason::FlowLimit));
    }

    #[test]
    fn test_linklocal_binding() {
        let db = db();
        let config = EngineConfig::default();
        let table = FlowTable::new(16);
        let ports = LinkLocalPorts::new(16, 4, Duration::from_secs(1));
        let builder = FlowBuilder::new(&db, &config).with_linklocal_ports(&ports);
        let key = tcp("10.0.0.5", "169.254.169.254");
        let nat = NatInfo {
            src: ip("10.0.0.5"),
            src_port: 1234,
            dst: ip("192.0.2.1"),
            dst_port: 8775,
            dest_vrf: 0,
        };
        let pkt = PacketInfo::new(key, 1).with_nat(nat);
        let (fwd, rev) = builder.build(&pkt, &table);
        assert!(fwd.is_set(FlowFlags::LINKLOCAL | FlowFlags::LINKLOCAL_BIND_PORT));
        assert!(!fwd.is_short());
        let port = fwd.linklocal.as_ref().unwrap().port();
        let rev = rev.unwrap();
        assert_eq!(rev.key().dst_port, port);
        assert_eq!(rev.key().src_port, 8775);
        assert_eq!(rev.data.vrf, 0);
        assert_eq!(ports.total(), 1);
        drop(fwd);
        assert_eq!(ports.total(), 0);
    }

    #[test]
    fn test_linklocal_without_ports_is_short() {
        let db = db();
        let config = EngineConfig::default();
        let table = FlowTable::new(16);
        let builder = FlowBuilder::new(&db, &config);
        let key = tcp("10.0.0.5", "169.254.169.254");
        let nat = NatInfo {
            src: ip("10.0.0.5"),
            src_port: 1234,
            dst: ip("192.0.2.1"),
            dst_port: 8775,
            dest_vrf: 0,
        };
        let (fwd, _) = builder.build(&PacketInfo::new(key, 1).with_nat(nat), &table);
        assert_eq!(fwd.short_reason, Some(ShortReason::LinklocalSrcNat));
    }

    #[test]
    fn test_audit_flow() {
        let db = db();
        let config = EngineConfig::default();
        let builder = FlowBuilder::new(&db, &config);
        let flow = builder.build_audit(tcp("10.0.0.5", "10.0.0.9"), Some(1));
        assert_eq!(flow.short_reason, Some(ShortReason::AuditEntry));
        assert_eq!(flow.data.source_vn_list, vec![UNKNOWN_VN.to_string()]);
        assert!(flow.data.vn.is_some());
    }
}
