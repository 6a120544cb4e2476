// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The oper db: every object flow evaluation reads, in one snapshot

use crate::errors::OperError;
use crate::interfaces::iftable::IfTable;
use crate::interfaces::interface::{IfIndex, Interface};
use crate::nexthop::{NextHop, NextHopId, NhTable};
use crate::route::{MacAddr, Route, Vrf};
use crate::sg::SecurityGroup;
use crate::vn::{VirtualNetwork, VnId};
use acl::{SgId, VrfId};
use ahash::RandomState;
use ipnet::IpNet;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

#[allow(unused)]
use tracing::{debug, error, info, warn};

/// A change to the oper db. Changes are applied in order.
#[derive(Debug, Clone)]
pub enum OperDbChange {
    AddVn(Arc<VirtualNetwork>),
    DelVn(VnId),
    AddSg(Arc<SecurityGroup>),
    DelSg(SgId),
    AddInterface(Interface),
    ModInterface(Interface),
    DelInterface(IfIndex),
    SetInterfaceActive(IfIndex, bool),
    AddVrf(VrfId, String, Option<VnId>),
    DelVrf(VrfId),
    AddRoute(VrfId, Route),
    DelRoute(VrfId, IpNet),
    AddL2Route(VrfId, MacAddr, Route),
    DelL2Route(VrfId, MacAddr),
    AddNextHop(NextHop),
    DelNextHop(NextHopId),
}

#[derive(Clone, Debug)]
pub struct OperDb {
    vns: HashMap<VnId, Arc<VirtualNetwork>, RandomState>,
    sgs: HashMap<SgId, Arc<SecurityGroup>, RandomState>,
    interfaces: IfTable,
    vrfs: HashMap<VrfId, Vrf, RandomState>,
    nexthops: NhTable,
    generation: u64,
}

#[allow(clippy::new_without_default)]
impl OperDb {
    #[must_use]
    pub fn new() -> Self {
        Self {
            vns: HashMap::with_hasher(RandomState::with_seed(0)),
            sgs: HashMap::with_hasher(RandomState::with_seed(0)),
            interfaces: IfTable::new(),
            vrfs: HashMap::with_hasher(RandomState::with_seed(0)),
            nexthops: NhTable::new(),
            generation: 0,
        }
    }

    /// Number of changes applied so far
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn vn(&self, id: &VnId) -> Option<&Arc<VirtualNetwork>> {
        self.vns.get(id)
    }

    #[must_use]
    pub fn vn_by_name(&self, name: &str) -> Option<&Arc<VirtualNetwork>> {
        self.vns.values().find(|vn| vn.name == name)
    }

    #[must_use]
    pub fn sg(&self, id: SgId) -> Option<&Arc<SecurityGroup>> {
        self.sgs.get(&id)
    }

    #[must_use]
    pub fn interface(&self, ifindex: IfIndex) -> Option<&Interface> {
        self.interfaces.get_interface(ifindex)
    }

    #[must_use]
    pub fn interfaces(&self) -> &IfTable {
        &self.interfaces
    }

    #[must_use]
    pub fn vrf(&self, id: VrfId) -> Option<&Vrf> {
        self.vrfs.get(&id)
    }

    #[must_use]
    pub fn vrf_by_name(&self, name: &str) -> Option<&Vrf> {
        self.vrfs.values().find(|vrf| vrf.name == name)
    }

    #[must_use]
    pub fn nexthop(&self, id: NextHopId) -> Option<&NextHop> {
        self.nexthops.get(id)
    }

    #[must_use]
    pub fn nexthops(&self) -> &NhTable {
        &self.nexthops
    }

    /// Unicast route for `addr` in vrf `vrf`
    #[must_use]
    pub fn uc_route(&self, vrf: VrfId, addr: IpAddr) -> Option<&Route> {
        self.vrf(vrf).and_then(|v| v.uc_route(addr))
    }

    /// Active nexthop of the unicast route for `addr` in vrf `vrf`
    #[must_use]
    pub fn uc_route_nh(&self, vrf: VrfId, addr: IpAddr) -> Option<&NextHop> {
        self.uc_route(vrf, addr)
            .and_then(Route::active_nh)
            .and_then(|nh| self.nexthop(nh))
    }

    fn vrf_mut(&mut self, id: VrfId) -> Result<&mut Vrf, OperError> {
        self.vrfs.get_mut(&id).ok_or(OperError::NoSuchVrf(id))
    }

    /// Apply a single change.
    pub fn apply(&mut self, change: OperDbChange) -> Result<(), OperError> {
        match change {
            OperDbChange::AddVn(vn) => {
                debug!("Adding virtual network {} ({})", vn.name, vn.id);
                self.vns.insert(vn.id, vn);
            }
            OperDbChange::DelVn(id) => {
                self.vns.remove(&id).ok_or(OperError::NoSuchVn(id))?;
            }
            OperDbChange::AddSg(sg) => {
                self.sgs.insert(sg.id, sg);
            }
            OperDbChange::DelSg(id) => {
                self.sgs.remove(&id).ok_or(OperError::NoSuchSg(id))?;
            }
            OperDbChange::AddInterface(iface) => self.interfaces.add_interface(iface)?,
            OperDbChange::ModInterface(iface) => self.interfaces.mod_interface(iface)?,
            OperDbChange::DelInterface(ifindex) => self.interfaces.del_interface(ifindex),
            OperDbChange::SetInterfaceActive(ifindex, active) => {
                if !self.interfaces.contains(ifindex) {
                    return Err(OperError::NoSuchInterface(ifindex));
                }
                self.interfaces.set_iface_active(ifindex, active);
            }
            OperDbChange::AddVrf(id, name, vn) => {
                if let Some(other) = self.vrf_by_name(&name)
                    && other.id != id
                {
                    return Err(OperError::VrfNameInUse(name, other.id));
                }
                let mut vrf = Vrf::new(id, &name);
                vrf.vn = vn;
                if let Some(old) = self.vrfs.insert(id, vrf) {
                    warn!("Replaced vrf {} ({id}): its routes are gone", old.name);
                }
            }
            OperDbChange::DelVrf(id) => {
                self.vrfs.remove(&id).ok_or(OperError::NoSuchVrf(id))?;
            }
            OperDbChange::AddRoute(vrf, route) => self.vrf_mut(vrf)?.add_route(route),
            OperDbChange::DelRoute(vrf, prefix) => {
                self.vrf_mut(vrf)?.del_route(prefix);
            }
            OperDbChange::AddL2Route(vrf, mac, route) => self.vrf_mut(vrf)?.add_l2_route(mac, route),
            OperDbChange::DelL2Route(vrf, mac) => {
                self.vrf_mut(vrf)?.del_l2_route(mac);
            }
            OperDbChange::AddNextHop(nh) => self.nexthops.add(nh)?,
            OperDbChange::DelNextHop(id) => {
                self.nexthops.del(id).ok_or(OperError::NoSuchNextHop(id))?;
            }
        }
        self.generation += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::interface::VmInterface;
    use crate::route::RoutePath;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    #[test]
    fn test_oper_db_apply() {
        let mut db = OperDb::new();
        let vn_id = Uuid::from_u128(1);
        db.apply(OperDbChange::AddVn(Arc::new(
            VirtualNetwork::new(vn_id, "app").with_vrf(1),
        )))
        .unwrap();
        db.apply(OperDbChange::AddVrf(1, "app-vrf".into(), Some(vn_id))).unwrap();
        assert_eq!(
            db.apply(OperDbChange::AddVrf(2, "app-vrf".into(), None)),
            Err(OperError::VrfNameInUse("app-vrf".into(), 1))
        );
        let vmi = VmInterface::new(vn_id, 1, MacAddr([2, 0, 0, 0, 0, 5]), "10.0.0.5".parse().unwrap());
        db.apply(OperDbChange::AddInterface(Interface::vm(5, "tap5", vmi))).unwrap();
        db.apply(OperDbChange::AddNextHop(NextHop::interface(50, 5))).unwrap();
        db.apply(OperDbChange::AddRoute(
            1,
            Route::inet("10.0.0.5/32".parse().unwrap(), RoutePath::new(50, "app")),
        ))
        .unwrap();
        assert_eq!(
            db.apply(OperDbChange::AddRoute(
                9,
                Route::inet("10.0.0.5/32".parse().unwrap(), RoutePath::new(50, "app")),
            )),
            Err(OperError::NoSuchVrf(9))
        );

        assert_eq!(db.generation(), 5);
        assert_eq!(db.vn_by_name("app").map(|vn| vn.id), Some(vn_id));
        assert_eq!(db.vrf_by_name("app-vrf").map(|v| v.id), Some(1));
        assert_eq!(db.uc_route_nh(1, "10.0.0.5".parse().unwrap()).map(|nh| nh.id), Some(50));
        assert!(db.interface(5).unwrap().is_vm());

        db.apply(OperDbChange::DelVrf(1)).unwrap();
        assert!(db.uc_route(1, "10.0.0.5".parse().unwrap()).is_none());
        assert_eq!(db.apply(OperDbChange::DelVn(Uuid::from_u128(2))), Err(OperError::NoSuchVn(Uuid::from_u128(2))));
    }
}
