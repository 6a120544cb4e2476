// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Routes and per-vrf route tables

use crate::nexthop::NextHopId;
use crate::vn::VnId;
use acl::{SgId, TagId, VrfId};
use ahash::RandomState;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use prefix_trie::PrefixMap;
use std::collections::HashMap;
use std::fmt::Display;
use std::net::IpAddr;

#[allow(unused)]
use tracing::{debug, error};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr(pub [u8; 6]);

impl Display for MacAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

/// The active path of a route
#[derive(Clone, Debug, PartialEq)]
pub struct RoutePath {
    pub nh: NextHopId,
    /// Nexthop used for traffic that arrived with the local mpls label
    pub local_nh: Option<NextHopId>,
    pub dest_vn_list: Vec<String>,
    pub sg_list: Vec<SgId>,
    pub tag_list: Vec<TagId>,
}

impl RoutePath {
    #[must_use]
    pub fn new(nh: NextHopId, vn: &str) -> Self {
        Self {
            nh,
            local_nh: None,
            dest_vn_list: vec![vn.to_owned()],
            sg_list: Vec::new(),
            tag_list: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_sgs(mut self, sgs: &[SgId]) -> Self {
        self.sg_list = sgs.to_vec();
        self
    }

    #[must_use]
    pub fn with_tags(mut self, tags: &[TagId]) -> Self {
        self.tag_list = tags.to_vec();
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Route {
    /// `None` for layer-2 routes
    pub prefix: Option<IpNet>,
    pub path: Option<RoutePath>,
    pub multicast: bool,
    pub rpf_invalid: bool,
}

impl Route {
    #[must_use]
    pub fn inet(prefix: IpNet, path: RoutePath) -> Self {
        Self {
            prefix: Some(prefix.trunc()),
            path: Some(path),
            multicast: false,
            rpf_invalid: false,
        }
    }

    #[must_use]
    pub fn bridge(path: RoutePath) -> Self {
        Self {
            prefix: None,
            path: Some(path),
            multicast: false,
            rpf_invalid: false,
        }
    }

    #[must_use]
    pub fn plen(&self) -> u8 {
        self.prefix.map_or(32, |p| p.prefix_len())
    }

    #[must_use]
    pub fn is_host_route(&self) -> bool {
        self.prefix.is_some_and(|p| p.prefix_len() == p.max_prefix_len())
    }

    #[must_use]
    pub fn active_nh(&self) -> Option<NextHopId> {
        self.path.as_ref().map(|p| p.nh)
    }
}

/// A routing instance: an inet table and a bridge table
#[derive(Clone)]
pub struct Vrf {
    pub id: VrfId,
    pub name: String,
    pub vn: Option<VnId>,
    v4: PrefixMap<Ipv4Net, Route>,
    v6: PrefixMap<Ipv6Net, Route>,
    l2: HashMap<MacAddr, Route, RandomState>,
}

impl std::fmt::Debug for Vrf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vrf")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("vn", &self.vn)
            .field("l2", &self.l2.len())
            .finish_non_exhaustive()
    }
}

impl Vrf {
    #[must_use]
    pub fn new(id: VrfId, name: &str) -> Self {
        Self {
            id,
            name: name.to_owned(),
            vn: None,
            v4: PrefixMap::new(),
            v6: PrefixMap::new(),
            l2: HashMap::with_hasher(RandomState::with_seed(0)),
        }
    }

    #[must_use]
    pub fn with_vn(mut self, vn: VnId) -> Self {
        self.vn = Some(vn);
        self
    }

    /// Add or replace an inet route. Bridge routes go through [`Vrf::add_l2_route`].
    pub fn add_route(&mut self, route: Route) {
        match route.prefix {
            Some(IpNet::V4(p)) => {
                self.v4.insert(p.trunc(), route);
            }
            Some(IpNet::V6(p)) => {
                self.v6.insert(p.trunc(), route);
            }
            None => error!("Refusing to add a bridge route to the inet table of {}", self.name),
        }
    }

    pub fn del_route(&mut self, prefix: IpNet) -> Option<Route> {
        match prefix.trunc() {
            IpNet::V4(p) => self.v4.remove(&p),
            IpNet::V6(p) => self.v6.remove(&p),
        }
    }

    pub fn add_l2_route(&mut self, mac: MacAddr, route: Route) {
        self.l2.insert(mac, route);
    }

    pub fn del_l2_route(&mut self, mac: MacAddr) -> Option<Route> {
        self.l2.remove(&mac)
    }

    /// Longest-prefix match of an address in the inet table
    #[must_use]
    pub fn lpm(&self, addr: IpAddr) -> Option<&Route> {
        match addr {
            IpAddr::V4(a) => self.v4.get_lpm(&Ipv4Net::from(a)).map(|(_, r)| r),
            IpAddr::V6(a) => self.v6.get_lpm(&Ipv6Net::from(a)).map(|(_, r)| r),
        }
    }

    /// Route usable for unicast forwarding and RPF checks. Routes flagged as
    /// invalid for RPF are hidden.
    #[must_use]
    pub fn uc_route(&self, addr: IpAddr) -> Option<&Route> {
        self.lpm(addr).filter(|r| !r.rpf_invalid)
    }

    #[must_use]
    pub fn l2_route(&self, mac: MacAddr) -> Option<&Route> {
        self.l2.get(&mac)
    }

    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.v4
            .iter()
            .map(|(_, r)| r)
            .chain(self.v6.iter().map(|(_, r)| r))
            .chain(self.l2.values())
    }
}
