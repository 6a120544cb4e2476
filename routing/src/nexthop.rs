// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Nexthops and the nexthop table

use crate::errors::OperError;
use crate::interfaces::interface::IfIndex;
use acl::VrfId;
use ahash::RandomState;
use std::collections::HashMap;
use std::fmt::Display;
use std::net::IpAddr;

#[allow(unused)]
use tracing::{debug, error};

pub type NextHopId = u32;

/// A member of a composite nexthop. Members may be unresolved.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ComponentNh {
    pub label: u32,
    pub nh: Option<NextHopId>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompositeNh {
    pub members: Vec<ComponentNh>,
}

impl CompositeNh {
    #[must_use]
    pub fn new(members: Vec<ComponentNh>) -> Self {
        Self { members }
    }

    /// Position of a member, comparing label and nexthop
    #[must_use]
    pub fn index_of(&self, component: &ComponentNh) -> Option<usize> {
        self.members.iter().position(|m| m == component)
    }

    /// Position of the first member whose nexthop is `nh`, whatever its label
    #[must_use]
    pub fn index_of_nh(&self, nh: NextHopId) -> Option<usize> {
        self.members.iter().position(|m| m.nh == Some(nh))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum NextHopKind {
    Interface { ifindex: IfIndex },
    Tunnel { dip: IpAddr, vrf: VrfId },
    Composite(CompositeNh),
    Discard,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NextHop {
    pub id: NextHopId,
    pub kind: NextHopKind,
}

impl NextHop {
    #[must_use]
    pub fn interface(id: NextHopId, ifindex: IfIndex) -> Self {
        Self {
            id,
            kind: NextHopKind::Interface { ifindex },
        }
    }

    #[must_use]
    pub fn tunnel(id: NextHopId, dip: IpAddr, vrf: VrfId) -> Self {
        Self {
            id,
            kind: NextHopKind::Tunnel { dip, vrf },
        }
    }

    #[must_use]
    pub fn composite(id: NextHopId, members: Vec<ComponentNh>) -> Self {
        Self {
            id,
            kind: NextHopKind::Composite(CompositeNh::new(members)),
        }
    }

    #[must_use]
    pub fn discard(id: NextHopId) -> Self {
        Self {
            id,
            kind: NextHopKind::Discard,
        }
    }

    #[must_use]
    pub fn is_composite(&self) -> bool {
        matches!(self.kind, NextHopKind::Composite(_))
    }

    #[must_use]
    pub fn as_composite(&self) -> Option<&CompositeNh> {
        match &self.kind {
            NextHopKind::Composite(comp) => Some(comp),
            _ => None,
        }
    }
}

impl Display for NextHop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            NextHopKind::Interface { ifindex } => write!(f, "nh {} intf:{ifindex}", self.id),
            NextHopKind::Tunnel { dip, vrf } => write!(f, "nh {} tunnel:{dip} vrf:{vrf}", self.id),
            NextHopKind::Composite(comp) => {
                write!(f, "nh {} composite:[", self.id)?;
                for m in &comp.members {
                    match m.nh {
                        Some(nh) => write!(f, " {nh}/{}", m.label)?,
                        None => write!(f, " -/{}", m.label)?,
                    }
                }
                write!(f, " ]")
            }
            NextHopKind::Discard => write!(f, "nh {} discard", self.id),
        }
    }
}

#[derive(Clone, Debug)]
pub struct NhTable {
    by_id: HashMap<NextHopId, NextHop, RandomState>,
}

#[allow(clippy::new_without_default)]
impl NhTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_id: HashMap::with_hasher(RandomState::with_seed(0)),
        }
    }

    #[must_use]
    pub fn get(&self, id: NextHopId) -> Option<&NextHop> {
        self.by_id.get(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Add or replace a nexthop. Members of a composite must be known.
    pub(crate) fn add(&mut self, nh: NextHop) -> Result<(), OperError> {
        if let Some(comp) = nh.as_composite() {
            for member in comp.members.iter().filter_map(|m| m.nh) {
                match self.get(member) {
                    None => return Err(OperError::NoSuchNextHop(member)),
                    Some(m) if m.is_composite() => {
                        return Err(OperError::InvalidNextHop(format!(
                            "composite {} has composite member {member}",
                            nh.id
                        )));
                    }
                    Some(_) => {}
                }
            }
        }
        debug!("Added {nh}");
        self.by_id.insert(nh.id, nh);
        Ok(())
    }

    pub(crate) fn del(&mut self, id: NextHopId) -> Option<NextHop> {
        self.by_id.remove(&id)
    }

    /// Within a composite, find the member that sends to interface `ifindex`.
    #[must_use]
    pub fn member_for_interface(&self, comp: &CompositeNh, ifindex: IfIndex) -> Option<NextHopId> {
        comp.members.iter().filter_map(|m| m.nh).find(|id| {
            matches!(self.get(*id), Some(NextHop { kind: NextHopKind::Interface { ifindex: i }, .. }) if *i == ifindex)
        })
    }

    /// Within a composite, find the member tunnelling towards `dip`.
    #[must_use]
    pub fn member_for_tunnel<'a>(&self, comp: &'a CompositeNh, dip: IpAddr) -> Option<&'a ComponentNh> {
        comp.members.iter().find(|m| {
            m.nh.and_then(|id| self.get(id)).is_some_and(
                |nh| matches!(nh.kind, NextHopKind::Tunnel { dip: d, .. } if d == dip),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_nhtable_composite_members() {
        let mut table = NhTable::new();
        table.add(NextHop::interface(1, 10)).unwrap();
        table.add(NextHop::interface(2, 11)).unwrap();
        let dip = IpAddr::V4(Ipv4Addr::new(192, 168, 0, 2));
        table.add(NextHop::tunnel(3, dip, 0)).unwrap();
        let members = vec![
            ComponentNh { label: 16, nh: Some(1) },
            ComponentNh { label: 17, nh: Some(2) },
            ComponentNh { label: 100, nh: Some(3) },
        ];
        table.add(NextHop::composite(4, members)).unwrap();
        let comp = table.get(4).unwrap().as_composite().unwrap().clone();

        assert_eq!(table.member_for_interface(&comp, 11), Some(2));
        assert_eq!(table.member_for_interface(&comp, 12), None);
        assert_eq!(table.member_for_tunnel(&comp, dip).map(|m| m.label), Some(100));
        assert_eq!(comp.index_of(&ComponentNh { label: 17, nh: Some(2) }), Some(1));
        assert_eq!(comp.index_of(&ComponentNh { label: 18, nh: Some(2) }), None);
        assert_eq!(comp.index_of_nh(3), Some(2));
    }

    #[test]
    fn test_nhtable_rejects_bad_composite() {
        let mut table = NhTable::new();
        assert_eq!(
            table.add(NextHop::composite(5, vec![ComponentNh { label: 1, nh: Some(9) }])),
            Err(OperError::NoSuchNextHop(9))
        );
        table.add(NextHop::composite(6, vec![])).unwrap();
        assert!(matches!(
            table.add(NextHop::composite(7, vec![ComponentNh { label: 1, nh: Some(6) }])),
            Err(OperError::InvalidNextHop(_))
        ));
    }
}
