// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Index of the objects each flow pair was evaluated against

use crate::event::DbChange;
use acl::{AclId, VrfId};
use ahash::RandomState;
use flow_entry::{FlowEntry, FlowIndex, MatchPolicy};
use routing::{IfIndex, NextHopId, VnId};
use std::collections::{BTreeSet, HashMap};

#[allow(unused)]
use tracing::{debug, trace};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Dependency {
    Vn(VnId),
    Interface(IfIndex),
    Acl(AclId),
    Vrf(VrfId),
    NextHop(NextHopId),
}

impl From<&DbChange> for Dependency {
    fn from(change: &DbChange) -> Self {
        match *change {
            DbChange::Vn(id) => Dependency::Vn(id),
            DbChange::Acl(id) => Dependency::Acl(id),
            DbChange::Interface(ifindex) | DbChange::InterfaceDeleted(ifindex) => {
                Dependency::Interface(ifindex)
            }
            DbChange::Vrf(id) | DbChange::VrfDeleted(id) => Dependency::Vrf(id),
            DbChange::NextHop(id) => Dependency::NextHop(id),
        }
    }
}

fn acls_of(mp: &MatchPolicy) -> impl Iterator<Item = AclId> + '_ {
    let lists = [
        &mp.m_acl_l,
        &mp.m_out_acl_l,
        &mp.m_mirror_acl_l,
        &mp.m_out_mirror_acl_l,
        &mp.m_vrf_assign_acl_l,
    ];
    let sessions = [&mp.sg_policy, &mp.aps_policy, &mp.fwaas_policy];
    lists
        .into_iter()
        .chain(sessions.into_iter().flat_map(|sp| {
            [
                &sp.acl_l,
                &sp.out_acl_l,
                &sp.reverse_acl_l,
                &sp.reverse_out_acl_l,
            ]
        }))
        .flat_map(|list| list.iter().map(|params| params.acl.id))
}

fn dependencies_of(flow: &FlowEntry, deps: &mut BTreeSet<Dependency>) {
    let data = &flow.data;
    let mut add = |dep| {
        deps.insert(dep);
    };
    if let Some(vn) = data.vn {
        add(Dependency::Vn(vn));
    }
    if let Some(intf) = data.intf {
        add(Dependency::Interface(intf));
    }
    add(Dependency::Vrf(flow.key().vrf));
    add(Dependency::Vrf(data.dest_vrf));
    if let Some(vrf) = data.acl_assigned_vrf {
        add(Dependency::Vrf(vrf));
    }
    for nh in [data.rpf.rpf_nh, data.rpf.src_ip_nh, data.rpf.ecmp_rpf_nh].into_iter().flatten() {
        add(Dependency::NextHop(nh));
    }
    for acl in acls_of(&data.match_p) {
        add(Dependency::Acl(acl));
    }
}

/// Flow pairs by the objects they depend on. Pairs are keyed by the index of
/// their forward flow; the dependencies of both flows are merged.
#[derive(Debug)]
pub struct DependencyIndex {
    by_dep: HashMap<Dependency, BTreeSet<FlowIndex>, RandomState>,
    by_flow: HashMap<FlowIndex, BTreeSet<Dependency>, RandomState>,
}

impl Default for DependencyIndex {
    fn default() -> Self {
        Self {
            by_dep: HashMap::with_hasher(RandomState::with_seed(0)),
            by_flow: HashMap::with_hasher(RandomState::with_seed(0)),
        }
    }
}

impl DependencyIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_flow.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_flow.is_empty()
    }

    //////////////////////////////////////////////////////////////////
    /// (Re)index the pair whose forward flow is at `idx`. Evaluation may
    /// have changed what the pair depends on, so stale links are dropped.
    //////////////////////////////////////////////////////////////////
    pub fn update(&mut self, idx: FlowIndex, flow: &FlowEntry, rflow: Option<&FlowEntry>) {
        let mut deps = BTreeSet::new();
        dependencies_of(flow, &mut deps);
        if let Some(rflow) = rflow {
            dependencies_of(rflow, &mut deps);
        }
        self.remove(idx);
        for dep in &deps {
            self.by_dep.entry(*dep).or_default().insert(idx);
        }
        trace!("Flow {} depends on {} objects", flow.key(), deps.len());
        self.by_flow.insert(idx, deps);
    }

    pub fn remove(&mut self, idx: FlowIndex) {
        let Some(deps) = self.by_flow.remove(&idx) else {
            return;
        };
        for dep in deps {
            if let Some(flows) = self.by_dep.get_mut(&dep) {
                flows.remove(&idx);
                if flows.is_empty() {
                    self.by_dep.remove(&dep);
                }
            }
        }
    }

    /// Forward flows depending on the object `change` is about, in index order
    #[must_use]
    pub fn dependents(&self, change: &DbChange) -> Vec<FlowIndex> {
        self.by_dep
            .get(&Dependency::from(change))
            .map(|flows| flows.iter().copied().collect())
            .unwrap_or_default()
    }
}
