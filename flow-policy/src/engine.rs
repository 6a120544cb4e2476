// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Creation and re-evaluation of flow pairs

use crate::builder::{FlowBuilder, PacketInfo};
use crate::config::EngineConfig;
use crate::decision::PairDecision;
use crate::gather::get_policy_info;
use crate::policy::{PolicyContext, action_recompute, do_policy, update_reflexive_action};
use crate::rpf::{rpf_init, rpf_update, update_ecmp_info, update_rpf};
use flow_entry::{FlowEntry, FlowError, FlowFlags, FlowIndex, FlowKey, FlowTable, LinkLocalPorts, ShortReason};
use routing::{IfIndex, OperDb};

#[allow(unused)]
use tracing::{debug, info, trace, warn};

/// The flow decision engine. Holds no flow state: flows live in the
/// [`FlowTable`] of the caller and the configuration snapshot is passed in
/// with every call.
#[derive(Debug, Clone, Default)]
pub struct FlowEngine {
    config: EngineConfig,
    ports: Option<LinkLocalPorts>,
}

impl FlowEngine {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            ports: None,
        }
    }

    #[must_use]
    pub fn with_linklocal_ports(mut self, ports: LinkLocalPorts) -> Self {
        self.ports = Some(ports);
        self
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn linklocal_ports(&self) -> Option<&LinkLocalPorts> {
        self.ports.as_ref()
    }

    fn builder<'a>(&'a self, db: &'a OperDb) -> FlowBuilder<'a> {
        let builder = FlowBuilder::new(db, &self.config);
        match &self.ports {
            Some(ports) => builder.with_linklocal_ports(ports),
            None => builder,
        }
    }

    //////////////////////////////////////////////////////////////////
    /// Create the flow pair of a first packet, insert it in `table` and
    /// evaluate it.
    //////////////////////////////////////////////////////////////////
    pub fn create_pair(
        &self,
        db: &OperDb,
        table: &mut FlowTable,
        pkt: &PacketInfo,
    ) -> Result<(FlowIndex, PairDecision), FlowError> {
        let (fwd, rev) = self.builder(db).build(pkt, table);
        let (idx, _) = table.insert_pair(fwd, rev)?;
        let decision = self.evaluate_pair(db, table, idx)?;
        debug!("New flow {}", decision.forward);
        Ok((idx, decision))
    }

    /// Insert a short flow for a dataplane entry the agent does not know
    pub fn create_audit(
        &self,
        db: &OperDb,
        table: &mut FlowTable,
        key: FlowKey,
        ifindex: Option<IfIndex>,
    ) -> Result<(FlowIndex, PairDecision), FlowError> {
        let flow = self.builder(db).build_audit(key, ifindex);
        let (idx, _) = table.insert_pair(flow, None)?;
        let decision = self.evaluate_pair(db, table, idx)?;
        Ok((idx, decision))
    }

    /// A dependency the flow was built on is gone. The flow is about to be
    /// deleted and is left as it is.
    fn lost_dependency(db: &OperDb, flow: &FlowEntry) -> bool {
        let data = &flow.data;
        data.vn.is_some_and(|vn| db.vn(&vn).is_none())
            || data.intf.is_some_and(|i| db.interface(i).is_none())
            || data.rpf.rpf_nh.is_some_and(|nh| db.nexthop(nh).is_none())
    }

    //////////////////////////////////////////////////////////////////
    /// Re-evaluate both flows of the pair `idx` belongs to against `db`.
    ///
    /// Rule lists are rebuilt for both flows. The reverse flow is evaluated
    /// first, then the forward flow, after which the reverse flow takes over
    /// the reflexive verdicts of the forward one. Reverse path checks are
    /// resolved last since vrf translation may have moved a source lookup.
    //////////////////////////////////////////////////////////////////
    pub fn evaluate_pair(
        &self,
        db: &OperDb,
        table: &mut FlowTable,
        idx: FlowIndex,
    ) -> Result<PairDecision, FlowError> {
        let fwd_idx = table.forward_of(idx)?;
        let (flow, mut rflow) = table.pair_mut(fwd_idx)?;

        if Self::lost_dependency(db, flow) {
            debug!("Flow {} lost a dependency, not updating", flow.key());
            return Ok(PairDecision::new(flow, rflow.as_deref()));
        }
        let pctx = PolicyContext::new(db, &self.config);
        let mut short = None;

        if flow.is_set(FlowFlags::UNKNOWN_UNICAST_FLOOD)
            && !pctx.vn(flow).is_some_and(|vn| vn.flood_unknown_unicast)
        {
            short = Some(ShortReason::NoDstRoute);
        }
        short = short.or(rpf_init(db, flow));
        if let Some(rflow) = rflow.as_deref_mut() {
            short = short.or(rpf_init(db, rflow));
        }
        if let Some(reason) = short {
            make_short(flow, rflow.as_deref_mut(), reason);
        }

        get_policy_info(db, flow, rflow.as_deref());
        if let Some(rflow) = rflow.as_deref_mut() {
            get_policy_info(db, rflow, Some(&*flow));
            update_rpf(db, rflow);
            short = short.or(do_policy(&pctx, rflow, Some(&*flow)));
        }

        update_rpf(db, flow);
        short = short.or(do_policy(&pctx, flow, rflow.as_deref()));

        if let Some(rflow) = rflow.as_deref_mut() {
            update_reflexive_action(&mut rflow.data.match_p, Some(&*flow));
            action_recompute(rflow);
            update_ecmp_info(db, flow, rflow);
            update_ecmp_info(db, rflow, flow);
        }

        if let Some(reason) = short {
            make_short(flow, rflow.as_deref_mut(), reason);
            action_recompute(flow);
            if let Some(rflow) = rflow.as_deref_mut() {
                action_recompute(rflow);
            }
        }

        rpf_update(db, flow, rflow.as_deref());
        if let Some(rflow) = rflow.as_deref_mut() {
            rpf_update(db, rflow, Some(&*flow));
        }

        let decision = PairDecision::new(flow, rflow.as_deref());
        trace!("Evaluated {}", decision.forward);
        Ok(decision)
    }
}

/// Short flows come in pairs
fn make_short(flow: &mut FlowEntry, rflow: Option<&mut FlowEntry>, reason: ShortReason) {
    flow.set_short(reason);
    if let Some(rflow) = rflow {
        rflow.set_short(reason);
    }
}
