// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! A flow partition: the flows of one hash partition and the task that owns them

use crate::deps::DependencyIndex;
use crate::errors::FlowMgmtError;
use crate::event::{DbChange, FlowChannelRequest, FlowRequest, FlowResponse, PartitionStats};
use flow_entry::{FlowError, FlowIndex, FlowKey, FlowTable, PendingAction};
use flow_policy::{FlowEngine, PacketInfo, PairDecision};
use routing::{IfIndex, OperDb, OperDbReader};
use std::collections::VecDeque;
use tokio::sync::mpsc::Receiver;

#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

fn pair_decision(table: &FlowTable, idx: FlowIndex) -> Result<PairDecision, FlowError> {
    let fwd_idx = table.forward_of(idx)?;
    let flow = table.get(fwd_idx)?;
    let rflow = match table.reverse_of(fwd_idx)? {
        Some(rev_idx) => Some(table.get(rev_idx)?),
        None => None,
    };
    Ok(PairDecision::new(flow, rflow))
}

/// Flow state of a partition. Only the partition task touches it.
#[derive(Debug)]
pub(crate) struct PartitionState {
    engine: FlowEngine,
    table: FlowTable,
    deps: DependencyIndex,
    /// Work queued per forward flow, coalesced through the flows' pending state
    queue: VecDeque<(FlowIndex, PendingAction)>,
    stats: PartitionStats,
}

impl PartitionState {
    pub(crate) fn new(engine: FlowEngine, capacity: usize) -> Self {
        Self {
            engine,
            table: FlowTable::new(capacity),
            deps: DependencyIndex::new(),
            queue: VecDeque::new(),
            stats: PartitionStats::default(),
        }
    }

    fn index(&mut self, idx: FlowIndex) -> Result<(), FlowError> {
        let fwd_idx = self.table.forward_of(idx)?;
        let (flow, rflow) = self.table.pair_mut(fwd_idx)?;
        self.deps.update(fwd_idx, flow, rflow.as_deref());
        Ok(())
    }

    fn packet(&mut self, db: &OperDb, pkt: &PacketInfo) -> Result<PairDecision, FlowMgmtError> {
        if let Some(idx) = self.table.find(&pkt.key) {
            trace!("Packet of known flow {}", pkt.key);
            return Ok(pair_decision(&self.table, idx)?);
        }
        let (idx, decision) = self.engine.create_pair(db, &mut self.table, pkt)?;
        self.index(idx)?;
        self.stats.created += 1;
        Ok(decision)
    }

    fn audit(
        &mut self,
        db: &OperDb,
        key: FlowKey,
        ifindex: Option<IfIndex>,
    ) -> Result<PairDecision, FlowMgmtError> {
        if let Some(idx) = self.table.find(&key) {
            return Ok(pair_decision(&self.table, idx)?);
        }
        let (idx, decision) = self.engine.create_audit(db, &mut self.table, key, ifindex)?;
        self.index(idx)?;
        self.stats.created += 1;
        Ok(decision)
    }

    /// Record `action` for the pair of `idx`. Returns true if work was queued.
    fn escalate(&mut self, idx: FlowIndex, action: PendingAction) -> Result<bool, FlowError> {
        let fwd_idx = self.table.forward_of(idx)?;
        let flow = self.table.get_mut(fwd_idx)?;
        if flow.pending.escalate(action) {
            self.queue.push_back((fwd_idx, action));
            Ok(true)
        } else {
            self.stats.coalesced += 1;
            Ok(false)
        }
    }

    fn change(&mut self, change: &DbChange) -> usize {
        let action = change.pending_action();
        let mut queued = 0;
        for idx in self.deps.dependents(change) {
            match self.escalate(idx, action) {
                Ok(true) => queued += 1,
                Ok(false) => {}
                Err(e) => warn!("Dependency index refers to a missing flow: {e}"),
            }
        }
        debug!("Change of {change}: {queued} flows need {action}");
        queued
    }

    //////////////////////////////////////////////////////////////////
    /// Carry out the queued work. Entries whose flow is gone or whose work
    /// was superseded by a higher pending action are skipped. Work that fails
    /// is dropped and clears the flow's pending state, so that the next
    /// notification queues it again.
    //////////////////////////////////////////////////////////////////
    pub(crate) fn drain(&mut self, db: Option<&OperDb>) {
        while let Some((idx, action)) = self.queue.pop_front() {
            let Ok(flow) = self.table.get(idx) else {
                trace!("Dropping {action} of deleted flow {idx}");
                continue;
            };
            if !flow.pending.should_process(action) {
                continue;
            }
            if let Err(e) = self.process(db, idx, action) {
                warn!("Failed to {action} flow {idx}: {e}");
                if let Ok(flow) = self.table.get_mut(idx) {
                    flow.pending.complete(action);
                }
            }
        }
    }

    fn process(
        &mut self,
        db: Option<&OperDb>,
        idx: FlowIndex,
        action: PendingAction,
    ) -> Result<(), FlowMgmtError> {
        match action {
            PendingAction::None => Ok(()),
            PendingAction::Delete => {
                self.deps.remove(idx);
                let (flow, _) = self.table.delete_pair(idx)?;
                debug!("Deleted flow {}", flow.key());
                self.stats.deleted += 1;
                Ok(())
            }
            PendingAction::Revaluate | PendingAction::RecomputeDbEntry | PendingAction::Recompute => {
                let db = db.ok_or(FlowMgmtError::NoSnapshot)?;
                let decision = self.engine.evaluate_pair(db, &mut self.table, idx)?;
                self.table.get_mut(idx)?.pending.complete(action);
                self.index(idx)?;
                self.stats.evaluated += 1;
                trace!("{action}: {}", decision.forward);
                Ok(())
            }
        }
    }

    fn recompute(&mut self, db: Option<&OperDb>, key: &FlowKey) -> Result<PairDecision, FlowMgmtError> {
        let idx = self.table.find(key).ok_or(FlowMgmtError::NoSuchFlow(*key))?;
        self.escalate(idx, PendingAction::Recompute)?;
        self.drain(db);
        Ok(pair_decision(&self.table, idx)?)
    }

    fn delete(&mut self, db: Option<&OperDb>, key: &FlowKey) -> bool {
        let Some(idx) = self.table.find(key) else {
            return false;
        };
        if let Err(e) = self.escalate(idx, PendingAction::Delete) {
            warn!("Cannot delete flow {key}: {e}");
            return false;
        }
        self.drain(db);
        !self.table.is_live(idx)
    }

    pub(crate) fn handle(&mut self, db: Option<&OperDb>, request: FlowRequest) -> FlowResponse {
        match request {
            FlowRequest::Packet(pkt) => FlowResponse::Decision(
                db.ok_or(FlowMgmtError::NoSnapshot)
                    .and_then(|db| self.packet(db, &pkt)),
            ),
            FlowRequest::Audit(key, ifindex) => FlowResponse::Decision(
                db.ok_or(FlowMgmtError::NoSnapshot)
                    .and_then(|db| self.audit(db, key, ifindex)),
            ),
            FlowRequest::Recompute(key) => FlowResponse::Decision(self.recompute(db, &key)),
            FlowRequest::Delete(key) => FlowResponse::Deleted(self.delete(db, &key)),
            FlowRequest::Change(change) => FlowResponse::Change(self.change(&change)),
            FlowRequest::Lookup(key) => {
                self.drain(db);
                let decision = self
                    .table
                    .find(&key)
                    .and_then(|idx| pair_decision(&self.table, idx).ok());
                FlowResponse::Lookup(decision)
            }
            FlowRequest::Stats => {
                self.drain(db);
                let mut stats = self.stats;
                stats.flows = self.table.len();
                FlowResponse::Stats(stats)
            }
        }
    }
}

/// A partition task: a reader of the oper db and the flows it owns
pub(crate) struct Partition {
    name: String,
    reader: OperDbReader,
    state: PartitionState,
}

impl Partition {
    pub(crate) fn new(name: String, reader: OperDbReader, state: PartitionState) -> Self {
        Self { name, reader, state }
    }

    fn handle(&mut self, request: FlowRequest) -> FlowResponse {
        let guard = self.reader.enter();
        self.state.handle(guard.as_deref(), request)
    }

    fn drain(&mut self) {
        let guard = self.reader.enter();
        self.state.drain(guard.as_deref());
    }

    //////////////////////////////////////////////////////////////////
    /// Serve requests until every sender is gone. Queued work runs once
    /// the channel is momentarily empty, so that notifications arriving
    /// back to back coalesce on the flows' pending state.
    //////////////////////////////////////////////////////////////////
    pub(crate) async fn run(mut self, mut rx: Receiver<FlowChannelRequest>) {
        info!("Flow partition {} started", self.name);
        while let Some(req) = rx.recv().await {
            let response = self.handle(req.request);
            if req.reply_tx.send(response).is_err() {
                debug!("{}: requester went away", self.name);
            }
            if rx.is_empty() {
                self.drain();
            }
        }
        info!("Flow partition {} stopped", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acl::{Acl, AclEntry, AclMatch, FlowAction, TrafficAction};
    use etherparse::IpNumber;
    use flow_policy::EngineConfig;
    use pretty_assertions::assert_eq;
    use routing::{
        Interface, MacAddr, NextHop, OperDbChange, Route, RoutePath, VirtualNetwork, VmInterface,
    };
    use std::sync::Arc;
    use tracing_test::traced_test;
    use uuid::Uuid;

    fn app_acl(action: TrafficAction) -> Arc<Acl> {
        let entry = AclEntry::new(1, AclMatch::default(), FlowAction::new(action));
        Arc::new(Acl::new(Uuid::from_u128(100), "app-acl", vec![entry]).unwrap())
    }

    fn db() -> (OperDb, Uuid) {
        let mut db = OperDb::new();
        let vn = Uuid::new_v4();
        let changes = vec![
            OperDbChange::AddVn(Arc::new(
                VirtualNetwork::new(vn, "app").with_vrf(1).with_acl(app_acl(TrafficAction::PASS)),
            )),
            OperDbChange::AddVrf(1, "app-vrf".into(), Some(vn)),
            OperDbChange::AddNextHop(NextHop::interface(1, 1)),
            OperDbChange::AddNextHop(NextHop::interface(2, 2)),
            OperDbChange::AddRoute(1, Route::inet("10.0.0.5/32".parse().unwrap(), RoutePath::new(1, "app"))),
            OperDbChange::AddRoute(1, Route::inet("10.0.0.9/32".parse().unwrap(), RoutePath::new(2, "app"))),
            OperDbChange::AddInterface(Interface::vm(
                1,
                "tap1",
                VmInterface::new(vn, 1, MacAddr::default(), "10.0.0.5".parse().unwrap()),
            )),
            OperDbChange::AddInterface(Interface::vm(
                2,
                "tap2",
                VmInterface::new(vn, 1, MacAddr::default(), "10.0.0.9".parse().unwrap()),
            )),
        ];
        for change in changes {
            db.apply(change).unwrap();
        }
        (db, vn)
    }

    fn packet(sport: u16) -> PacketInfo {
        let key = FlowKey::new(
            1,
            IpNumber::TCP,
            "10.0.0.5".parse().unwrap(),
            "10.0.0.9".parse().unwrap(),
            sport,
            80,
        );
        PacketInfo::new(key, 1)
    }

    fn stats(state: &mut PartitionState, db: &OperDb) -> PartitionStats {
        match state.handle(Some(db), FlowRequest::Stats) {
            FlowResponse::Stats(stats) => stats,
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[traced_test]
    #[test]
    fn test_change_reevaluates_dependents() {
        let (mut db, vn) = db();
        let mut state = PartitionState::new(FlowEngine::new(EngineConfig::default()), 64);
        for sport in [1000, 1001] {
            let decision = state.packet(&db, &packet(sport)).unwrap();
            assert_eq!(decision.forward.action, TrafficAction::PASS);
        }
        // known flows are not created twice
        state.packet(&db, &packet(1000)).unwrap();
        assert_eq!(stats(&mut state, &db).created, 2);

        db.apply(OperDbChange::AddVn(Arc::new(
            VirtualNetwork::new(vn, "app").with_vrf(1).with_acl(app_acl(TrafficAction::DENY)),
        )))
        .unwrap();
        // back to back notifications about the same flows coalesce
        assert_eq!(state.change(&DbChange::Vn(vn)), 2);
        assert_eq!(state.change(&DbChange::Acl(Uuid::from_u128(100))), 0);
        assert_eq!(state.queue.len(), 2);
        state.drain(Some(&db));

        let stats = stats(&mut state, &db);
        assert_eq!(stats.evaluated, 2);
        assert_eq!(stats.coalesced, 2);
        let FlowResponse::Lookup(Some(decision)) = state.handle(Some(&db), FlowRequest::Lookup(packet(1000).key)) else {
            panic!("flow is gone");
        };
        assert_eq!(decision.forward.action, TrafficAction::DENY);
    }

    #[traced_test]
    #[test]
    fn test_delete_supersedes_pending_work() {
        let (db, vn) = db();
        let mut state = PartitionState::new(FlowEngine::new(EngineConfig::default()), 64);
        state.packet(&db, &packet(1000)).unwrap();
        assert_eq!(state.change(&DbChange::Vn(vn)), 1);
        assert_eq!(state.change(&DbChange::InterfaceDeleted(2)), 1);
        // an interface change after the delete is absorbed
        assert_eq!(state.change(&DbChange::Interface(1)), 0);
        state.drain(Some(&db));

        let stats = stats(&mut state, &db);
        assert_eq!(stats.flows, 0);
        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.evaluated, 0);
        assert!(state.deps.is_empty());
        assert_eq!(state.change(&DbChange::Vn(vn)), 0);
    }

    #[traced_test]
    #[test]
    fn test_failed_work_does_not_block_later_changes() {
        let (mut db, vn) = db();
        let mut state = PartitionState::new(FlowEngine::new(EngineConfig::default()), 64);
        state.packet(&db, &packet(1000)).unwrap();

        // no snapshot to evaluate against: the work fails
        assert_eq!(state.change(&DbChange::Vn(vn)), 1);
        state.drain(None);
        assert!(state.queue.is_empty());
        assert_eq!(state.stats.evaluated, 0);

        db.apply(OperDbChange::AddVn(Arc::new(
            VirtualNetwork::new(vn, "app").with_vrf(1).with_acl(app_acl(TrafficAction::DENY)),
        )))
        .unwrap();
        assert_eq!(state.change(&DbChange::Vn(vn)), 1);
        state.drain(Some(&db));
        assert_eq!(state.stats.evaluated, 1);
        let FlowResponse::Lookup(Some(decision)) = state.handle(Some(&db), FlowRequest::Lookup(packet(1000).key)) else {
            panic!("flow is gone");
        };
        assert_eq!(decision.forward.action, TrafficAction::DENY);
    }

    #[test]
    fn test_recompute_and_delete_by_key() {
        let (db, _) = db();
        let mut state = PartitionState::new(FlowEngine::new(EngineConfig::default()), 64);
        let created = state.packet(&db, &packet(1000)).unwrap();
        let recomputed = state.recompute(Some(&db), &packet(1000).key).unwrap();
        assert_eq!(created, recomputed);
        assert_eq!(
            state.recompute(Some(&db), &packet(2000).key),
            Err(FlowMgmtError::NoSuchFlow(packet(2000).key))
        );
        // either side of the pair deletes it
        let reverse = recomputed.reverse.unwrap().key;
        assert!(state.delete(Some(&db), &reverse));
        assert!(!state.delete(Some(&db), &packet(1000).key));
        assert!(state.table.is_empty());
    }

    #[test]
    fn test_no_snapshot() {
        let mut state = PartitionState::new(FlowEngine::default(), 64);
        let response = state.handle(None, FlowRequest::Packet(Box::new(packet(1000))));
        assert!(matches!(
            response,
            FlowResponse::Decision(Err(FlowMgmtError::NoSnapshot))
        ));
    }
}
