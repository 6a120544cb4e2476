// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Front end of the flow partitions

use crate::errors::FlowMgmtError;
use crate::event::{DbChange, FlowChannelRequest, FlowRequest, FlowResponse, PartitionStats};
use crate::params::FlowMgmtParams;
use crate::partition::{Partition, PartitionState};
use ahash::RandomState;
use flow_entry::{FlowKey, LinkLocalPorts};
use flow_policy::{EngineConfig, FlowEngine, PacketInfo, PairDecision};
use routing::{IfIndex, OperDbReaderFactory};
use std::hash::BuildHasher;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{Sender, channel};
use tokio::task::JoinHandle;

#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// Spreads flows over partition tasks and forwards requests to them.
///
/// Both directions of a connection hash to the same partition, so a packet of
/// the reverse direction finds the pair its first packet created.
pub struct FlowMgmt {
    partitions: Vec<Sender<FlowChannelRequest>>,
    tasks: Vec<JoinHandle<()>>,
    sweeper: JoinHandle<()>,
    hasher: RandomState,
    ports: LinkLocalPorts,
}

async fn sweep_linklocal(ports: LinkLocalPorts, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        let closed = ports.sweep(Instant::now());
        if closed > 0 {
            trace!("Sweep closed {closed} linklocal sockets");
        }
    }
}

impl FlowMgmt {
    //////////////////////////////////////////////////////////////////
    /// Spawn the partition tasks and the linklocal sweeper on the current
    /// tokio runtime. Each partition reads the oper db through its own
    /// reader handle.
    //////////////////////////////////////////////////////////////////
    pub fn start(
        params: &FlowMgmtParams,
        config: EngineConfig,
        readers: &OperDbReaderFactory,
    ) -> Result<Self, FlowMgmtError> {
        params.validate()?;
        let ports = LinkLocalPorts::new(
            params.linklocal_max,
            params.linklocal_max_per_vm,
            params.linklocal_aging,
        );
        let engine = FlowEngine::new(config).with_linklocal_ports(ports.clone());

        let mut partitions = Vec::with_capacity(params.partitions);
        let mut tasks = Vec::with_capacity(params.partitions);
        for id in 0..params.partitions {
            let name = format!("{}-{id}", params.name_prefix);
            let (tx, rx) = channel(params.queue_depth);
            let state = PartitionState::new(engine.clone(), params.table_capacity);
            let partition = Partition::new(name, readers.handle(), state);
            tasks.push(tokio::spawn(partition.run(rx)));
            partitions.push(tx);
        }
        let sweeper = tokio::spawn(sweep_linklocal(ports.clone(), params.sweep_interval));
        info!("Started {} flow partitions", params.partitions);
        Ok(Self {
            partitions,
            tasks,
            sweeper,
            hasher: RandomState::with_seed(0),
            ports,
        })
    }

    #[must_use]
    pub fn partitions(&self) -> usize {
        self.partitions.len()
    }

    #[must_use]
    pub fn linklocal_ports(&self) -> &LinkLocalPorts {
        &self.ports
    }

    /// Partition owning the connection `key` belongs to
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn partition_of(&self, key: &FlowKey) -> usize {
        let a = (key.src_addr, key.src_port);
        let b = (key.dst_addr, key.dst_port);
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let hash = self.hasher.hash_one((key.protocol, lo, hi));
        (hash % self.partitions.len() as u64) as usize
    }

    async fn request(&self, id: usize, request: FlowRequest) -> Result<FlowResponse, FlowMgmtError> {
        let tx = self.partitions.get(id).ok_or(FlowMgmtError::ChannelClosed(id))?;
        let (req, rx) = FlowChannelRequest::new(request);
        tx.send(req).await.map_err(|_| FlowMgmtError::ChannelClosed(id))?;
        rx.await.map_err(|_| FlowMgmtError::NoReply(id))
    }

    async fn decision(&self, key: &FlowKey, request: FlowRequest) -> Result<PairDecision, FlowMgmtError> {
        match self.request(self.partition_of(key), request).await? {
            FlowResponse::Decision(decision) => decision,
            other => unreachable!("unexpected response {other:?}"),
        }
    }

    /// Decide the flow pair of a packet, creating it on its first packet
    pub async fn packet(&self, pkt: PacketInfo) -> Result<PairDecision, FlowMgmtError> {
        let key = pkt.key;
        self.decision(&key, FlowRequest::Packet(Box::new(pkt))).await
    }

    /// Take over a flow the dataplane has and the agent does not
    pub async fn audit(
        &self,
        key: FlowKey,
        ifindex: Option<IfIndex>,
    ) -> Result<PairDecision, FlowMgmtError> {
        self.decision(&key, FlowRequest::Audit(key, ifindex)).await
    }

    pub async fn recompute(&self, key: FlowKey) -> Result<PairDecision, FlowMgmtError> {
        self.decision(&key, FlowRequest::Recompute(key)).await
    }

    /// Delete the pair `key` belongs to. Returns false if there was none.
    pub async fn delete(&self, key: FlowKey) -> Result<bool, FlowMgmtError> {
        match self.request(self.partition_of(&key), FlowRequest::Delete(key)).await? {
            FlowResponse::Deleted(deleted) => Ok(deleted),
            other => unreachable!("unexpected response {other:?}"),
        }
    }

    pub async fn lookup(&self, key: FlowKey) -> Result<Option<PairDecision>, FlowMgmtError> {
        match self.request(self.partition_of(&key), FlowRequest::Lookup(key)).await? {
            FlowResponse::Lookup(decision) => Ok(decision),
            other => unreachable!("unexpected response {other:?}"),
        }
    }

    //////////////////////////////////////////////////////////////////
    /// Tell every partition that an object changed. Returns how many flow
    /// pairs got new work queued; pairs with equal or higher work already
    /// pending are not counted.
    //////////////////////////////////////////////////////////////////
    pub async fn notify(&self, change: DbChange) -> Result<usize, FlowMgmtError> {
        let mut queued = 0;
        for id in 0..self.partitions.len() {
            match self.request(id, FlowRequest::Change(change)).await? {
                FlowResponse::Change(n) => queued += n,
                other => unreachable!("unexpected response {other:?}"),
            }
        }
        debug!("Change of {change} queued work for {queued} flows");
        Ok(queued)
    }

    pub async fn stats(&self) -> Result<Vec<PartitionStats>, FlowMgmtError> {
        let mut stats = Vec::with_capacity(self.partitions.len());
        for id in 0..self.partitions.len() {
            match self.request(id, FlowRequest::Stats).await? {
                FlowResponse::Stats(s) => stats.push(s),
                other => unreachable!("unexpected response {other:?}"),
            }
        }
        Ok(stats)
    }

    /// Stop the partitions once they served what is queued. Their flows are dropped.
    pub async fn shutdown(self) {
        self.sweeper.abort();
        drop(self.partitions);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Flow partition task failed: {e}");
            }
        }
        info!("Flow partitions stopped");
    }
}
