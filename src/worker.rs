//! C6: the execution engine. One [`Worker`] per OS thread walks the
//! lowered primitive graph, pulling from the input partitions it owns,
//! draining its exchange inbox, firing due timers, and writing to the
//! sink partitions it owns — until every source is exhausted and no
//! timer remains.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::instrument;

use crate::clock::now_millis;
use crate::dataflow::{Dataflow, NodeId, PortId, StepId};
use crate::errors::{ItemShape, RunError};
use crate::exchange::ExchangeFabric;
use crate::io::{SinkPartition, SourcePartition};
use crate::item::{as_keyed, keyed, Item};
use crate::operators::OpPayload;
use crate::render::resolve_stream_ids;
use crate::state::StateManager;
use crate::timers::TimerHeap;

/// The lowered dataflow plus the runtime routing table every worker
/// shares read-only: for each primitive output port, the primitive
/// nodes downstream of it.
pub struct ExecutionGraph {
    pub flow: Dataflow,
    forward: HashMap<PortId, Vec<NodeId>>,
}

impl ExecutionGraph {
    pub fn build(flow: Dataflow) -> Self {
        let resolved = resolve_stream_ids(&flow);
        let mut forward: HashMap<PortId, Vec<NodeId>> = HashMap::new();
        for node in flow.nodes() {
            if !node.is_primitive() {
                continue;
            }
            for port in &node.inp_ports {
                for src in resolved.get(&port.port_id).cloned().unwrap_or_default() {
                    forward.entry(src).or_default().push(node.id);
                }
            }
        }
        ExecutionGraph { flow, forward }
    }

    fn out_port_id(&self, node: NodeId) -> Option<PortId> {
        self.flow.node(node).out_ports.first().map(|p| p.port_id.clone())
    }
}

/// One worker's share of the dataflow's external partitions and
/// per-key state. Not shared across threads — each worker is built and
/// driven entirely on its own OS thread.
pub struct Worker {
    graph: Arc<ExecutionGraph>,
    worker_index: usize,
    worker_count: usize,
    exchange: Arc<ExchangeFabric>,
    state: StateManager,
    timers: TimerHeap,
    sources: HashMap<NodeId, Vec<Box<dyn SourcePartition>>>,
    sinks: HashMap<NodeId, Box<dyn SinkPartition>>,
    source_eof: HashSet<NodeId>,
}

impl Worker {
    pub fn new(
        graph: Arc<ExecutionGraph>,
        worker_index: usize,
        worker_count: usize,
        exchange: Arc<ExchangeFabric>,
    ) -> Self {
        let mut sources: HashMap<NodeId, Vec<Box<dyn SourcePartition>>> = HashMap::new();
        let mut sinks: HashMap<NodeId, Box<dyn SinkPartition>> = HashMap::new();

        for node in graph.flow.nodes() {
            if !node.is_primitive() {
                continue;
            }
            match (node.op_type.as_str(), graph.flow.payload(node.id)) {
                ("input", Some(OpPayload::Input(source))) => {
                    let mut parts = Vec::new();
                    for key in source.list_parts() {
                        if crate::exchange::worker_for_key(&key, worker_count) == worker_index {
                            parts.push(source.build_part(&key, None));
                        }
                    }
                    sources.insert(node.id, parts);
                }
                ("output", Some(OpPayload::Output(sink))) => {
                    sinks.insert(node.id, sink.build(worker_index, worker_count));
                }
                _ => {}
            }
        }

        Worker {
            graph,
            worker_index,
            worker_count,
            exchange,
            state: StateManager::new(),
            timers: TimerHeap::new(),
            sources,
            sinks,
            source_eof: HashSet::new(),
        }
    }

    #[instrument(skip(self), fields(worker = self.worker_index))]
    pub fn run(&mut self) -> Result<(), RunError> {
        loop {
            let mut progress = false;

            let source_nodes: Vec<NodeId> = self.sources.keys().copied().collect();
            for node in source_nodes {
                let batch: Vec<Item> = {
                    let parts = self.sources.get_mut(&node).expect("present");
                    parts.iter_mut().flat_map(|p| p.next_batch()).collect()
                };
                if !batch.is_empty() {
                    progress = true;
                    for item in batch {
                        self.propagate(node, item)?;
                    }
                }
                if !self.source_eof.contains(&node) {
                    let all_eof = self.sources[&node].iter().all(|p| p.is_eof());
                    if all_eof {
                        self.source_eof.insert(node);
                        progress = true;
                    }
                }
            }

            while let Ok(msg) = self.exchange.receiver(self.worker_index).try_recv() {
                progress = true;
                self.propagate(msg.node, msg.item)?;
            }

            let now = now_millis();
            let due = self.timers.drain_due(now);
            if !due.is_empty() {
                progress = true;
            }
            for (step_id, key) in due {
                let node = self.node_for_step_id(&step_id);
                let emissions = self
                    .state
                    .step(&step_id)
                    .map(|s| s.on_notify(&key, now))
                    .transpose()?
                    .unwrap_or_default();
                let next = self.state.step(&step_id).and_then(|s| s.notify_at(&key));
                if let Some(at) = next {
                    self.timers.schedule(at, step_id.clone(), key.clone());
                }
                if let Some(node) = node {
                    for e in emissions {
                        self.propagate(node, keyed(key.clone(), e))?;
                    }
                }
            }

            if !progress {
                let all_sources_done = self.sources.keys().all(|n| self.source_eof.contains(n));
                if all_sources_done && self.timers.is_empty() {
                    break;
                }
                std::thread::yield_now();
            }
        }

        self.drain_remaining_state()?;
        for sink in self.sinks.values_mut() {
            sink.close();
        }
        for parts in self.sources.values_mut() {
            for p in parts.iter_mut() {
                p.close();
            }
        }
        Ok(())
    }

    fn drain_remaining_state(&mut self) -> Result<(), RunError> {
        let step_ids: Vec<StepId> = self.state.steps().map(|(id, _)| id.clone()).collect();
        for step_id in step_ids {
            let node = self.node_for_step_id(&step_id);
            let fired = self.state.step(&step_id).expect("just listed").on_eof_all()?;
            if let Some(node) = node {
                for (key, emissions) in fired {
                    for e in emissions {
                        self.propagate(node, keyed(key.clone(), e))?;
                    }
                }
            }
        }
        Ok(())
    }

    fn propagate(&mut self, node: NodeId, item: Item) -> Result<(), RunError> {
        let Some(port_id) = self.graph.out_port_id(node) else {
            return Ok(());
        };
        let consumers = self.graph.forward.get(&port_id).cloned().unwrap_or_default();
        for consumer in consumers {
            self.execute(consumer, item.clone())?;
        }
        Ok(())
    }

    fn execute(&mut self, node: NodeId, item: Item) -> Result<(), RunError> {
        let step_id = self.graph.flow.node(node).step_id.clone();
        let op_type = self.graph.flow.node(node).op_type.clone();
        match op_type.as_str() {
            "flat_map" => {
                let f = match self.graph.flow.payload(node) {
                    Some(OpPayload::FlatMap(f)) => f.clone(),
                    _ => unreachable!("flat_map node without FlatMap payload"),
                };
                for out in f(item) {
                    self.propagate(node, out)?;
                }
            }
            "inspect" => {
                if let Some(OpPayload::Inspect(f)) = self.graph.flow.payload(node) {
                    f(&item);
                }
                self.propagate(node, item)?;
            }
            "key_assert" => {
                if as_keyed(&item).is_none() {
                    return Err(RunError::TypeMismatch {
                        step_id,
                        shape: ItemShape(item.shape()),
                    });
                }
                self.propagate(node, item)?;
            }
            "_noop" => {
                self.propagate(node, item)?;
            }
            "unary" => self.dispatch_unary(node, &step_id, item)?,
            "exchange" => {
                if as_keyed(&item).is_none() {
                    return Err(RunError::TypeMismatch {
                        step_id,
                        shape: ItemShape(item.shape()),
                    });
                }
                self.exchange.send(node, item);
            }
            "output" => {
                if let Some(sink) = self.sinks.get_mut(&node) {
                    sink.write_batch(&[item]);
                }
            }
            other => unreachable!("unexpected primitive op_type {other:?} at runtime"),
        }
        Ok(())
    }

    fn dispatch_unary(&mut self, node: NodeId, step_id: &StepId, item: Item) -> Result<(), RunError> {
        let (key, value) = as_keyed(&item).cloned().ok_or_else(|| RunError::TypeMismatch {
            step_id: step_id.clone(),
            shape: ItemShape(item.shape()),
        })?;

        if self.state.step(step_id).is_none() {
            if let Some(OpPayload::Unary(builder)) = self.graph.flow.payload(node) {
                self.state.register(step_id.clone(), builder.clone());
            }
        }

        let now = now_millis();
        let step_state = self.state.step(step_id).expect("registered above");
        let emissions = step_state.on_item(&key, now, value)?;
        if let Some(at) = step_state.notify_at(&key) {
            self.timers.schedule(at, step_id.clone(), key.clone());
        }
        for e in emissions {
            self.propagate(node, keyed(key.clone(), e))?;
        }
        Ok(())
    }

    pub fn worker_index(&self) -> usize {
        self.worker_index
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    fn node_for_step_id(&self, step_id: &StepId) -> Option<NodeId> {
        self.graph
            .flow
            .nodes()
            .iter()
            .find(|n| n.op_type == "unary" && &n.step_id == step_id)
            .map(|n| n.id)
    }

    /// Write every live per-key instance's state to `store` under `epoch`
    /// (§4.7). Does not publish — the caller commits once every worker
    /// in the pool has finished its own write pass.
    pub fn snapshot_into(&self, store: &dyn crate::recovery::SnapshotStore, epoch: u64) {
        for (step_id, step_state) in self.state.steps() {
            for (key, value) in step_state.snapshot_all() {
                store.write(epoch, step_id, &key, value);
            }
        }
    }

    /// Re-seed this worker's owned keys from `store`'s committed epoch,
    /// before the first call to [`Worker::run`].
    pub fn restore_from(&mut self, store: &dyn crate::recovery::SnapshotStore) {
        for (step_id, key, value) in store.read_committed() {
            if crate::exchange::worker_for_key(&key, self.worker_count) != self.worker_index {
                continue;
            }
            let Some(node) = self.node_for_step_id(&step_id) else {
                continue;
            };
            if self.state.step(&step_id).is_none() {
                if let Some(OpPayload::Unary(builder)) = self.graph.flow.payload(node) {
                    self.state.register(step_id.clone(), builder.clone());
                }
            }
            if let Some(step_state) = self.state.step(&step_id) {
                step_state.restore(&key, value);
            }
        }
    }
}
