//! C3: the builder API. High-level combinators instantiate IR nodes and
//! wire ports against a [`Scope`], enforcing unique step names within
//! that scope (§4.2). Compound operators here only record their op_type
//! and payload; the planner (§4.4) performs the actual expansion into
//! primitives.

use std::sync::Arc;

use crate::clock::Clock;
use crate::dataflow::{Dataflow, Direction, NodeId, StreamHandle};
use crate::errors::ConstructionError;
use crate::io::{PartitionedSource, Sink};
use crate::item::Item;
use crate::operators::{
    FilterMapFn, FlatMapFn, InspectFn, KeyFn, MapFn, OpPayload, PredicateFn, ReducerFn,
    StateBuilderFn, StatefulFlatMapperFn, StatefulMapperFn, UnaryLogicBuilder,
};
use crate::window::Assigner;

/// A handle into one scope (a compound step, or the dataflow root) of an
/// in-progress [`Dataflow`]. Every builder method here either creates a
/// primitive leaf step directly, or a compound step whose payload the
/// planner later expands.
pub struct Scope<'a> {
    flow: &'a mut Dataflow,
    current: Option<NodeId>,
}

impl<'a> Scope<'a> {
    pub fn new(flow: &'a mut Dataflow) -> Self {
        Scope { flow, current: None }
    }

    /// Re-enter an existing compound step's scope, e.g. while the
    /// planner is expanding it.
    pub(crate) fn within(flow: &'a mut Dataflow, node: NodeId) -> Self {
        Scope {
            flow,
            current: Some(node),
        }
    }

    pub fn flow(&self) -> &Dataflow {
        self.flow
    }

    pub fn flow_mut(&mut self) -> &mut Dataflow {
        self.flow
    }

    fn new_step(
        &mut self,
        name: &str,
        op_type: &str,
        payload: OpPayload,
    ) -> Result<NodeId, ConstructionError> {
        let node = self.flow.add_step(self.current, name, op_type)?;
        self.flow.set_payload(node, payload);
        Ok(node)
    }

    fn connect_single(
        &mut self,
        node: NodeId,
        port: &str,
        upstream: &StreamHandle,
    ) -> Result<(), ConstructionError> {
        self.flow.connect(node, port, upstream)
    }

    fn out_stream(&self, node: NodeId, port: &str) -> StreamHandle {
        let port_id = self.flow.node(node).port(Direction::Output, port).unwrap().port_id.clone();
        StreamHandle { node, port_id }
    }

    // ---- primitives (C1) ----

    pub fn input(
        &mut self,
        name: &str,
        source: Arc<dyn PartitionedSource>,
    ) -> Result<StreamHandle, ConstructionError> {
        let node = self.new_step(name, "input", OpPayload::Input(source))?;
        self.flow.add_port(node, Direction::Output, "down");
        Ok(self.out_stream(node, "down"))
    }

    pub fn output(
        &mut self,
        name: &str,
        upstream: &StreamHandle,
        sink: Arc<dyn Sink>,
    ) -> Result<(), ConstructionError> {
        let node = self.new_step(name, "output", OpPayload::Output(sink))?;
        self.flow.add_port(node, Direction::Input, "up");
        self.connect_single(node, "up", upstream)
    }

    pub fn flat_map(
        &mut self,
        name: &str,
        upstream: &StreamHandle,
        f: FlatMapFn,
    ) -> Result<StreamHandle, ConstructionError> {
        let node = self.new_step(name, "flat_map", OpPayload::FlatMap(f))?;
        self.flow.add_port(node, Direction::Input, "up");
        self.flow.add_port(node, Direction::Output, "down");
        self.connect_single(node, "up", upstream)?;
        Ok(self.out_stream(node, "down"))
    }

    pub fn inspect(
        &mut self,
        name: &str,
        upstream: &StreamHandle,
        f: InspectFn,
    ) -> Result<StreamHandle, ConstructionError> {
        let node = self.new_step(name, "inspect", OpPayload::Inspect(f))?;
        self.flow.add_port(node, Direction::Input, "up");
        self.flow.add_port(node, Direction::Output, "down");
        self.connect_single(node, "up", upstream)?;
        Ok(self.out_stream(node, "down"))
    }

    pub fn key_assert(
        &mut self,
        name: &str,
        upstream: &StreamHandle,
    ) -> Result<StreamHandle, ConstructionError> {
        let node = self.new_step(name, "key_assert", OpPayload::KeyAssert)?;
        self.flow.add_port(node, Direction::Input, "up");
        self.flow.add_port(node, Direction::Output, "down");
        self.connect_single(node, "up", upstream)?;
        Ok(self.out_stream(node, "down"))
    }

    pub fn noop(
        &mut self,
        name: &str,
        upstream: &StreamHandle,
    ) -> Result<StreamHandle, ConstructionError> {
        let node = self.new_step(name, "_noop", OpPayload::Noop)?;
        self.flow.add_port(node, Direction::Input, "up");
        self.flow.add_port(node, Direction::Output, "down");
        self.connect_single(node, "up", upstream)?;
        Ok(self.out_stream(node, "down"))
    }

    pub fn unary(
        &mut self,
        name: &str,
        upstream: &StreamHandle,
        logic_builder: UnaryLogicBuilder,
    ) -> Result<StreamHandle, ConstructionError> {
        let node = self.new_step(name, "unary", OpPayload::Unary(logic_builder))?;
        self.flow.add_port(node, Direction::Input, "up");
        self.flow.add_port(node, Direction::Output, "down");
        self.connect_single(node, "up", upstream)?;
        Ok(self.out_stream(node, "down"))
    }

    pub fn exchange(
        &mut self,
        name: &str,
        upstream: &StreamHandle,
    ) -> Result<StreamHandle, ConstructionError> {
        let node = self.new_step(name, "exchange", OpPayload::Exchange)?;
        self.flow.add_port(node, Direction::Input, "up");
        self.flow.add_port(node, Direction::Output, "down");
        self.connect_single(node, "up", upstream)?;
        Ok(self.out_stream(node, "down"))
    }

    // ---- compound operators (expanded by the planner, §4.4) ----

    fn compound(
        &mut self,
        name: &str,
        op_type: &str,
        upstream: &StreamHandle,
        payload: OpPayload,
    ) -> Result<StreamHandle, ConstructionError> {
        let node = self.new_step(name, op_type, payload)?;
        self.flow.add_port(node, Direction::Input, "up");
        self.flow.add_port(node, Direction::Output, "down");
        self.connect_single(node, "up", upstream)?;
        Ok(self.out_stream(node, "down"))
    }

    pub fn map(&mut self, name: &str, upstream: &StreamHandle, f: MapFn) -> Result<StreamHandle, ConstructionError> {
        self.compound(name, "map", upstream, OpPayload::Map(f))
    }

    pub fn filter(
        &mut self,
        name: &str,
        upstream: &StreamHandle,
        pred: PredicateFn,
    ) -> Result<StreamHandle, ConstructionError> {
        self.compound(name, "filter", upstream, OpPayload::Filter(pred))
    }

    pub fn filter_map(
        &mut self,
        name: &str,
        upstream: &StreamHandle,
        f: FilterMapFn,
    ) -> Result<StreamHandle, ConstructionError> {
        self.compound(name, "filter_map", upstream, OpPayload::FilterMap(f))
    }

    /// Returns `(trues, falses)`.
    pub fn branch(
        &mut self,
        name: &str,
        upstream: &StreamHandle,
        pred: PredicateFn,
    ) -> Result<(StreamHandle, StreamHandle), ConstructionError> {
        let node = self.new_step(name, "branch", OpPayload::Branch(pred))?;
        self.flow.add_port(node, Direction::Input, "up");
        self.flow.add_port(node, Direction::Output, "trues");
        self.flow.add_port(node, Direction::Output, "falses");
        self.connect_single(node, "up", upstream)?;
        Ok((self.out_stream(node, "trues"), self.out_stream(node, "falses")))
    }

    pub fn merge(&mut self, name: &str, ups: &[StreamHandle]) -> Result<StreamHandle, ConstructionError> {
        let node = self.new_step(name, "merge", OpPayload::Merge)?;
        self.flow.add_port(node, Direction::Input, "ups");
        self.flow.add_port(node, Direction::Output, "down");
        for up in ups {
            self.connect_single(node, "ups", up)?;
        }
        Ok(self.out_stream(node, "down"))
    }

    pub fn key_on(&mut self, name: &str, upstream: &StreamHandle, key_fn: KeyFn) -> Result<StreamHandle, ConstructionError> {
        self.compound(name, "key_on", upstream, OpPayload::KeyOn(key_fn))
    }

    pub fn map_value(&mut self, name: &str, upstream: &StreamHandle, f: MapFn) -> Result<StreamHandle, ConstructionError> {
        self.compound(name, "map_value", upstream, OpPayload::MapValue(f))
    }

    pub fn key_split(
        &mut self,
        name: &str,
        upstream: &StreamHandle,
        key_fn: KeyFn,
        val_fns: Vec<MapFn>,
    ) -> Result<Vec<StreamHandle>, ConstructionError> {
        let node = self.new_step(name, "key_split", OpPayload::KeySplit(key_fn, val_fns.clone()))?;
        self.flow.add_port(node, Direction::Input, "up");
        for i in 0..val_fns.len() {
            self.flow.add_port(node, Direction::Output, &format!("down_{i}"));
        }
        self.connect_single(node, "up", upstream)?;
        Ok((0..val_fns.len())
            .map(|i| self.out_stream(node, &format!("down_{i}")))
            .collect())
    }

    pub fn stateful_map(
        &mut self,
        name: &str,
        upstream: &StreamHandle,
        build_state: StateBuilderFn,
        mapper: StatefulMapperFn,
    ) -> Result<StreamHandle, ConstructionError> {
        self.compound(
            name,
            "stateful_map",
            upstream,
            OpPayload::StatefulMap(build_state, mapper),
        )
    }

    pub fn stateful_flat_map(
        &mut self,
        name: &str,
        upstream: &StreamHandle,
        build_state: StateBuilderFn,
        mapper: StatefulFlatMapperFn,
    ) -> Result<StreamHandle, ConstructionError> {
        self.compound(
            name,
            "stateful_flat_map",
            upstream,
            OpPayload::StatefulFlatMap(build_state, mapper),
        )
    }

    pub fn reduce_window(
        &mut self,
        name: &str,
        upstream: &StreamHandle,
        clock: Arc<dyn Clock>,
        assigner: Arc<dyn Assigner>,
        reducer: ReducerFn,
    ) -> Result<StreamHandle, ConstructionError> {
        self.compound(
            name,
            "reduce_window",
            upstream,
            OpPayload::ReduceWindow(clock, assigner, reducer),
        )
    }
}

/// Convenience: wrap an `Fn(Item) -> Item` closure as a [`MapFn`].
pub fn map_fn<F: Fn(Item) -> Item + Send + Sync + 'static>(f: F) -> MapFn {
    Arc::new(f)
}

/// Convenience: wrap an `Fn(&Item) -> bool` closure as a [`PredicateFn`].
pub fn predicate_fn<F: Fn(&Item) -> bool + Send + Sync + 'static>(f: F) -> PredicateFn {
    Arc::new(f)
}
