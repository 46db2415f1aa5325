//! C5: the planner. Expands every compound step into its primitive
//! subgraph (§4.4), inserts exchange primitives upstream of keyed
//! `unary` steps, and verifies the lowered graph is connected.

use std::sync::Arc;

use crate::builder::Scope;
use crate::dataflow::{Dataflow, Direction, NodeId, StepId, StreamHandle};
use crate::errors::{ConstructionError, PlanningError};
use crate::item::{as_keyed, keyed};
use crate::operators::{FlatMapFn, KeyFn, MapFn, OpPayload, ReducerFn, StateBuilderFn, StatefulFlatMapperFn, StatefulMapperFn, UnaryLogicBuilder};
use crate::stateful::{StatefulFlatMapLogic, StatefulMapLogic};
use crate::window::WindowLogic;

/// Lower every compound operator in `flow` into primitives, in place.
pub fn lower(flow: &mut Dataflow) -> Result<(), PlanningError> {
    for node in flow.children_of(None).to_vec() {
        expand_node(flow, node)?;
    }
    insert_exchanges(flow)?;
    verify_connectivity(flow)?;
    Ok(())
}

fn wrap(step_id: StepId, op_type: &str, e: ConstructionError) -> PlanningError {
    PlanningError::InvalidExpansion {
        step_id,
        op_type: op_type.to_string(),
        reason: e.to_string(),
    }
}

fn upstream_of(flow: &Dataflow, node: NodeId, port_name: &str) -> StreamHandle {
    let port = flow.node(node).port(Direction::Input, port_name).expect("port declared");
    let port_id = port.from_port_ids[0].clone();
    let index = flow.port_index();
    let owner = *index.get(&port_id).expect("from_port_id resolves to a known port");
    StreamHandle { node: owner, port_id }
}

fn upstreams_of(flow: &Dataflow, node: NodeId, port_name: &str) -> Vec<StreamHandle> {
    let port = flow.node(node).port(Direction::Input, port_name).expect("port declared");
    let index = flow.port_index();
    port.from_port_ids
        .iter()
        .map(|pid| StreamHandle {
            node: *index.get(pid).expect("from_port_id resolves"),
            port_id: pid.clone(),
        })
        .collect()
}

fn expand_node(flow: &mut Dataflow, node: NodeId) -> Result<(), PlanningError> {
    if flow.node(node).is_primitive() {
        return Ok(());
    }
    if !flow.node(node).children.is_empty() {
        // Already expanded (shouldn't normally happen on a fresh build).
        for child in flow.node(node).children.clone() {
            expand_node(flow, child)?;
        }
        return Ok(());
    }

    let op_type = flow.node(node).op_type.clone();
    let payload = flow.take_payload(node).ok_or_else(|| PlanningError::InvalidExpansion {
        step_id: flow.node(node).step_id.clone(),
        op_type: op_type.clone(),
        reason: "compound step has no recorded payload".to_string(),
    })?;

    match payload {
        OpPayload::Map(f) => expand_map(flow, node, f)?,
        OpPayload::Filter(p) => expand_filter(flow, node, p)?,
        OpPayload::FilterMap(f) => expand_filter_map(flow, node, f)?,
        OpPayload::Branch(p) => expand_branch(flow, node, p)?,
        OpPayload::Merge => expand_merge(flow, node)?,
        OpPayload::KeyOn(kf) => expand_key_on(flow, node, kf)?,
        OpPayload::MapValue(f) => expand_map_value(flow, node, f)?,
        OpPayload::KeySplit(kf, vfs) => expand_key_split(flow, node, kf, vfs)?,
        OpPayload::StatefulMap(bs, mapper) => expand_stateful_map(flow, node, bs, mapper)?,
        OpPayload::StatefulFlatMap(bs, mapper) => expand_stateful_flat_map(flow, node, bs, mapper)?,
        OpPayload::ReduceWindow(clock, assigner, reducer) => {
            expand_reduce_window(flow, node, clock, assigner, reducer)?
        }
        OpPayload::Input(_)
        | OpPayload::Output(_)
        | OpPayload::FlatMap(_)
        | OpPayload::Inspect(_)
        | OpPayload::KeyAssert
        | OpPayload::Noop
        | OpPayload::Unary(_)
        | OpPayload::Exchange => {
            return Err(PlanningError::UnknownOperator {
                step_id: flow.node(node).step_id.clone(),
                op_type: format!("{op_type} (primitive payload on compound step)"),
            });
        }
    }

    for child in flow.node(node).children.clone() {
        expand_node(flow, child)?;
    }
    Ok(())
}

fn expand_map(flow: &mut Dataflow, node: NodeId, f: MapFn) -> Result<(), PlanningError> {
    let step_id = flow.node(node).step_id.clone();
    let up = upstream_of(flow, node, "up");
    let wrapped: FlatMapFn = Arc::new(move |item| vec![f(item)]);
    let mut scope = Scope::within(flow, node);
    let out = scope
        .flat_map("flat_map", &up, wrapped)
        .map_err(|e| wrap(step_id.clone(), "map", e))?;
    flow.expose_output(node, "down", &out);
    Ok(())
}

fn expand_filter(flow: &mut Dataflow, node: NodeId, pred: crate::operators::PredicateFn) -> Result<(), PlanningError> {
    let step_id = flow.node(node).step_id.clone();
    let up = upstream_of(flow, node, "up");
    let wrapped: FlatMapFn = Arc::new(move |item| if pred(&item) { vec![item] } else { vec![] });
    let mut scope = Scope::within(flow, node);
    let out = scope
        .flat_map("flat_map", &up, wrapped)
        .map_err(|e| wrap(step_id.clone(), "filter", e))?;
    flow.expose_output(node, "down", &out);
    Ok(())
}

fn expand_filter_map(
    flow: &mut Dataflow,
    node: NodeId,
    f: crate::operators::FilterMapFn,
) -> Result<(), PlanningError> {
    let step_id = flow.node(node).step_id.clone();
    let up = upstream_of(flow, node, "up");
    let wrapped: FlatMapFn = Arc::new(move |item| f(item).into_iter().collect());
    let mut scope = Scope::within(flow, node);
    let out = scope
        .flat_map("flat_map", &up, wrapped)
        .map_err(|e| wrap(step_id.clone(), "filter_map", e))?;
    flow.expose_output(node, "down", &out);
    Ok(())
}

fn expand_branch(flow: &mut Dataflow, node: NodeId, pred: crate::operators::PredicateFn) -> Result<(), PlanningError> {
    let step_id = flow.node(node).step_id.clone();
    let up = upstream_of(flow, node, "up");
    let true_pred = pred.clone();
    let true_fn: FlatMapFn = Arc::new(move |item| if true_pred(&item) { vec![item] } else { vec![] });
    let false_fn: FlatMapFn = Arc::new(move |item| if pred(&item) { vec![] } else { vec![item] });
    let mut scope = Scope::within(flow, node);
    let trues = scope
        .flat_map("true_branch", &up, true_fn)
        .map_err(|e| wrap(step_id.clone(), "branch", e))?;
    let falses = scope
        .flat_map("false_branch", &up, false_fn)
        .map_err(|e| wrap(step_id.clone(), "branch", e))?;
    flow.expose_output(node, "trues", &trues);
    flow.expose_output(node, "falses", &falses);
    Ok(())
}

fn expand_merge(flow: &mut Dataflow, node: NodeId) -> Result<(), PlanningError> {
    let step_id = flow.node(node).step_id.clone();
    let ups = upstreams_of(flow, node, "ups");
    let mut scope = Scope::within(flow, node);
    let first = ups.first().ok_or_else(|| PlanningError::InvalidExpansion {
        step_id: step_id.clone(),
        op_type: "merge".to_string(),
        reason: "merge requires at least one upstream".to_string(),
    })?;
    let out = scope
        .noop("noop", first)
        .map_err(|e| wrap(step_id.clone(), "merge", e))?;
    for up in &ups[1..] {
        scope
            .flow_mut()
            .connect(out.node, "up", up)
            .map_err(|e| wrap(step_id.clone(), "merge", e))?;
    }
    flow.expose_output(node, "down", &out);
    Ok(())
}

fn expand_key_on(flow: &mut Dataflow, node: NodeId, key_fn: KeyFn) -> Result<(), PlanningError> {
    let step_id = flow.node(node).step_id.clone();
    let up = upstream_of(flow, node, "up");
    let wrap_fn: MapFn = Arc::new(move |item| keyed(key_fn(&item), item));
    let mut scope = Scope::within(flow, node);
    let mapped = scope
        .map("map", &up, wrap_fn)
        .map_err(|e| wrap(step_id.clone(), "key_on", e))?;
    let asserted = scope
        .key_assert("assert", &mapped)
        .map_err(|e| wrap(step_id.clone(), "key_on", e))?;
    flow.expose_output(node, "down", &asserted);
    Ok(())
}

fn expand_map_value(flow: &mut Dataflow, node: NodeId, f: MapFn) -> Result<(), PlanningError> {
    let step_id = flow.node(node).step_id.clone();
    let up = upstream_of(flow, node, "up");
    let flat: FlatMapFn = Arc::new(move |item| match as_keyed(&item) {
        Some((k, v)) => vec![keyed(k.clone(), f(v.clone()))],
        None => vec![item],
    });
    let mut scope = Scope::within(flow, node);
    let mapped = scope
        .flat_map("flat_map", &up, flat)
        .map_err(|e| wrap(step_id.clone(), "map_value", e))?;
    let asserted = scope
        .key_assert("assert", &mapped)
        .map_err(|e| wrap(step_id.clone(), "map_value", e))?;
    flow.expose_output(node, "down", &asserted);
    Ok(())
}

fn expand_key_split(
    flow: &mut Dataflow,
    node: NodeId,
    key_fn: KeyFn,
    val_fns: Vec<MapFn>,
) -> Result<(), PlanningError> {
    let step_id = flow.node(node).step_id.clone();
    let up = upstream_of(flow, node, "up");
    let mut scope = Scope::within(flow, node);
    let keyed_stream = scope
        .key_on("key_on", &up, key_fn)
        .map_err(|e| wrap(step_id.clone(), "key_split", e))?;
    let mut outs = Vec::with_capacity(val_fns.len());
    for (i, vf) in val_fns.into_iter().enumerate() {
        let name = format!("map_value_{i}");
        let out = scope
            .map_value(&name, &keyed_stream, vf)
            .map_err(|e| wrap(step_id.clone(), "key_split", e))?;
        outs.push(out);
    }
    for (i, out) in outs.iter().enumerate() {
        flow.expose_output(node, &format!("down_{i}"), out);
    }
    Ok(())
}

fn expand_stateful_map(
    flow: &mut Dataflow,
    node: NodeId,
    build_state: StateBuilderFn,
    mapper: StatefulMapperFn,
) -> Result<(), PlanningError> {
    let step_id = flow.node(node).step_id.clone();
    let up = upstream_of(flow, node, "up");
    let logic_step_id = step_id.clone();
    let logic_builder: UnaryLogicBuilder = Arc::new(move || {
        Box::new(StatefulMapLogic::new(
            logic_step_id.clone(),
            Some(build_state()),
            mapper.clone(),
        ))
    });
    let mut scope = Scope::within(flow, node);
    let out = scope
        .unary("unary", &up, logic_builder)
        .map_err(|e| wrap(step_id.clone(), "stateful_map", e))?;
    flow.expose_output(node, "down", &out);
    Ok(())
}

fn expand_stateful_flat_map(
    flow: &mut Dataflow,
    node: NodeId,
    build_state: StateBuilderFn,
    mapper: StatefulFlatMapperFn,
) -> Result<(), PlanningError> {
    let step_id = flow.node(node).step_id.clone();
    let up = upstream_of(flow, node, "up");
    let logic_builder: UnaryLogicBuilder =
        Arc::new(move || Box::new(StatefulFlatMapLogic::new(Some(build_state()), mapper.clone())));
    let mut scope = Scope::within(flow, node);
    let out = scope
        .unary("unary", &up, logic_builder)
        .map_err(|e| wrap(step_id.clone(), "stateful_flat_map", e))?;
    flow.expose_output(node, "down", &out);
    Ok(())
}

fn expand_reduce_window(
    flow: &mut Dataflow,
    node: NodeId,
    clock: Arc<dyn crate::clock::Clock>,
    assigner: Arc<dyn crate::window::Assigner>,
    reducer: ReducerFn,
) -> Result<(), PlanningError> {
    let step_id = flow.node(node).step_id.clone();
    let up = upstream_of(flow, node, "up");
    let logic_builder: UnaryLogicBuilder = Arc::new(move || {
        Box::new(WindowLogic::new(clock.clone(), assigner.clone(), reducer.clone()))
    });
    let mut scope = Scope::within(flow, node);
    let out = scope
        .unary("unary", &up, logic_builder)
        .map_err(|e| wrap(step_id.clone(), "reduce_window", e))?;
    flow.expose_output(node, "down", &out);
    Ok(())
}

/// Insert an `exchange` primitive immediately upstream of every `unary`
/// primitive whose input is keyed and not already fed by an exchange.
fn insert_exchanges(flow: &mut Dataflow) -> Result<(), PlanningError> {
    let unary_nodes: Vec<NodeId> = flow
        .nodes()
        .iter()
        .filter(|n| n.op_type == "unary")
        .map(|n| n.id)
        .collect();

    for node in unary_nodes {
        let up = upstream_of(flow, node, "up");
        if flow.node(up.node).op_type == "exchange" {
            continue;
        }
        let step_id = flow.node(node).step_id.clone();
        let parent = flow.node(node).parent;
        let exch_name = format!("{}_exchange", flow.node(node).step_name);
        let exch_node = flow.add_step(parent, &exch_name, "exchange").map_err(|e| wrap(step_id.clone(), "exchange", e))?;
        flow.set_payload(exch_node, OpPayload::Exchange);
        flow.add_port(exch_node, Direction::Input, "up");
        let exch_down = flow.add_port(exch_node, Direction::Output, "down");
        flow.connect(exch_node, "up", &up).map_err(|e| wrap(step_id.clone(), "exchange", e))?;

        let unary_up = flow
            .node_mut(node)
            .port_mut(Direction::Input, "up")
            .expect("unary has up port");
        unary_up.from_port_ids = vec![exch_down];
    }
    Ok(())
}

/// §4.4 step 4: every `input` and `output`/`inspect` must exist, and
/// every primitive input port must resolve to at least one primitive
/// output feeding it — a dangling stream fails planning rather than
/// panicking or silently running with a starved input.
fn verify_connectivity(flow: &Dataflow) -> Result<(), PlanningError> {
    let mut has_input = false;
    let mut has_output = false;
    for n in flow.nodes() {
        if n.is_primitive() {
            match n.op_type.as_str() {
                "input" => has_input = true,
                "output" | "inspect" => has_output = true,
                _ => {}
            }
        }
    }
    if !has_input {
        return Err(PlanningError::NoInputs {
            flow_id: flow.flow_id.clone(),
        });
    }
    if !has_output {
        return Err(PlanningError::NoOutputs {
            flow_id: flow.flow_id.clone(),
        });
    }

    let resolved = crate::render::resolve_stream_ids(flow);
    for n in flow.nodes() {
        if !n.is_primitive() || n.op_type == "input" {
            continue;
        }
        for port in &n.inp_ports {
            if resolved.get(&port.port_id).map(Vec::is_empty).unwrap_or(true) {
                return Err(PlanningError::DanglingInput {
                    port_id: port.port_id.clone(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::Direction;

    /// A primitive step whose input port was never connected must fail
    /// planning with `DanglingInput`, not panic inside `upstream_of` the
    /// first time something tries to resolve it.
    #[test]
    fn unconnected_primitive_input_port_fails_planning() {
        let mut flow = Dataflow::new("dangling").unwrap();
        let inp = flow.add_step(None, "inp", "input").unwrap();
        flow.add_port(inp, Direction::Output, "down");

        let orphan = flow.add_step(None, "orphan", "inspect").unwrap();
        flow.add_port(orphan, Direction::Input, "up");

        match lower(&mut flow) {
            Err(PlanningError::DanglingInput { port_id }) => {
                assert!(port_id.contains("orphan"));
            }
            other => panic!("expected DanglingInput, got {other:?}"),
        }
    }
}
