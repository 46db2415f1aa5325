//! C4: the renderer. Produces a stable, serde-serializable structural
//! projection of a (lowered) [`Dataflow`] — the JSON shape external
//! tooling and the scenario tests in §8 compare against.

use std::collections::HashMap;

use serde::Serialize;

use crate::dataflow::{Dataflow, Direction, NodeId, PortId};

#[derive(Debug, Clone, Serialize)]
pub struct RenderedPort {
    pub port_id: PortId,
    pub port_name: String,
    pub from_port_ids: Vec<PortId>,
    pub from_stream_ids: Vec<PortId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderedOperator {
    pub step_id: String,
    pub step_name: String,
    pub op_type: String,
    pub is_primitive: bool,
    pub inp_ports: Vec<RenderedPort>,
    pub out_ports: Vec<RenderedPort>,
    pub substeps: Vec<RenderedOperator>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderedDataflow {
    pub flow_id: String,
    pub steps: Vec<RenderedOperator>,
}

/// Resolve every port in `flow` to the set of primitive output ports
/// that ultimately feed it, following `from_port_ids` transitively
/// through compound steps (§4.4 step 2, "Stream resolution").
pub fn resolve_stream_ids(flow: &Dataflow) -> HashMap<PortId, Vec<PortId>> {
    let index = flow.port_index();
    let mut memo: HashMap<PortId, Vec<PortId>> = HashMap::new();

    fn go(
        flow: &Dataflow,
        index: &HashMap<PortId, NodeId>,
        port_id: &PortId,
        memo: &mut HashMap<PortId, Vec<PortId>>,
    ) -> Vec<PortId> {
        if let Some(cached) = memo.get(port_id) {
            return cached.clone();
        }
        let owner = index[port_id];
        let node = flow.node(owner);
        let port = node
            .inp_ports
            .iter()
            .chain(node.out_ports.iter())
            .find(|p| &p.port_id == port_id)
            .expect("port_id resolves to a port on its owning node");

        let result = if node.is_primitive() && port.direction == Direction::Output {
            vec![port_id.clone()]
        } else {
            let mut acc = Vec::new();
            for upstream in &port.from_port_ids {
                for r in go(flow, index, upstream, memo) {
                    if !acc.contains(&r) {
                        acc.push(r);
                    }
                }
            }
            acc
        };
        memo.insert(port_id.clone(), result.clone());
        result
    }

    for node in flow.nodes() {
        for port in node.inp_ports.iter().chain(node.out_ports.iter()) {
            go(flow, &index, &port.port_id, &mut memo);
        }
    }
    memo
}

fn render_port(port: &crate::dataflow::Port, resolved: &HashMap<PortId, Vec<PortId>>) -> RenderedPort {
    RenderedPort {
        port_id: port.port_id.clone(),
        port_name: port.port_name.clone(),
        from_port_ids: port.from_port_ids.clone(),
        from_stream_ids: resolved.get(&port.port_id).cloned().unwrap_or_default(),
    }
}

fn render_node(flow: &Dataflow, node: NodeId, resolved: &HashMap<PortId, Vec<PortId>>) -> RenderedOperator {
    let step = flow.node(node);
    RenderedOperator {
        step_id: step.step_id.0.clone(),
        step_name: step.step_name.clone(),
        op_type: step.op_type.clone(),
        is_primitive: step.is_primitive(),
        inp_ports: step.inp_ports.iter().map(|p| render_port(p, resolved)).collect(),
        out_ports: step.out_ports.iter().map(|p| render_port(p, resolved)).collect(),
        substeps: step
            .children
            .iter()
            .map(|&c| render_node(flow, c, resolved))
            .collect(),
    }
}

/// Render a fully lowered [`Dataflow`] into its stable structural
/// projection. Call after [`crate::planner::lower`].
pub fn render(flow: &Dataflow) -> RenderedDataflow {
    let resolved = resolve_stream_ids(flow);
    RenderedDataflow {
        flow_id: flow.flow_id.clone(),
        steps: flow
            .children_of(None)
            .iter()
            .map(|&n| render_node(flow, n, &resolved))
            .collect(),
    }
}

/// Render `flow` to the stable JSON shape external tooling consumes
/// (§6): the same pretty-printed structure every run of `render` plus
/// `to_json` produces byte-for-byte, given the same lowered flow.
pub fn render_json(flow: &Dataflow) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&render(flow))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Scope;
    use crate::item::Item;
    use crate::testing::{TestingSink, TestingSource};
    use std::sync::Arc;

    #[test]
    fn rendered_json_is_deterministic_across_runs() {
        let build = || {
            let source = TestingSource::new((0..4).map(Item::new).collect());
            let sink = TestingSink::new();
            let mut flow = Dataflow::new("json_demo").unwrap();
            {
                let mut scope = Scope::new(&mut flow);
                let inp = scope.input("inp", source).unwrap();
                let doubled = scope
                    .map("double", &inp, Arc::new(|item: Item| Item::new(item.downcast_ref::<i32>().unwrap() * 2)))
                    .unwrap();
                scope.output("out", &doubled, Arc::new(sink.clone())).unwrap();
            }
            crate::planner::lower(&mut flow).unwrap();
            flow
        };

        let first = render_json(&build()).unwrap();
        let second = render_json(&build()).unwrap();
        assert_eq!(first, second);
        assert!(first.contains("\"flow_id\": \"json_demo\""));
    }
}
