//! The dataflow intermediate representation (IR): a hierarchical DAG of
//! *steps* (operator instances) connected by named *ports* and *streams*.
//!
//! Steps live in a flat arena addressed by integer [`NodeId`]s with
//! explicit parent/child links, rather than as a tree of pointers — this
//! keeps the representation acyclic by construction and makes the
//! planner's port resolution (§4.4) a plain map lookup instead of a
//! graph walk.

use std::collections::HashMap;
use std::fmt;

use crate::errors::ConstructionError;
use crate::operators::OpPayload;

/// Index into a [`Dataflow`]'s node arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Dotted path from the flow root to a step, e.g. `"my_flow.branch.evens"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct StepId(pub String);

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fully-qualified port identifier: `"<step_id>.<port_name>"`.
pub type PortId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Direction {
    Input,
    Output,
}

/// A named connection point on a step.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Port {
    pub port_name: String,
    pub port_id: PortId,
    pub direction: Direction,
    /// For input ports: the upstream output port(s) feeding this port.
    /// For output ports of compound steps: the descendant output
    /// port(s) whose streams are re-exposed under this name.
    pub from_port_ids: Vec<PortId>,
}

impl Port {
    fn new(owner: &StepId, name: &str, direction: Direction) -> Self {
        Port {
            port_name: name.to_string(),
            port_id: format!("{owner}.{name}"),
            direction,
            from_port_ids: Vec::new(),
        }
    }
}

/// An instance of an operator in the IR.
#[derive(Debug, Clone)]
pub struct StepNode {
    pub id: NodeId,
    pub step_name: String,
    pub step_id: StepId,
    pub op_type: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub inp_ports: Vec<Port>,
    pub out_ports: Vec<Port>,
}

impl StepNode {
    pub fn is_primitive(&self) -> bool {
        crate::operators::is_primitive_op(&self.op_type)
    }

    pub fn port(&self, direction: Direction, name: &str) -> Option<&Port> {
        let ports = match direction {
            Direction::Input => &self.inp_ports,
            Direction::Output => &self.out_ports,
        };
        ports.iter().find(|p| p.port_name == name)
    }

    pub fn port_mut(&mut self, direction: Direction, name: &str) -> Option<&mut Port> {
        let ports = match direction {
            Direction::Input => &mut self.inp_ports,
            Direction::Output => &mut self.out_ports,
        };
        ports.iter_mut().find(|p| p.port_name == name)
    }
}

/// A reference to a single logical stream: the output port of some step
/// that a downstream step can wire an input port to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHandle {
    pub node: NodeId,
    pub port_id: PortId,
}

/// The complete operator DAG with its identity.
#[derive(Clone)]
pub struct Dataflow {
    pub flow_id: String,
    nodes: Vec<StepNode>,
    pub(crate) root_children: Vec<NodeId>,
    payloads: HashMap<NodeId, OpPayload>,
}

impl fmt::Debug for Dataflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataflow")
            .field("flow_id", &self.flow_id)
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

impl Dataflow {
    pub fn new(flow_id: impl Into<String>) -> Result<Self, ConstructionError> {
        let flow_id = flow_id.into();
        if flow_id.is_empty() {
            return Err(ConstructionError::EmptyFlowId);
        }
        Ok(Dataflow {
            flow_id,
            nodes: Vec::new(),
            root_children: Vec::new(),
            payloads: HashMap::new(),
        })
    }

    pub(crate) fn set_payload(&mut self, node: NodeId, payload: OpPayload) {
        self.payloads.insert(node, payload);
    }

    pub(crate) fn payload(&self, node: NodeId) -> Option<&OpPayload> {
        self.payloads.get(&node)
    }

    pub(crate) fn take_payload(&mut self, node: NodeId) -> Option<OpPayload> {
        self.payloads.remove(&node)
    }

    pub fn node(&self, id: NodeId) -> &StepNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut StepNode {
        &mut self.nodes[id.0]
    }

    pub fn nodes(&self) -> &[StepNode] {
        &self.nodes
    }

    pub fn children_of(&self, parent: Option<NodeId>) -> &[NodeId] {
        match parent {
            None => &self.root_children,
            Some(id) => &self.nodes[id.0].children,
        }
    }

    fn step_id_for(&self, parent: Option<NodeId>, name: &str) -> StepId {
        match parent {
            None => StepId(format!("{}.{name}", self.flow_id)),
            Some(id) => StepId(format!("{}.{name}", self.nodes[id.0].step_id)),
        }
    }

    /// Create a new step under `parent` (`None` = dataflow root), after
    /// checking sibling name uniqueness.
    pub(crate) fn add_step(
        &mut self,
        parent: Option<NodeId>,
        name: &str,
        op_type: &str,
    ) -> Result<NodeId, ConstructionError> {
        let siblings = self.children_of(parent);
        if let Some(&dup) = siblings
            .iter()
            .find(|&&sib| self.nodes[sib.0].step_name == name)
        {
            return Err(ConstructionError::DuplicateStepName {
                parent: parent
                    .map(|p| self.nodes[p.0].step_id.clone())
                    .unwrap_or_else(|| StepId(self.flow_id.clone())),
                existing: self.nodes[dup.0].step_name.clone(),
                new: name.to_string(),
            });
        }

        let step_id = self.step_id_for(parent, name);
        let id = NodeId(self.nodes.len());
        self.nodes.push(StepNode {
            id,
            step_name: name.to_string(),
            step_id,
            op_type: op_type.to_string(),
            parent,
            children: Vec::new(),
            inp_ports: Vec::new(),
            out_ports: Vec::new(),
        });
        match parent {
            None => self.root_children.push(id),
            Some(p) => self.nodes[p.0].children.push(id),
        }
        Ok(id)
    }

    pub(crate) fn add_port(&mut self, node: NodeId, direction: Direction, name: &str) -> PortId {
        let step_id = self.nodes[node.0].step_id.clone();
        let port = Port::new(&step_id, name, direction);
        let port_id = port.port_id.clone();
        match direction {
            Direction::Input => self.nodes[node.0].inp_ports.push(port),
            Direction::Output => self.nodes[node.0].out_ports.push(port),
        }
        port_id
    }

    /// Is `scope` the scope `node` lives in, or an ancestor of it? A step's
    /// own scope is its `parent`; lexical visibility works the same way a
    /// name defined in an outer scope stays visible in a nested one.
    fn scope_visible(&self, scope: Option<NodeId>, mut node: NodeId) -> bool {
        loop {
            let p = self.nodes[node.0].parent;
            if p == scope {
                return true;
            }
            match p {
                Some(pp) => node = pp,
                None => return false,
            }
        }
    }

    /// Two steps are connectable when the input step can see the upstream
    /// step's scope: they're siblings, or upstream lives in a scope that
    /// encloses the input step (e.g. the planner wiring a compound's
    /// substeps back to that compound's own external upstream).
    fn scope_related(&self, input_node: NodeId, upstream_node: NodeId) -> bool {
        let upstream_scope = self.nodes[upstream_node.0].parent;
        self.scope_visible(upstream_scope, input_node)
    }

    /// Wire `input_port` to receive from `upstream`, checking that the
    /// input step can see the upstream step's scope.
    pub(crate) fn connect(
        &mut self,
        input_node: NodeId,
        input_port: &str,
        upstream: &StreamHandle,
    ) -> Result<(), ConstructionError> {
        if !self.scope_related(input_node, upstream.node) {
            return Err(ConstructionError::ScopingViolation {
                from: upstream.port_id.clone(),
                to: format!("{}.{input_port}", self.nodes[input_node.0].step_id),
            });
        }
        let port = self
            .nodes[input_node.0]
            .port_mut(Direction::Input, input_port)
            .expect("input port must be declared before wiring");
        port.from_port_ids.push(upstream.port_id.clone());
        Ok(())
    }

    /// Expose a descendant output port as an output port of a compound
    /// step (used when a builder combinator returns a stream from one of
    /// its substeps).
    pub(crate) fn expose_output(
        &mut self,
        compound_node: NodeId,
        out_port: &str,
        descendant: &StreamHandle,
    ) {
        let port = self
            .nodes[compound_node.0]
            .port_mut(Direction::Output, out_port)
            .expect("output port must be declared before exposing");
        port.from_port_ids.push(descendant.port_id.clone());
    }

    /// Index of `port_id -> owning NodeId` for O(1) lookups during
    /// planning and rendering.
    pub fn port_index(&self) -> HashMap<PortId, NodeId> {
        let mut index = HashMap::new();
        for node in &self.nodes {
            for port in node.inp_ports.iter().chain(node.out_ports.iter()) {
                index.insert(port.port_id.clone(), node.id);
            }
        }
        index
    }
}
