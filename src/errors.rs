//! Error taxonomy for the dataflow core.
//!
//! Each kind of failure the engine can surface gets its own variant with
//! the structured context a caller needs to act on it, rather than a bag
//! of strings. See the module docs on [`BuildError`] and [`RunError`] for
//! which stage raises which kind.

use std::fmt;

use crate::dataflow::StepId;

/// Raised synchronously from builder calls: duplicate step names,
/// cross-scope wiring, an empty `flow_id`.
#[derive(Debug, thiserror::Error)]
pub enum ConstructionError {
    #[error("flow_id must not be empty")]
    EmptyFlowId,

    #[error("step name {new:?} duplicates existing sibling step {existing:?} under {parent}")]
    DuplicateStepName {
        parent: StepId,
        existing: String,
        new: String,
    },

    #[error("cannot connect port {from} to {to}: not in an ancestor/descendant scope relationship")]
    ScopingViolation { from: String, to: String },
}

/// Raised at run entry before any user code executes: unconnected
/// streams, unknown operators, invalid expansions.
#[derive(Debug, thiserror::Error)]
pub enum PlanningError {
    #[error("step {step_id} has unknown operator type {op_type:?}")]
    UnknownOperator { step_id: StepId, op_type: String },

    #[error("input port {port_id} has no resolved upstream stream")]
    DanglingInput { port_id: String },

    #[error("dataflow {flow_id} has no input steps; add at least one `input`")]
    NoInputs { flow_id: String },

    #[error("dataflow {flow_id} has no output or inspect steps")]
    NoOutputs { flow_id: String },

    #[error("invalid expansion of compound operator {op_type} at {step_id}: {reason}")]
    InvalidExpansion {
        step_id: StepId,
        op_type: String,
        reason: String,
    },
}

/// Describes the runtime shape an offending item actually had, for
/// [`RunError::TypeMismatch`] messages.
#[derive(Debug, Clone)]
pub struct ItemShape(pub String);

impl fmt::Display for ItemShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Failures that can occur while a dataflow is running.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// A keyed primitive received an item that was not a `(string, _)`
    /// two-tuple. Fails the worker fast; not recovered.
    #[error("step {step_id}: must be a 2-tuple (key, value), got {shape}")]
    TypeMismatch { step_id: StepId, shape: ItemShape },

    /// A `stateful_map` mapper's return value didn't downcast to
    /// `(new_state, emission)`.
    #[error("step {step_id}: must be a 2-tuple (new_state, emission)")]
    InvalidMapperReturn { step_id: StepId },

    /// A user-supplied callable panicked or returned an error. Fails the
    /// worker fast; the epoch in flight is not committed.
    #[error("step {step_id}: user code failed: {source}")]
    UserCode {
        step_id: StepId,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A source or sink declared an I/O failure as retryable and the
    /// engine exhausted its retry budget within the current epoch.
    #[error("step {step_id}: transient I/O error persisted after {attempts} attempts: {source}")]
    TransientIoExhausted {
        step_id: StepId,
        attempts: u32,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A snapshot payload failed the logic's restore. Fatal; the
    /// coordinator refuses to resume and surfaces the epoch ID.
    #[error("state corruption restoring step {step_id} key {key:?} at epoch {epoch}: {reason}")]
    StateCorruption {
        step_id: StepId,
        key: String,
        epoch: u64,
        reason: String,
    },

    #[error(transparent)]
    Planning(#[from] PlanningError),
}

/// Top-level error returned by the public API: construction, planning, or
/// execution can each fail independently.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error(transparent)]
    Construction(#[from] ConstructionError),

    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error(transparent)]
    Run(#[from] RunError),
}
