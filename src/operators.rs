//! C1: the primitive operator set, and the opaque-callable types the
//! builder and planner pass around for both primitive and compound
//! operators.
//!
//! User-supplied functions are captured as `Arc<dyn Fn(..) + Send + Sync>`
//! trait objects — the idiomatic Rust stand-in for an opaque callable —
//! so the whole [`crate::dataflow::Dataflow`] (including its operator
//! payloads) can be shared read-only across worker threads behind a
//! single `Arc` instead of rebuilt per worker.

use std::sync::Arc;

use crate::clock::{Clock, Timestamp};
use crate::errors::RunError;
use crate::io::{PartitionedSource, Sink};
use crate::item::Item;
use crate::window::Assigner;

pub const PRIMITIVES: &[&str] = &[
    "input",
    "output",
    "flat_map",
    "inspect",
    "key_assert",
    "_noop",
    "unary",
    "exchange",
];

pub fn is_primitive_op(op_type: &str) -> bool {
    PRIMITIVES.contains(&op_type)
}

/// `fn(item) -> [item, …]`, the sole shape the planner ever compiles a
/// compound operator down to.
pub type FlatMapFn = Arc<dyn Fn(Item) -> Vec<Item> + Send + Sync>;

/// `fn(&item)`, side-effect only.
pub type InspectFn = Arc<dyn Fn(&Item) + Send + Sync>;

/// `fn(item) -> bool`, used by `branch`/`filter`.
pub type PredicateFn = Arc<dyn Fn(&Item) -> bool + Send + Sync>;

/// `fn(item) -> item`, used by `map`.
pub type MapFn = Arc<dyn Fn(Item) -> Item + Send + Sync>;

/// `fn(item) -> Option<item>`, used by `filter_map`.
pub type FilterMapFn = Arc<dyn Fn(Item) -> Option<Item> + Send + Sync>;

/// `fn(value) -> key`, used by `key_on`.
pub type KeyFn = Arc<dyn Fn(&Item) -> String + Send + Sync>;

/// `fn() -> state`, the per-key state constructor for `stateful_map` and
/// `stateful_flat_map`.
pub type StateBuilderFn = Arc<dyn Fn() -> Item + Send + Sync>;

/// The shape a `stateful_map` mapper's return value must downcast to:
/// `(new_state, emission)`, both optional.
pub type StatefulMapResult = (Option<Item>, Option<Item>);

/// `fn(state, value) -> opaque`, where the returned [`Item`] must
/// downcast to [`StatefulMapResult`]. The return type is itself opaque
/// (rather than a native Rust tuple) so a mismatched shape is a runtime
/// [`crate::errors::RunError::TypeMismatch`], exactly as in a dynamically
/// typed host — see the "stateful_map shape" testable property.
pub type StatefulMapperFn = Arc<dyn Fn(Option<Item>, Item) -> Item + Send + Sync>;

/// `fn(state, value) -> (new_state, [emission, …])`.
pub type StatefulFlatMapperFn =
    Arc<dyn Fn(Option<Item>, Item) -> (Option<Item>, Vec<Item>) + Send + Sync>;

/// `fn(acc, value) -> acc`, the reducer passed to `reduce_window`.
pub type ReducerFn = Arc<dyn Fn(Item, Item) -> Item + Send + Sync>;

/// Whether a [`UnaryLogic`] instance should be kept for the next item
/// on this key, or dropped now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fate {
    Retain,
    Discard,
}

/// The per-(step, key) behavior capsule for the `unary` primitive (§4.1).
///
/// One instance is lazily constructed per key the first time an item
/// arrives for it, and is driven exclusively by the worker that owns
/// that key's partition.
pub trait UnaryLogic: Send {
    fn on_item(&mut self, now: Timestamp, value: Item) -> Result<(Vec<Item>, Fate), RunError>;

    fn on_notify(&mut self, now: Timestamp) -> Result<Vec<Item>, RunError> {
        let _ = now;
        Ok(Vec::new())
    }

    fn on_eof(&mut self) -> Result<Vec<Item>, RunError> {
        Ok(Vec::new())
    }

    fn notify_at(&self) -> Option<Timestamp> {
        None
    }

    /// Must return enough to reconstruct this instance's state at
    /// resume. `None` means "no state to persist". The state & window
    /// manager (§4.6) stores this opaque value directly rather than
    /// requiring every logic to hand-roll byte encoding — see DESIGN.md
    /// for why the recovery store's unit of currency is `Item`, not
    /// `Vec<u8>`.
    fn snapshot(&self) -> Option<Item> {
        None
    }

    /// Re-seed a freshly constructed instance from a previously taken
    /// [`UnaryLogic::snapshot`]. Called once, immediately after
    /// construction, during resume (§4.7). Default is a no-op for logics
    /// that don't persist state.
    fn restore(&mut self, snapshot: Option<Item>) {
        let _ = snapshot;
    }
}

/// Constructs a fresh [`UnaryLogic`] for a key the first time it is seen.
pub type UnaryLogicBuilder = Arc<dyn Fn() -> Box<dyn UnaryLogic> + Send + Sync>;

/// Operator-specific data that can't live in the serializable IR
/// ([`crate::dataflow::StepNode`]) because it holds trait objects: user
/// callables, window configuration, and source/sink handles. Indexed by
/// [`crate::dataflow::NodeId`] in a side table on `Dataflow`, the same
/// way the renderer's structural projection stays free of them.
#[derive(Clone)]
pub enum OpPayload {
    Input(Arc<dyn PartitionedSource>),
    Output(Arc<dyn Sink>),
    FlatMap(FlatMapFn),
    Inspect(InspectFn),
    KeyAssert,
    Noop,
    Unary(UnaryLogicBuilder),
    Exchange,

    // Compound operators: payload kept verbatim until the planner
    // expands the step and consumes it.
    Map(MapFn),
    Filter(PredicateFn),
    FilterMap(FilterMapFn),
    Branch(PredicateFn),
    Merge,
    KeyOn(KeyFn),
    MapValue(MapFn),
    KeySplit(KeyFn, Vec<MapFn>),
    StatefulMap(StateBuilderFn, StatefulMapperFn),
    StatefulFlatMap(StateBuilderFn, StatefulFlatMapperFn),
    ReduceWindow(Arc<dyn Clock>, Arc<dyn Assigner>, ReducerFn),
}
