//! Opaque, type-erased item payloads.
//!
//! The engine never interprets the value flowing through a stream: it
//! only moves it, clones the handle, and occasionally downcasts it back
//! to a concrete type inside user-supplied callables. This mirrors the
//! teacher's own `TdPyAny`, an opaque handle threaded through the whole
//! engine, except here the erased object model is Rust's `Any` rather
//! than Python's.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A single opaque item flowing through a stream.
///
/// Cloning an `Item` is cheap (it clones the `Arc`); the underlying
/// payload is shared, not duplicated.
#[derive(Clone)]
pub struct Item(Arc<dyn Any + Send + Sync>);

impl Item {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Item(Arc::new(value))
    }

    /// Borrow the payload as a concrete type, if it matches.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// A short, human-readable description of the erased payload's
    /// runtime type, used in [`crate::errors::ItemShape`] messages.
    pub fn shape(&self) -> String {
        if self.downcast_ref::<KeyedValue>().is_some() {
            "(string, _)".to_string()
        } else {
            "non-tuple value".to_string()
        }
    }
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Item(..)")
    }
}

/// The concrete shape a keyed stream's items must downcast to:
/// `(key, value)` where `key` is a string and `value` is itself opaque.
pub type KeyedValue = (String, Item);

/// Build a keyed item from a key and an opaque value.
pub fn keyed(key: impl Into<String>, value: Item) -> Item {
    Item::new((key.into(), value))
}

/// Attempt to view an item as `(key, value)`; used by `key_assert` and
/// every stateful primitive.
pub fn as_keyed(item: &Item) -> Option<&KeyedValue> {
    item.downcast_ref::<KeyedValue>()
}
