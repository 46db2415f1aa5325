//! C8: epoch-based recovery. A [`SnapshotStore`] holds one write-then-
//! publish round per epoch and a single committed-epoch pointer; resume
//! re-seeds each worker's owned keys from the last published epoch
//! before it starts pulling from its input partitions.
//!
//! Concrete durable backends (on-disk, object storage, …) are out of
//! scope here — only the contract and an in-memory reference
//! implementation, matching how [`crate::io`] stops at the source/sink
//! traits rather than shipping a driver.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::dataflow::StepId;
use crate::item::Item;

/// How often a long-running worker pool should take a recovery
/// snapshot. Exposed as a newtype (rather than a bare `Duration`
/// parameter) so `run`'s signature documents its unit at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochInterval(pub Duration);

impl Default for EpochInterval {
    fn default() -> Self {
        EpochInterval(Duration::from_secs(10))
    }
}

/// One entry of a per-key `unary` logic's persisted state.
pub type SnapshotEntry = (StepId, String, Option<Item>);

/// Durable storage for per-epoch snapshots. A round writes every entry
/// for an epoch, then [`SnapshotStore::publish`] is the single atomic
/// step that makes that epoch resumable — a crash between the two
/// leaves the old committed epoch intact.
pub trait SnapshotStore: Send + Sync {
    fn write(&self, epoch: u64, step_id: &StepId, key: &str, value: Option<Item>);

    /// Advance the committed-epoch pointer. Idempotent; publishing an
    /// epoch older than the current pointer is a no-op.
    fn publish(&self, epoch: u64);

    fn committed_epoch(&self) -> Option<u64>;

    /// All entries written for the currently committed epoch, or an
    /// empty list if nothing has ever been published.
    fn read_committed(&self) -> Vec<SnapshotEntry>;
}

/// Reference [`SnapshotStore`] backed by process memory. Useful for
/// tests and single-process deployments; does not survive a restart.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    pending: Mutex<HashMap<u64, Vec<SnapshotEntry>>>,
    committed: Mutex<Option<u64>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn write(&self, epoch: u64, step_id: &StepId, key: &str, value: Option<Item>) {
        self.pending
            .lock()
            .expect("snapshot store mutex poisoned")
            .entry(epoch)
            .or_default()
            .push((step_id.clone(), key.to_string(), value));
    }

    fn publish(&self, epoch: u64) {
        let mut committed = self.committed.lock().expect("snapshot store mutex poisoned");
        if committed.is_none_or(|c| epoch > c) {
            *committed = Some(epoch);
        }
    }

    fn committed_epoch(&self) -> Option<u64> {
        *self.committed.lock().expect("snapshot store mutex poisoned")
    }

    fn read_committed(&self) -> Vec<SnapshotEntry> {
        match self.committed_epoch() {
            Some(epoch) => self
                .pending
                .lock()
                .expect("snapshot store mutex poisoned")
                .get(&epoch)
                .cloned()
                .unwrap_or_default(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(s: &str) -> StepId {
        StepId(s.to_string())
    }

    #[test]
    fn nothing_resumable_before_first_publish() {
        let store = InMemorySnapshotStore::new();
        store.write(0, &sid("s"), "k", Some(Item::new(1i64)));
        assert!(store.read_committed().is_empty());
    }

    #[test]
    fn publish_exposes_that_epochs_writes() {
        let store = InMemorySnapshotStore::new();
        store.write(0, &sid("s"), "k", Some(Item::new(7i64)));
        store.publish(0);
        let entries = store.read_committed();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1, "k");
    }

    #[test]
    fn publish_never_moves_the_pointer_backwards() {
        let store = InMemorySnapshotStore::new();
        store.write(5, &sid("s"), "k", None);
        store.publish(5);
        store.publish(2);
        assert_eq!(store.committed_epoch(), Some(5));
    }
}
