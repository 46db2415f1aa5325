//! External source/sink contracts (§6). The core only depends on these
//! traits; concrete drivers (files, Kafka, stdio, …) are out of scope.

use crate::item::Item;

/// A partitioned external source. `list_parts`/`build_part` are called
/// once per worker at start-up; partitions are otherwise owned
/// exclusively by the worker that built them.
pub trait PartitionedSource: Send + Sync {
    /// Enumerate partition keys.
    fn list_parts(&self) -> Vec<String>;

    /// Construct a partition, optionally restoring from an opaque
    /// resume cursor previously returned by [`SourcePartition::snapshot`].
    fn build_part(&self, key: &str, resume_state: Option<&[u8]>) -> Box<dyn SourcePartition>;
}

/// One shard of a [`PartitionedSource`], owned by exactly one worker.
pub trait SourcePartition: Send {
    /// Return the next batch of items. An empty `Vec` means "no data
    /// right now, try later" — it is not end-of-partition.
    fn next_batch(&mut self) -> Vec<Item>;

    /// Has this partition been exhausted? Once `true`, `next_batch`
    /// will not be polled again and `on_eof` fires downstream.
    fn is_eof(&self) -> bool {
        false
    }

    /// An opaque cursor sufficient to resume from this point, or `None`
    /// if this source carries no resumable state.
    fn snapshot(&self) -> Option<Vec<u8>> {
        None
    }

    fn close(&mut self) {}
}

/// A partitioned external sink.
pub trait Sink: Send + Sync {
    fn build(&self, worker_index: usize, worker_count: usize) -> Box<dyn SinkPartition>;
}

/// One shard of a [`Sink`], owned by exactly one worker.
pub trait SinkPartition: Send {
    /// Write a batch of items. Must tolerate the same items being
    /// written more than once across a resume (at-least-once).
    fn write_batch(&mut self, items: &[Item]);

    /// Flush before returning.
    fn close(&mut self) {}
}
