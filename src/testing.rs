//! In-memory [`PartitionedSource`]/[`Sink`] implementations for tests
//! and the `demos/` binaries — mirrors how the teacher's own test suite
//! stands up a dataflow without a real external system.

use std::sync::{Arc, Mutex};

use crate::io::{PartitionedSource, Sink, SinkPartition, SourcePartition};
use crate::item::Item;

/// A single-partition source that replays a fixed, pre-built list of
/// items once, then reports EOF.
pub struct TestingSource {
    items: Vec<Item>,
}

impl TestingSource {
    pub fn new(items: Vec<Item>) -> Arc<Self> {
        Arc::new(TestingSource { items })
    }
}

impl PartitionedSource for TestingSource {
    fn list_parts(&self) -> Vec<String> {
        vec!["part-0".to_string()]
    }

    fn build_part(&self, _key: &str, resume_state: Option<&[u8]>) -> Box<dyn SourcePartition> {
        let start = resume_state
            .and_then(|b| bincode::deserialize::<usize>(b).ok())
            .unwrap_or(0);
        Box::new(TestingSourcePartition {
            items: self.items.clone(),
            next: start,
        })
    }
}

struct TestingSourcePartition {
    items: Vec<Item>,
    next: usize,
}

impl SourcePartition for TestingSourcePartition {
    fn next_batch(&mut self) -> Vec<Item> {
        if self.next >= self.items.len() {
            return Vec::new();
        }
        let item = self.items[self.next].clone();
        self.next += 1;
        vec![item]
    }

    fn is_eof(&self) -> bool {
        self.next >= self.items.len()
    }

    fn snapshot(&self) -> Option<Vec<u8>> {
        bincode::serialize(&self.next).ok()
    }
}

/// A sink that accumulates every item it's handed, shared with the test
/// that built it so assertions can inspect it after the run.
#[derive(Clone)]
pub struct TestingSink {
    captured: Arc<Mutex<Vec<Item>>>,
}

impl Default for TestingSink {
    fn default() -> Self {
        TestingSink {
            captured: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl TestingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn captured(&self) -> Vec<Item> {
        self.captured.lock().expect("testing sink mutex poisoned").clone()
    }
}

impl Sink for TestingSink {
    fn build(&self, _worker_index: usize, _worker_count: usize) -> Box<dyn SinkPartition> {
        Box::new(TestingSinkPartition {
            captured: self.captured.clone(),
        })
    }
}

struct TestingSinkPartition {
    captured: Arc<Mutex<Vec<Item>>>,
}

impl SinkPartition for TestingSinkPartition {
    fn write_batch(&mut self, items: &[Item]) {
        self.captured
            .lock()
            .expect("testing sink mutex poisoned")
            .extend_from_slice(items);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_items_once_then_eof() {
        let source = TestingSource::new(vec![Item::new(1i64), Item::new(2i64)]);
        let mut part = source.build_part("part-0", None);
        assert_eq!(part.next_batch().len(), 1);
        assert_eq!(part.next_batch().len(), 1);
        assert!(part.next_batch().is_empty());
        assert!(part.is_eof());
    }

    #[test]
    fn sink_captures_every_write() {
        let sink = TestingSink::new();
        let mut part = sink.build(0, 1);
        part.write_batch(&[Item::new(1i64), Item::new(2i64)]);
        assert_eq!(sink.captured().len(), 2);
    }
}
