//! C6 `exchange` primitive: stable key-based routing of items to the
//! worker that owns their partition.

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::dataflow::NodeId;
use crate::item::{as_keyed, Item};

/// FNV-1a: a stable, dependency-free, non-cryptographic hash. Routing
/// decisions must agree across every worker's copy of the same
/// [`crate::dataflow::Dataflow`], which rules out std's randomized
/// default hasher.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

pub fn worker_for_key(key: &str, worker_count: usize) -> usize {
    debug_assert!(worker_count > 0);
    (fnv1a(key.as_bytes()) % worker_count as u64) as usize
}

#[derive(Clone)]
pub struct ExchangeMessage {
    /// The `exchange` node whose "down" output the receiving worker
    /// should propagate from — identical across every worker's copy of
    /// the dataflow, since all workers share the same lowered IR.
    pub node: NodeId,
    pub item: Item,
}

/// One routing fabric shared by every worker: a bounded MPMC channel per
/// destination worker.
pub struct ExchangeFabric {
    senders: Vec<Sender<ExchangeMessage>>,
    receivers: Vec<Receiver<ExchangeMessage>>,
}

impl ExchangeFabric {
    pub fn new(worker_count: usize, capacity: usize) -> Self {
        let mut senders = Vec::with_capacity(worker_count);
        let mut receivers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let (tx, rx) = bounded(capacity);
            senders.push(tx);
            receivers.push(rx);
        }
        ExchangeFabric { senders, receivers }
    }

    pub fn worker_count(&self) -> usize {
        self.senders.len()
    }

    /// Route `item` to the worker owning its key. Panics if `item` is not
    /// a keyed `(string, _)` pair — the planner only ever places an
    /// `exchange` primitive directly upstream of a keyed `unary`, so a
    /// non-keyed item reaching here is an engine bug, not user input.
    pub fn send(&self, node: NodeId, item: Item) {
        let (key, _) = as_keyed(&item).expect("exchange primitive only ever receives keyed items");
        let dest = worker_for_key(key, self.senders.len());
        let _ = self.senders[dest].send(ExchangeMessage { node, item });
    }

    pub fn receiver(&self, worker_index: usize) -> &Receiver<ExchangeMessage> {
        &self.receivers[worker_index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_is_deterministic_across_calls() {
        let a = worker_for_key("server-1", 4);
        let b = worker_for_key("server-1", 4);
        assert_eq!(a, b);
    }

    #[test]
    fn distributes_keys_across_workers() {
        let mut seen = std::collections::HashSet::new();
        for i in 0..64 {
            seen.insert(worker_for_key(&format!("key-{i}"), 4));
        }
        assert!(seen.len() > 1, "expected keys to spread across more than one worker");
    }
}
