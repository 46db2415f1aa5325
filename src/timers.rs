//! Per-worker timer heap: schedules `on_notify` callbacks for
//! `(step_id, key)` pairs at the time their [`UnaryLogic::notify_at`]
//! requests (§4.6, window firing; §4.1, unary's notify contract).

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::clock::Timestamp;
use crate::dataflow::StepId;

#[derive(Debug, Clone, Eq, PartialEq)]
struct Entry {
    at: Timestamp,
    step_id: StepId,
    key: String,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so `BinaryHeap` (a max-heap) pops the earliest time.
        other.at.cmp(&self.at)
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
pub struct TimerHeap {
    heap: BinaryHeap<Entry>,
}

impl TimerHeap {
    pub fn new() -> Self {
        TimerHeap::default()
    }

    pub fn schedule(&mut self, at: Timestamp, step_id: StepId, key: impl Into<String>) {
        self.heap.push(Entry {
            at,
            step_id,
            key: key.into(),
        });
    }

    pub fn peek_time(&self) -> Option<Timestamp> {
        self.heap.peek().map(|e| e.at)
    }

    /// Pop every entry due at or before `now`.
    pub fn drain_due(&mut self, now: Timestamp) -> Vec<(StepId, String)> {
        let mut due = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.at > now {
                break;
            }
            let entry = self.heap.pop().unwrap();
            due.push((entry.step_id, entry.key));
        }
        due
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(s: &str) -> StepId {
        StepId(s.to_string())
    }

    #[test]
    fn drains_in_time_order() {
        let mut heap = TimerHeap::new();
        heap.schedule(30, sid("s"), "a");
        heap.schedule(10, sid("s"), "b");
        heap.schedule(20, sid("s"), "c");
        let due = heap.drain_due(20);
        assert_eq!(
            due,
            vec![(sid("s"), "b".to_string()), (sid("s"), "c".to_string())]
        );
        assert_eq!(heap.peek_time(), Some(30));
    }
}
