//! Wall-clock and event-time timestamps, and the two clock strategies a
//! window configuration can use (§4.6).

use std::time::{SystemTime, UNIX_EPOCH};

use crate::item::Item;

/// Milliseconds since the Unix epoch. Used both for wall-clock arrival
/// time and for item-embedded event time.
pub type Timestamp = i64;

pub fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as Timestamp
}

/// How a window assigner determines "now" for a given item.
pub trait Clock: Send + Sync {
    /// The timestamp to use for assigning `value` into windows, and the
    /// watermark to use for firing decisions (they differ only for
    /// event-time clocks, where late data may trail the watermark).
    fn timestamp_of(&self, arrival: Timestamp, value: &Item) -> Timestamp;

    /// The current watermark given the latest-seen timestamp so far.
    fn watermark(&self, latest_seen: Timestamp) -> Timestamp;
}

/// Uses the wall-clock time of arrival; no lateness is possible.
pub struct SystemClock;

impl Clock for SystemClock {
    fn timestamp_of(&self, arrival: Timestamp, _value: &Item) -> Timestamp {
        arrival
    }

    fn watermark(&self, latest_seen: Timestamp) -> Timestamp {
        latest_seen
    }
}

/// Uses a timestamp embedded in each item, with a grace period before
/// the watermark catches up (late items past the grace period are
/// dropped and counted, per §9's Open Questions resolution).
pub struct EventClock<F> {
    pub timestamp_fn: F,
    pub wait_for_late_ms: i64,
}

impl<F> EventClock<F>
where
    F: Fn(&Item) -> Timestamp + Send + Sync,
{
    pub fn new(timestamp_fn: F, wait_for_late_ms: i64) -> Self {
        EventClock {
            timestamp_fn,
            wait_for_late_ms,
        }
    }
}

impl<F> Clock for EventClock<F>
where
    F: Fn(&Item) -> Timestamp + Send + Sync,
{
    fn timestamp_of(&self, _arrival: Timestamp, value: &Item) -> Timestamp {
        (self.timestamp_fn)(value)
    }

    fn watermark(&self, latest_seen: Timestamp) -> Timestamp {
        latest_seen - self.wait_for_late_ms
    }
}
