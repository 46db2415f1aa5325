//! Window assigners (§4.6) and the `unary` logic that drives them.
//!
//! `reduce_window` lowers to a `unary` primitive whose logic is a
//! [`WindowLogic`]: window bookkeeping is ordinary per-key state, not a
//! separate subsystem bypassing the one stateful primitive.

use std::sync::Arc;

use crate::clock::{Clock, Timestamp};
use crate::errors::RunError;
use crate::item::Item;
use crate::operators::{Fate, ReducerFn, UnaryLogic};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct WindowId {
    pub start: Timestamp,
    pub end: Timestamp,
}

/// Metadata attached to a finalized window's emission:
/// `(key, (WindowMetadata, value))`.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct WindowMetadata {
    pub open_time: Timestamp,
    pub close_time: Timestamp,
}

/// Decides which window(s) a timestamp belongs to, given the windows
/// already open for this key (needed for session merging).
pub trait Assigner: Send + Sync {
    fn assign(&self, ts: Timestamp, existing: &[WindowId]) -> Vec<WindowId>;
}

pub struct Tumbling {
    pub length_ms: i64,
    pub align_to: Timestamp,
}

impl Assigner for Tumbling {
    fn assign(&self, ts: Timestamp, _existing: &[WindowId]) -> Vec<WindowId> {
        let idx = (ts - self.align_to).div_euclid(self.length_ms);
        let start = self.align_to + idx * self.length_ms;
        vec![WindowId {
            start,
            end: start + self.length_ms,
        }]
    }
}

pub struct Sliding {
    pub length_ms: i64,
    pub offset_ms: i64,
    pub align_to: Timestamp,
}

impl Assigner for Sliding {
    fn assign(&self, ts: Timestamp, _existing: &[WindowId]) -> Vec<WindowId> {
        let mut out = Vec::new();
        let mut k = (ts - self.length_ms - self.align_to).div_euclid(self.offset_ms);
        loop {
            let start = self.align_to + k * self.offset_ms;
            if start > ts {
                break;
            }
            let end = start + self.length_ms;
            if ts < end {
                out.push(WindowId { start, end });
            }
            k += 1;
        }
        out
    }
}

pub struct Session {
    pub gap_ms: i64,
}

impl Assigner for Session {
    fn assign(&self, ts: Timestamp, existing: &[WindowId]) -> Vec<WindowId> {
        // A session stays open until `gap_ms` of inactivity elapses, so its
        // `end` is always the last-seen timestamp plus the gap, not the
        // timestamp itself — that's what makes `WindowLogic` wait for the
        // gap before firing instead of closing on the very next tick.
        let mut start = ts;
        let mut end = ts + self.gap_ms;
        for w in existing {
            if ts >= w.start - self.gap_ms && ts <= w.end {
                start = start.min(w.start);
                end = end.max(w.end);
            }
        }
        vec![WindowId { start, end }]
    }
}

/// Per-key window state and firing for `reduce_window`.
pub struct WindowLogic {
    clock: Arc<dyn Clock>,
    assigner: Arc<dyn Assigner>,
    reducer: ReducerFn,
    windows: Vec<(WindowId, Item)>,
    latest_seen: Timestamp,
}

impl WindowLogic {
    pub fn new(clock: Arc<dyn Clock>, assigner: Arc<dyn Assigner>, reducer: ReducerFn) -> Self {
        WindowLogic {
            clock,
            assigner,
            reducer,
            windows: Vec::new(),
            latest_seen: Timestamp::MIN,
        }
    }

    fn emit(id: WindowId, acc: Item) -> Item {
        let meta = WindowMetadata {
            open_time: id.start,
            close_time: id.end,
        };
        Item::new((meta, acc))
    }
}

impl UnaryLogic for WindowLogic {
    fn on_item(&mut self, now: Timestamp, value: Item) -> Result<(Vec<Item>, Fate), RunError> {
        let ts = self.clock.timestamp_of(now, &value);
        self.latest_seen = self.latest_seen.max(ts);
        let watermark = self.clock.watermark(self.latest_seen);

        let existing_ids: Vec<WindowId> = self.windows.iter().map(|(id, _)| *id).collect();
        let assigned = self.assigner.assign(ts, &existing_ids);

        if assigned.iter().all(|w| w.end <= watermark) {
            tracing::debug!(ts, watermark, "dropping late item");
            return Ok((Vec::new(), Fate::Retain));
        }

        for wid in assigned {
            let mut merged: Option<Item> = None;
            let mut keep = Vec::with_capacity(self.windows.len());
            for (eid, eacc) in self.windows.drain(..) {
                if eid.start < wid.end && eid.end > wid.start {
                    merged = Some(match merged {
                        None => eacc,
                        Some(acc) => (self.reducer)(acc, eacc),
                    });
                } else {
                    keep.push((eid, eacc));
                }
            }
            self.windows = keep;
            let acc = match merged {
                None => value.clone(),
                Some(acc) => (self.reducer)(acc, value.clone()),
            };
            self.windows.push((wid, acc));
        }

        Ok((Vec::new(), Fate::Retain))
    }

    fn on_notify(&mut self, now: Timestamp) -> Result<Vec<Item>, RunError> {
        let mut fired = Vec::new();
        let mut remaining = Vec::new();
        for (id, acc) in self.windows.drain(..) {
            if id.end <= now {
                fired.push(Self::emit(id, acc));
            } else {
                remaining.push((id, acc));
            }
        }
        self.windows = remaining;
        Ok(fired)
    }

    fn on_eof(&mut self) -> Result<Vec<Item>, RunError> {
        Ok(self.windows.drain(..).map(|(id, acc)| Self::emit(id, acc)).collect())
    }

    fn notify_at(&self) -> Option<Timestamp> {
        self.windows.iter().map(|(id, _)| id.end).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    fn sum(a: Item, b: Item) -> Item {
        Item::new(*a.downcast_ref::<i64>().unwrap() + *b.downcast_ref::<i64>().unwrap())
    }

    #[test]
    fn tumbling_assigns_a_single_aligned_window() {
        let assigner = Tumbling { length_ms: 100, align_to: 0 };
        assert_eq!(assigner.assign(120, &[]), vec![WindowId { start: 100, end: 200 }]);
        assert_eq!(assigner.assign(0, &[]), vec![WindowId { start: 0, end: 100 }]);
    }

    #[test]
    fn sliding_assigns_every_window_that_covers_the_timestamp() {
        let assigner = Sliding { length_ms: 100, offset_ms: 50, align_to: 0 };
        assert_eq!(
            assigner.assign(120, &[]),
            vec![WindowId { start: 50, end: 150 }, WindowId { start: 100, end: 200 }]
        );
    }

    #[test]
    fn session_does_not_merge_an_item_past_the_gap() {
        let assigner = Session { gap_ms: 50 };
        let first = assigner.assign(0, &[]);
        assert_eq!(first, vec![WindowId { start: 0, end: 50 }]);
        let second = assigner.assign(100, &first);
        assert_eq!(second, vec![WindowId { start: 100, end: 150 }]);
    }

    #[test]
    fn session_merges_an_item_within_the_gap() {
        let assigner = Session { gap_ms: 50 };
        let first = assigner.assign(0, &[]);
        let merged = assigner.assign(30, &first);
        assert_eq!(merged, vec![WindowId { start: 0, end: 80 }]);
    }

    #[test]
    fn session_window_waits_for_the_gap_before_firing() {
        let mut logic = WindowLogic::new(Arc::new(SystemClock), Arc::new(Session { gap_ms: 50 }), Arc::new(sum));
        logic.on_item(0, Item::new(1i64)).unwrap();
        assert_eq!(logic.notify_at(), Some(50));
        assert!(logic.on_notify(10).unwrap().is_empty(), "must not fire before the gap elapses");
        let fired = logic.on_notify(50).unwrap();
        assert_eq!(fired.len(), 1);
    }

    #[test]
    fn session_window_bridges_two_existing_windows_via_a_later_item() {
        let mut logic = WindowLogic::new(Arc::new(SystemClock), Arc::new(Session { gap_ms: 100 }), Arc::new(sum));
        logic.on_item(0, Item::new(1i64)).unwrap();
        logic.on_item(150, Item::new(2i64)).unwrap();
        assert!(logic.on_notify(99).unwrap().is_empty(), "first session isn't due until the bridging item is accounted for");

        logic.on_item(75, Item::new(4i64)).unwrap();
        assert_eq!(logic.notify_at(), Some(250), "bridging item should merge both sessions into one");

        let fired = logic.on_notify(250).unwrap();
        assert_eq!(fired.len(), 1);
        let (meta, acc) = fired[0].downcast_ref::<(WindowMetadata, Item)>().unwrap();
        assert_eq!(meta.open_time, 0);
        assert_eq!(meta.close_time, 250);
        assert_eq!(*acc.downcast_ref::<i64>().unwrap(), 7);
    }
}
