use std::sync::Arc;
use std::time::Duration;

use flowcore::builder::Scope;
use flowcore::clock::SystemClock;
use flowcore::dataflow::Dataflow;
use flowcore::io::{PartitionedSource, SourcePartition};
use flowcore::item::{as_keyed, Item};
use flowcore::operators::StatefulMapResult;
use flowcore::run;
use flowcore::testing::TestingSink;
use flowcore::window::{Tumbling, WindowMetadata};

/// A single-partition source that hands out two fixed batches with a real
/// pause between them, so a wall-clock tumbling window genuinely closes
/// between the two — there's no other way to drive event-time-free,
/// arrival-time windowing deterministically.
struct TwoBatchSource {
    first: Vec<Item>,
    second: Vec<Item>,
    pause: Duration,
}

struct TwoBatchPartition {
    first: Option<Vec<Item>>,
    second: Option<Vec<Item>>,
    pause: Duration,
}

impl PartitionedSource for TwoBatchSource {
    fn list_parts(&self) -> Vec<String> {
        vec!["part-0".to_string()]
    }

    fn build_part(&self, _key: &str, _resume_state: Option<&[u8]>) -> Box<dyn SourcePartition> {
        Box::new(TwoBatchPartition {
            first: Some(self.first.clone()),
            second: Some(self.second.clone()),
            pause: self.pause,
        })
    }
}

impl SourcePartition for TwoBatchPartition {
    fn next_batch(&mut self) -> Vec<Item> {
        if let Some(batch) = self.first.take() {
            return batch;
        }
        if let Some(batch) = self.second.take() {
            std::thread::sleep(self.pause);
            return batch;
        }
        Vec::new()
    }

    fn is_eof(&self) -> bool {
        self.first.is_none() && self.second.is_none()
    }
}

/// `reduce_window` sums same-key counts within wall-clock tumbling
/// windows, then `stateful_map` tracks the running max window-sum per
/// key, mirroring the `sum` -> `keep_max` chain of the original
/// event-stream example.
#[test]
fn sums_per_window_then_tracks_running_max() {
    let window_ms: i64 = 150;
    let source = Arc::new(TwoBatchSource {
        first: vec![
            Item::new("a".to_string()),
            Item::new("a".to_string()),
            Item::new("a".to_string()),
            Item::new("b".to_string()),
        ],
        second: vec![
            Item::new("a".to_string()),
            Item::new("a".to_string()),
            Item::new("b".to_string()),
            Item::new("b".to_string()),
        ],
        pause: Duration::from_millis(window_ms as u64 * 2),
    });
    let sink = TestingSink::new();

    let mut flow = Dataflow::new("window_df").unwrap();
    {
        let mut scope = Scope::new(&mut flow);
        let s = scope.input("inp", source).unwrap();
        let s = scope
            .key_on("key", &s, Arc::new(|item: &Item| item.downcast_ref::<String>().unwrap().clone()))
            .unwrap();
        let s = scope
            .map_value("to_count", &s, Arc::new(|_item: Item| Item::new(1i64)))
            .unwrap();

        let s = scope
            .reduce_window(
                "sum",
                &s,
                Arc::new(SystemClock),
                Arc::new(Tumbling {
                    length_ms: window_ms,
                    align_to: 0,
                }),
                Arc::new(|a: Item, b: Item| {
                    let sum = *a.downcast_ref::<i64>().unwrap() + *b.downcast_ref::<i64>().unwrap();
                    Item::new(sum)
                }),
            )
            .unwrap();

        let build_state = Arc::new(|| Item::new(0i64));
        let mapper = Arc::new(|state: Option<Item>, windowed: Item| {
            let max_so_far = *state.unwrap().downcast_ref::<i64>().unwrap();
            let (_meta, acc) = windowed.downcast_ref::<(WindowMetadata, Item)>().unwrap();
            let count = *acc.downcast_ref::<i64>().unwrap();
            let new_max = max_so_far.max(count);
            let result: StatefulMapResult = (Some(Item::new(new_max)), Some(Item::new(new_max)));
            Item::new(result)
        });
        let s = scope.stateful_map("keep_max", &s, build_state, mapper).unwrap();
        scope.output("out", &s, Arc::new(sink.clone())).unwrap();
    }

    run::run(flow, 1).unwrap();

    let mut out: Vec<(String, i64)> = sink
        .captured()
        .into_iter()
        .map(|item| {
            let (k, v) = as_keyed(&item).unwrap();
            (k.clone(), *v.downcast_ref::<i64>().unwrap())
        })
        .collect();
    out.sort();
    out.dedup_by(|a, b| {
        if a.0 == b.0 {
            b.1 = b.1.max(a.1);
            true
        } else {
            false
        }
    });

    assert_eq!(out, vec![("a".to_string(), 3), ("b".to_string(), 2)]);
}
