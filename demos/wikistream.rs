//! Tumbling-window event counter over a synthetic stream of per-server
//! change events, tracking the running per-server max window count —
//! the same `sum` -> `keep_max` shape as the original live Wikimedia
//! change-stream example, fed from an in-memory stand-in since a live
//! SSE client is out of scope for this core.

use std::sync::Arc;

use flowcore::builder::Scope;
use flowcore::clock::SystemClock;
use flowcore::dataflow::Dataflow;
use flowcore::io::{Sink, SinkPartition};
use flowcore::item::Item;
use flowcore::operators::StatefulMapResult;
use flowcore::run;
use flowcore::testing::TestingSource;
use flowcore::window::{Tumbling, WindowMetadata};

struct StdoutSink;

impl Sink for StdoutSink {
    fn build(&self, _worker_index: usize, _worker_count: usize) -> Box<dyn SinkPartition> {
        Box::new(StdoutSinkPartition)
    }
}

struct StdoutSinkPartition;

impl SinkPartition for StdoutSinkPartition {
    fn write_batch(&mut self, items: &[Item]) {
        for item in items {
            let (server, line) = item
                .downcast_ref::<flowcore::item::KeyedValue>()
                .expect("keep_max emits (server, line)");
            println!("{}, {}", server, line.downcast_ref::<String>().unwrap());
        }
    }
}

fn main() -> Result<(), flowcore::FlowError> {
    tracing_subscriber::fmt::init();

    let servers = ["enwiki", "dewiki", "frwiki"];
    let events: Vec<Item> = (0..60)
        .map(|i| Item::new(servers[i % servers.len()].to_string()))
        .collect();
    let source = TestingSource::new(events);

    let mut flow = Dataflow::new("wikistream")?;
    {
        let mut scope = Scope::new(&mut flow);
        let inp = scope.input("inp", source)?;
        let keyed = scope.key_on("server_name", &inp, Arc::new(|item: &Item| item.downcast_ref::<String>().unwrap().clone()))?;
        let counted = scope.map_value("initial_count", &keyed, Arc::new(|_item: Item| Item::new(1i64)))?;
        let summed = scope.reduce_window(
            "sum",
            &counted,
            Arc::new(SystemClock),
            Arc::new(Tumbling {
                length_ms: 2_000,
                align_to: 0,
            }),
            Arc::new(|a: Item, b: Item| Item::new(a.downcast_ref::<i64>().unwrap() + b.downcast_ref::<i64>().unwrap())),
        )?;

        let build_state = Arc::new(|| Item::new(0i64));
        let keep_max = Arc::new(|state: Option<Item>, windowed: Item| {
            let max_so_far = *state.unwrap().downcast_ref::<i64>().unwrap();
            let (_meta, acc) = windowed.downcast_ref::<(WindowMetadata, Item)>().unwrap();
            let new_max = max_so_far.max(*acc.downcast_ref::<i64>().unwrap());
            let result: StatefulMapResult = (Some(Item::new(new_max)), Some(Item::new(new_max)));
            Item::new(result)
        });
        let maxed = scope.stateful_map("keep_max", &summed, build_state, keep_max)?;

        let formatted = scope.map_value(
            "format",
            &maxed,
            Arc::new(|item: Item| Item::new(format!("max_per_window={}", item.downcast_ref::<i64>().unwrap()))),
        )?;
        scope.output("out", &formatted, Arc::new(StdoutSink))?;
    }

    run::run(flow, 1)
}
