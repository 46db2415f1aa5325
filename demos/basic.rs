//! branch -> map -> merge -> map -> map over a fixed integer range,
//! printing every output line to stdout.

use std::sync::Arc;

use flowcore::builder::Scope;
use flowcore::dataflow::Dataflow;
use flowcore::io::{Sink, SinkPartition};
use flowcore::item::Item;
use flowcore::run;
use flowcore::testing::TestingSource;

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
            println!("{}", item.downcast_ref::<String>().expect("stringy emits String"));
        }
    }
}

fn main() -> Result<(), flowcore::FlowError> {
    tracing_subscriber::fmt::init();

    let source = TestingSource::new((0..10i32).map(Item::new).collect());
    let mut flow = Dataflow::new("basic")?;

    {
        let mut scope = Scope::new(&mut flow);
        let inp = scope.input("inp", source)?;
        let (evens, odds) = scope.branch("e_o", &inp, Arc::new(|item: &Item| item.downcast_ref::<i32>().unwrap() % 2 == 0))?;
        let evens = scope.map("halve", &evens, Arc::new(|item: Item| Item::new(item.downcast_ref::<i32>().unwrap() / 2)))?;
        let odds = scope.map("double", &odds, Arc::new(|item: Item| Item::new(item.downcast_ref::<i32>().unwrap() * 2)))?;
        let combo = scope.merge("merge", &[evens, odds])?;
        let combo = scope.map(
            "minus_one",
            &combo,
            Arc::new(|item: Item| Item::new(item.downcast_ref::<i32>().unwrap() - 1)),
        )?;
        let combo = scope.map(
            "stringy",
            &combo,
            Arc::new(|item: Item| Item::new(format!("<dance>{}</dance>", item.downcast_ref::<i32>().unwrap()))),
        )?;
        scope.output("out", &combo, Arc::new(StdoutSink))?;
    }

    run::run(flow, 1)
}
