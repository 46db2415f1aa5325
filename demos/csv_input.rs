//! Reads a CSV file row by row and writes each row to stdout, mirroring
//! the original file-source example.

use std::sync::Arc;

use flowcore::builder::Scope;
use flowcore::dataflow::Dataflow;
use flowcore::io::{PartitionedSource, Sink, SinkPartition, SourcePartition};
use flowcore::item::Item;
use flowcore::run;

const SAMPLE_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/demos/sample_data/ec2_metrics.csv");

/// A single CSV file read start-to-finish by one partition; resumable by
/// row index.
struct CsvSource {
    path: String,
}

impl PartitionedSource for CsvSource {
    fn list_parts(&self) -> Vec<String> {
        vec![self.path.clone()]
    }

    fn build_part(&self, _key: &str, resume_state: Option<&[u8]>) -> Box<dyn SourcePartition> {
        let mut reader = csv::Reader::from_path(&self.path).expect("sample CSV must be readable");
        let header = reader.headers().expect("CSV must carry a header row").clone();
        let mut rows: Vec<Vec<String>> = reader
            .records()
            .map(|r| r.expect("well-formed CSV row").iter().map(str::to_string).collect())
            .collect();

        let start = resume_state
            .and_then(|b| bincode::deserialize::<usize>(b).ok())
            .unwrap_or(0);
        rows.drain(0..start.min(rows.len()));

        Box::new(CsvPartition {
            header: header.iter().map(str::to_string).collect(),
            rows,
            consumed: start,
        })
    }
}

struct CsvPartition {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
    consumed: usize,
}

impl SourcePartition for CsvPartition {
    fn next_batch(&mut self) -> Vec<Item> {
        if self.rows.is_empty() {
            return Vec::new();
        }
        let row = self.rows.remove(0);
        self.consumed += 1;
        let record: Vec<(String, String)> = self.header.iter().cloned().zip(row).collect();
        vec![Item::new(record)]
    }

    fn is_eof(&self) -> bool {
        self.rows.is_empty()
    }

    fn snapshot(&self) -> Option<Vec<u8>> {
        bincode::serialize(&self.consumed).ok()
    }
}

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
            let row = item.downcast_ref::<Vec<(String, String)>>().expect("CSV rows emit (field, value) pairs");
            println!("{row:?}");
        }
    }
}

fn main() -> Result<(), flowcore::FlowError> {
    tracing_subscriber::fmt::init();

    let source = Arc::new(CsvSource {
        path: SAMPLE_PATH.to_string(),
    });
    let mut flow = Dataflow::new("csv_input")?;

    {
        let mut scope = Scope::new(&mut flow);
        let inp = scope.input("inp", source)?;
        scope.output("out", &inp, Arc::new(StdoutSink))?;
    }

    run::run(flow, 1)
}
