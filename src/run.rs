//! Public entry point: lower a built [`Dataflow`], fan it out across
//! `worker_count` OS threads, and run it to completion.

use std::sync::Arc;

use crate::dataflow::Dataflow;
use crate::errors::FlowError;
use crate::exchange::ExchangeFabric;
use crate::planner;
use crate::recovery::SnapshotStore;
use crate::worker::{ExecutionGraph, Worker};

const EXCHANGE_CHANNEL_CAPACITY: usize = 1024;

/// Lower `flow` and run it to completion across `worker_count` threads.
/// Returns once every input partition has reported EOF, every exchange
/// inbox is drained, and no timer remains.
pub fn run(flow: Dataflow, worker_count: usize) -> Result<(), FlowError> {
    run_with_recovery(flow, worker_count, None)
}

/// Like [`run`], but restores each worker's owned per-key state from
/// `store`'s committed epoch before it starts, and snapshots the whole
/// pool's final state back to `store` under the next epoch once every
/// worker has drained (§4.7).
pub fn run_with_recovery(
    mut flow: Dataflow,
    worker_count: usize,
    store: Option<Arc<dyn SnapshotStore>>,
) -> Result<(), FlowError> {
    assert!(worker_count > 0, "worker_count must be at least 1");
    planner::lower(&mut flow)?;

    let graph = Arc::new(ExecutionGraph::build(flow));
    let exchange = Arc::new(ExchangeFabric::new(worker_count, EXCHANGE_CHANNEL_CAPACITY));

    let mut workers: Vec<Worker> = (0..worker_count)
        .map(|i| Worker::new(graph.clone(), i, worker_count, exchange.clone()))
        .collect();

    if let Some(store) = &store {
        for worker in workers.iter_mut() {
            worker.restore_from(store.as_ref());
        }
    }

    let handles: Vec<_> = workers
        .into_iter()
        .map(|mut worker| std::thread::spawn(move || worker.run().map(|()| worker)))
        .collect();

    let mut finished = Vec::with_capacity(worker_count);
    let mut first_err = None;
    for handle in handles {
        match handle.join().expect("worker thread panicked") {
            Ok(worker) => finished.push(worker),
            Err(e) if first_err.is_none() => first_err = Some(e),
            Err(_) => {}
        }
    }
    if let Some(e) = first_err {
        return Err(FlowError::from(e));
    }

    if let Some(store) = &store {
        let epoch = store.committed_epoch().map(|e| e + 1).unwrap_or(0);
        for worker in &finished {
            worker.snapshot_into(store.as_ref(), epoch);
        }
        store.publish(epoch);
    }

    Ok(())
}
