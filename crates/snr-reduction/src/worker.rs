// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Node dispatch: sequential, or a pool of scoped worker threads.
//!
//! Threads are only used when the simulator is reentrant. Otherwise every
//! node runs on the calling thread, its session released before the next
//! node acquires one.
//!
//! Node ids are dealt to workers round-robin up front. Each worker runs the
//! Node Reducer for its nodes one at a time (each node acquires its own
//! simulator session) and sends outcomes to the coordinating thread over a
//! channel. Only the coordinator counts failures; once they exceed the
//! threshold it raises the cancel flag and workers stop taking new nodes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam::channel;
use tracing::{debug, warn};

use crate::error::{RunError, RunResult};
use crate::node_reducer::{NodeOutcome, NodeReducer};

/// Everything the pool produced for one population
#[derive(Debug)]
pub struct PoolRun {
    /// Sorted by node id
    pub outcomes: Vec<NodeOutcome>,
    pub failures: usize,
    /// The failure threshold was exceeded and dispatch stopped early
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
    failure_threshold: usize,
}

impl WorkerPool {
    pub fn new(workers: usize, failure_threshold: usize) -> Self {
        Self {
            workers: workers.max(1),
            failure_threshold,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn run(&self, reducer: &NodeReducer<'_>, node_ids: &[u64]) -> RunResult<PoolRun> {
        let mut workers = self.workers.min(node_ids.len().max(1));
        if workers > 1 && !reducer.simulator().is_reentrant() {
            warn!(
                target: "snr-reduction",
                "[POOL] {}: simulator '{}' is not reentrant; running sequentially instead of on {} workers",
                reducer.population(),
                reducer.simulator().name(),
                workers
            );
            workers = 1;
        }
        debug!(
            target: "snr-reduction",
            "[POOL] {}: {} nodes on {} worker(s)",
            reducer.population(),
            node_ids.len(),
            workers
        );
        let mut run = if workers <= 1 {
            self.run_sequential(reducer, node_ids)
        } else {
            self.run_parallel(reducer, node_ids, workers)?
        };
        run.outcomes.sort_by_key(NodeOutcome::node_id);
        Ok(run)
    }

    fn run_sequential(&self, reducer: &NodeReducer<'_>, node_ids: &[u64]) -> PoolRun {
        let mut outcomes = Vec::with_capacity(node_ids.len());
        let mut failures = 0;
        let mut cancelled = false;
        for &node_id in node_ids {
            let outcome = reducer.reduce(node_id);
            if outcome.is_failed() {
                failures += 1;
            }
            outcomes.push(outcome);
            if failures > self.failure_threshold {
                self.log_cancel(reducer, failures);
                cancelled = true;
                break;
            }
        }
        PoolRun {
            outcomes,
            failures,
            cancelled,
        }
    }

    fn run_parallel(
        &self,
        reducer: &NodeReducer<'_>,
        node_ids: &[u64],
        workers: usize,
    ) -> RunResult<PoolRun> {
        let cancel = AtomicBool::new(false);
        let (tx, rx) = channel::unbounded::<NodeOutcome>();

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);
            for worker in 0..workers {
                let assigned: Vec<u64> = node_ids.iter().copied().skip(worker).step_by(workers).collect();
                let tx = tx.clone();
                let cancel = &cancel;
                let handle = thread::Builder::new()
                    .name(format!("snr-worker-{}", worker))
                    .spawn_scoped(scope, move || {
                        for node_id in assigned {
                            if cancel.load(Ordering::Acquire) {
                                break;
                            }
                            if tx.send(reducer.reduce(node_id)).is_err() {
                                break;
                            }
                        }
                    })
                    .map_err(|e| {
                        cancel.store(true, Ordering::Release);
                        RunError::Worker(format!("failed to spawn worker {}: {}", worker, e))
                    })?;
                handles.push(handle);
            }
            drop(tx);

            let mut outcomes = Vec::with_capacity(node_ids.len());
            let mut failures = 0;
            for outcome in rx.iter() {
                if outcome.is_failed() {
                    failures += 1;
                    if failures > self.failure_threshold && !cancel.swap(true, Ordering::AcqRel) {
                        self.log_cancel(reducer, failures);
                    }
                }
                outcomes.push(outcome);
            }

            for (worker, handle) in handles.into_iter().enumerate() {
                handle
                    .join()
                    .map_err(|_| RunError::Worker(format!("worker {} panicked", worker)))?;
            }

            Ok(PoolRun {
                outcomes,
                failures,
                cancelled: cancel.load(Ordering::Acquire),
            })
        })
    }

    fn log_cancel(&self, reducer: &NodeReducer<'_>, failures: usize) {
        warn!(
            target: "snr-reduction",
            "[POOL] {}: {} failures exceed the threshold of {}; no further nodes dispatched",
            reducer.population(),
            failures,
            self.failure_threshold
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{ReductionAdapter, ReductionOptions};
    use crate::cable::EquivalentCableReduction;
    use crate::testing::{CircuitFixture, CountingSimulator};
    use snr_circuit::{CircuitStore, JsonCircuitStore};
    use snr_morphology::{CableSimulator, Simulator};
    use std::sync::Arc;

    fn summary(run: &PoolRun) -> Vec<(u64, &'static str)> {
        run.outcomes
            .iter()
            .map(|o| {
                let kind = match o {
                    NodeOutcome::Reduced(_) => "reduced",
                    NodeOutcome::Skipped { .. } => "skipped",
                    NodeOutcome::Failed { .. } => "failed",
                };
                (o.node_id(), kind)
            })
            .collect()
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let fixture = CircuitFixture::new()
            .cortex_nodes(7)
            .morphologies(&["pyramidal", "stellate", "axon_only"])
            .point_nodes(&[4])
            .build()
            .unwrap();
        let circuit = JsonCircuitStore::new()
            .read_circuit(fixture.config_path())
            .unwrap();
        let adapter = ReductionAdapter::new(Arc::new(EquivalentCableReduction::new()));
        let simulator = CableSimulator::new();
        let options = ReductionOptions::default();
        let reducer = NodeReducer::new(&circuit, "cortex", &adapter, &simulator, &options).unwrap();
        let ids: Vec<u64> = (0..7).collect();

        let sequential = WorkerPool::new(1, 5).run(&reducer, &ids).unwrap();
        let parallel = WorkerPool::new(3, 5).run(&reducer, &ids).unwrap();
        assert_eq!(summary(&sequential), summary(&parallel));
        assert_eq!(sequential.failures, 2);
        assert!(!parallel.cancelled);

        for (a, b) in sequential.outcomes.iter().zip(&parallel.outcomes) {
            if let (NodeOutcome::Reduced(a), NodeOutcome::Reduced(b)) = (a, b) {
                assert_eq!(a.artifacts, b.artifacts);
                assert_eq!(a.edge_rewrites, b.edge_rewrites);
            }
        }
    }

    #[test]
    fn test_stops_dispatch_after_threshold() {
        let fixture = CircuitFixture::new()
            .cortex_nodes(12)
            .morphologies(&["axon_only"])
            .build()
            .unwrap();
        let circuit = JsonCircuitStore::new()
            .read_circuit(fixture.config_path())
            .unwrap();
        let adapter = ReductionAdapter::new(Arc::new(EquivalentCableReduction::new()));
        let simulator = CableSimulator::new();
        let options = ReductionOptions::default();
        let reducer = NodeReducer::new(&circuit, "cortex", &adapter, &simulator, &options).unwrap();
        let ids: Vec<u64> = (0..12).collect();

        let sequential = WorkerPool::new(1, 5).run(&reducer, &ids).unwrap();
        assert!(sequential.cancelled);
        assert_eq!(sequential.failures, 6);
        assert_eq!(sequential.outcomes.len(), 6);

        let parallel = WorkerPool::new(2, 5).run(&reducer, &ids).unwrap();
        assert!(parallel.cancelled);
        assert!(parallel.failures > 5);
    }

    #[test]
    fn test_non_reentrant_simulator_runs_sequentially() {
        let fixture = CircuitFixture::new()
            .cortex_nodes(6)
            .morphologies(&["pyramidal", "stellate"])
            .build()
            .unwrap();
        let circuit = JsonCircuitStore::new()
            .read_circuit(fixture.config_path())
            .unwrap();
        let adapter = ReductionAdapter::new(Arc::new(EquivalentCableReduction::new()));
        let simulator = CountingSimulator::non_reentrant();
        let options = ReductionOptions::default();
        let reducer = NodeReducer::new(&circuit, "cortex", &adapter, &simulator, &options).unwrap();
        let ids: Vec<u64> = (0..6).collect();

        let run = WorkerPool::new(4, 5).run(&reducer, &ids).unwrap();
        assert_eq!(run.failures, 0);
        assert_eq!(run.outcomes.len(), 6);
        assert_eq!(simulator.acquired(), 6);
        assert_eq!(simulator.peak_open(), 1);
    }

    #[test]
    fn test_counting_simulator_reentrancy() {
        let simulator = CountingSimulator::new();
        assert!(simulator.is_reentrant());
        assert!(!CountingSimulator::non_reentrant().is_reentrant());
    }
}
