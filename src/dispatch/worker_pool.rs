//! # Worker Pool
//!
//! A fixed set of workers sharing one handoff receiver. Each worker pulls a
//! job, processes it, settles it with the broker, and pulls again; it exits
//! only when the handoff is closed and empty. At most `worker_count` jobs are
//! in processing at any instant because each worker holds at most one.
//!
//! Worker ids are ordinals in `[0, worker_count)` and carry no state beyond
//! the pool that spawned them.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, trace, warn};

use super::handoff::HandoffReceiver;
use super::processor::{FailurePolicy, JobProcessor, SimulatedProcessor};
use super::DispatchError;

/// Pool configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Number of concurrent workers
    pub worker_count: usize,
    /// Settlement of jobs whose processing failed
    pub failure_policy: FailurePolicy,
}

impl WorkerPoolConfig {
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count,
            failure_policy: FailurePolicy::default(),
        }
    }

    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }
}

/// Per-worker totals for one pool run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerSummary {
    pub worker_id: usize,
    pub processed: usize,
    pub failed: usize,
}

/// Totals for a completed pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolReport {
    /// One summary per worker, ordered by worker id
    pub workers: Vec<WorkerSummary>,
}

impl PoolReport {
    /// Jobs processed successfully across all workers
    pub fn processed(&self) -> usize {
        self.workers.iter().map(|w| w.processed).sum()
    }

    /// Jobs whose processing failed across all workers
    pub fn failed(&self) -> usize {
        self.workers.iter().map(|w| w.failed).sum()
    }
}

/// Spawns worker pools
#[derive(Debug)]
pub struct WorkerPool;

impl WorkerPool {
    /// Start `worker_count` workers that simulate processing with `delay`
    pub fn spawn(
        worker_count: usize,
        delay: Duration,
        jobs: HandoffReceiver,
    ) -> Result<PoolHandle, DispatchError> {
        Self::spawn_with(
            WorkerPoolConfig::new(worker_count),
            Arc::new(SimulatedProcessor::new(delay)),
            jobs,
        )
    }

    /// Start a pool with an explicit configuration and processor
    pub fn spawn_with(
        config: WorkerPoolConfig,
        processor: Arc<dyn JobProcessor>,
        jobs: HandoffReceiver,
    ) -> Result<PoolHandle, DispatchError> {
        if config.worker_count == 0 {
            return Err(DispatchError::InvalidPoolSize {
                worker_count: config.worker_count,
            });
        }

        debug!(
            worker_count = config.worker_count,
            processor = processor.name(),
            failure_policy = ?config.failure_policy,
            "Launching workers"
        );

        let mut workers = JoinSet::new();
        for worker_id in 0..config.worker_count {
            workers.spawn(run_worker(
                worker_id,
                processor.clone(),
                jobs.clone(),
                config.failure_policy,
            ));
        }

        Ok(PoolHandle {
            workers,
            worker_count: config.worker_count,
        })
    }
}

/// Completion handle of a running pool
///
/// Dropping the handle aborts every worker still running.
#[derive(Debug)]
pub struct PoolHandle {
    workers: JoinSet<Result<WorkerSummary, DispatchError>>,
    worker_count: usize,
}

impl PoolHandle {
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Wait until every worker has exited
    ///
    /// Resolves only after all workers return, even when one of them fails;
    /// the first failure is then reported.
    pub async fn wait(mut self) -> Result<PoolReport, DispatchError> {
        let mut summaries = Vec::with_capacity(self.worker_count);
        let mut first_error = None;

        while let Some(joined) = self.workers.join_next().await {
            match joined {
                Ok(Ok(summary)) => summaries.push(summary),
                Ok(Err(err)) => {
                    error!(error = %err, "Worker failed");
                    first_error.get_or_insert(err);
                }
                Err(join_err) => {
                    error!(error = %join_err, "Worker task did not complete");
                    first_error.get_or_insert(DispatchError::worker_aborted(join_err.to_string()));
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }

        summaries.sort_by_key(|s| s.worker_id);
        debug!(workers = summaries.len(), "All workers exited");
        Ok(PoolReport { workers: summaries })
    }
}

async fn run_worker(
    worker_id: usize,
    processor: Arc<dyn JobProcessor>,
    jobs: HandoffReceiver,
    failure_policy: FailurePolicy,
) -> Result<WorkerSummary, DispatchError> {
    let mut summary = WorkerSummary {
        worker_id,
        ..Default::default()
    };

    while let Some(job) = jobs.recv().await {
        let message_id = job.message_id;
        trace!(worker_id, message_id, body = %job.body(), "Worker processing message");

        match processor.process(worker_id, &job).await {
            Ok(()) => {
                job.ack().await?;
                summary.processed += 1;
                trace!(worker_id, message_id, "Worker done processing message");
            }
            Err(err) => {
                summary.failed += 1;
                warn!(
                    worker_id,
                    message_id,
                    error = %err,
                    requeue = failure_policy.requeue(),
                    "Processing failed, rejecting message"
                );
                job.nack(failure_policy.requeue()).await?;
            }
        }
    }

    debug!(
        worker_id,
        processed = summary.processed,
        failed = summary.failed,
        "Worker exiting: handoff drained"
    );
    Ok(summary)
}
