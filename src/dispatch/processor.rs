//! # Job Processors
//!
//! The processing seam of the worker pool. The benchmark uses
//! [`SimulatedProcessor`], which stands in for real work with a fixed delay
//! and cannot fail; other processors may fail, in which case the worker
//! settles the job according to the configured [`FailurePolicy`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::messaging::Job;

/// A job could not be processed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Processing failed for message {message_id}: {reason}")]
pub struct ProcessingError {
    pub message_id: u64,
    pub reason: String,
}

impl ProcessingError {
    pub fn new(message_id: u64, reason: impl Into<String>) -> Self {
        Self {
            message_id,
            reason: reason.into(),
        }
    }
}

/// How a worker settles a job whose processing failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Negatively acknowledge and return the message to the queue
    Requeue,
    /// Negatively acknowledge without requeue (dead-lettered when the queue
    /// has a dead letter exchange, discarded otherwise)
    #[default]
    DeadLetter,
}

impl FailurePolicy {
    pub fn requeue(&self) -> bool {
        matches!(self, Self::Requeue)
    }
}

/// Work performed on each job
#[async_trait]
pub trait JobProcessor: Send + Sync + 'static {
    /// Process one job on behalf of worker `worker_id`
    async fn process(&self, worker_id: usize, job: &Job) -> Result<(), ProcessingError>;

    /// Name of this processor for logging purposes
    fn name(&self) -> &str;
}

/// Sleeps for a fixed delay per job
#[derive(Debug, Clone, Copy)]
pub struct SimulatedProcessor {
    delay: Duration,
}

impl SimulatedProcessor {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl JobProcessor for SimulatedProcessor {
    async fn process(&self, _worker_id: usize, _job: &Job) -> Result<(), ProcessingError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_simulated_processor_waits_for_delay() {
        let processor = SimulatedProcessor::new(Duration::from_millis(20));
        let job = Job::auto_acked(1, vec![]);

        let started = Instant::now();
        processor.process(0, &job).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_failure_policy_serde() {
        let policy: FailurePolicy = serde_json::from_str("\"requeue\"").unwrap();
        assert!(policy.requeue());
        assert_eq!(FailurePolicy::default(), FailurePolicy::DeadLetter);
        assert!(!FailurePolicy::DeadLetter.requeue());
    }
}
