//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use consumer_bench::dispatch::{JobProcessor, ProcessingError};
use consumer_bench::messaging::providers::InMemoryGateway;
use consumer_bench::messaging::{BrokerGateway, Job};
use parking_lot::Mutex;

pub const QUEUE: &str = "hello-queue";

/// Gateway with `count` messages already published to [`QUEUE`]
pub async fn seeded_gateway(count: usize) -> InMemoryGateway {
    let gateway = InMemoryGateway::new();
    gateway.ensure_queue(QUEUE).await.unwrap();
    for i in 0..count {
        gateway
            .publish(QUEUE, format!("Msg #{i}: fixture").as_bytes())
            .await
            .unwrap();
    }
    gateway
}

/// Records how many jobs are in processing at once and which ids were seen
#[derive(Default)]
pub struct ConcurrencyGauge {
    delay: Duration,
    current: AtomicUsize,
    peak: AtomicUsize,
    seen: Mutex<Vec<u64>>,
}

impl ConcurrencyGauge {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<u64> {
        self.seen.lock().clone()
    }

    pub fn distinct(&self) -> usize {
        self.seen.lock().iter().collect::<HashSet<_>>().len()
    }
}

#[async_trait]
impl JobProcessor for ConcurrencyGauge {
    async fn process(&self, _worker_id: usize, job: &Job) -> Result<(), ProcessingError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.seen.lock().push(job.message_id);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "concurrency-gauge"
    }
}

/// Sleeps long on one message id, not at all on the others
pub struct OneSlowJob {
    pub slow_id: u64,
    pub delay: Duration,
    pub finished: AtomicUsize,
}

#[async_trait]
impl JobProcessor for OneSlowJob {
    async fn process(&self, _worker_id: usize, job: &Job) -> Result<(), ProcessingError> {
        if job.message_id == self.slow_id {
            tokio::time::sleep(self.delay).await;
        }
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "one-slow-job"
    }
}

/// Fails every first delivery of `failing_id`, succeeds on redelivery
pub struct FailFirstAttempt {
    pub failing_id: u64,
}

#[async_trait]
impl JobProcessor for FailFirstAttempt {
    async fn process(&self, _worker_id: usize, job: &Job) -> Result<(), ProcessingError> {
        if job.message_id == self.failing_id && !job.redelivered {
            return Err(ProcessingError::new(job.message_id, "transient failure"));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "fail-first-attempt"
    }
}
