//! # Consumer Pipeline
//!
//! Wires the dispatch core together for one consumption run:
//!
//! 1. set the broker prefetch to the worker count
//! 2. register a consumer with the same prefetch
//! 3. open the bounded handoff and spawn the worker pool
//! 4. drain `message_count` deliveries into the handoff
//! 5. wait for every worker to exit, then cancel the subscription
//!
//! Broker-side prefetch and the handoff capacity form two layers of
//! backpressure: the broker never has more than `worker_count` unacknowledged
//! deliveries outstanding, and the dispatcher suspends while the handoff is
//! full.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use super::dispatcher::{drain, DrainOutcome};
use super::handoff::handoff_channel;
use super::processor::{FailurePolicy, JobProcessor, SimulatedProcessor};
use super::worker_pool::{PoolReport, WorkerPool, WorkerPoolConfig, WorkerSummary};
use super::DispatchError;
use crate::messaging::{AckMode, BrokerGateway};

/// Parameters of one consumption run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    pub worker_count: usize,
    pub message_count: usize,
    pub simulated_delay: Duration,
    /// Handoff buffer size; defaults to `worker_count`
    pub handoff_capacity: Option<usize>,
    pub ack_mode: AckMode,
    pub failure_policy: FailurePolicy,
}

impl ConsumerSettings {
    pub fn new(worker_count: usize, message_count: usize, simulated_delay: Duration) -> Self {
        Self {
            worker_count,
            message_count,
            simulated_delay,
            handoff_capacity: None,
            ack_mode: AckMode::default(),
            failure_policy: FailurePolicy::default(),
        }
    }

    pub fn with_handoff_capacity(mut self, capacity: usize) -> Self {
        self.handoff_capacity = Some(capacity);
        self
    }

    pub fn with_ack_mode(mut self, ack_mode: AckMode) -> Self {
        self.ack_mode = ack_mode;
        self
    }

    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    /// Effective handoff buffer size
    pub fn handoff_capacity(&self) -> usize {
        self.handoff_capacity.unwrap_or(self.worker_count)
    }

    /// Broker prefetch matching the worker count
    pub fn prefetch(&self) -> Result<u16, DispatchError> {
        if self.worker_count == 0 {
            return Err(DispatchError::InvalidPoolSize {
                worker_count: self.worker_count,
            });
        }
        u16::try_from(self.worker_count).map_err(|_| DispatchError::PrefetchOverflow {
            worker_count: self.worker_count,
            max: u16::MAX,
        })
    }
}

/// Result of one consumption run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumeOutcome {
    /// Jobs handed to the pool
    pub dispatched: usize,
    /// Jobs processed successfully
    pub processed: usize,
    /// Jobs whose processing failed
    pub failed: usize,
    /// The delivery stream ended before `message_count` jobs arrived
    pub short: bool,
    pub per_worker: Vec<WorkerSummary>,
}

impl ConsumeOutcome {
    fn from_parts(drain: DrainOutcome, report: PoolReport) -> Self {
        Self {
            dispatched: drain.forwarded,
            processed: report.processed(),
            failed: report.failed(),
            short: drain.is_short(),
            per_worker: report.workers,
        }
    }
}

/// Dispatcher plus worker pool over a broker subscription
#[derive(Clone)]
pub struct ConsumerPipeline {
    processor: Option<Arc<dyn JobProcessor>>,
}

impl std::fmt::Debug for ConsumerPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerPipeline")
            .field(
                "processor",
                &self.processor.as_ref().map(|p| p.name()).unwrap_or("simulated"),
            )
            .finish()
    }
}

impl Default for ConsumerPipeline {
    fn default() -> Self {
        Self::simulated()
    }
}

impl ConsumerPipeline {
    /// Pipeline whose workers sleep for each run's `simulated_delay`
    pub fn simulated() -> Self {
        Self { processor: None }
    }

    /// Pipeline with a custom processor; `simulated_delay` is ignored
    pub fn with_processor(processor: Arc<dyn JobProcessor>) -> Self {
        Self {
            processor: Some(processor),
        }
    }

    /// Consume `settings.message_count` messages from `queue_name`
    pub async fn run(
        &self,
        gateway: &dyn BrokerGateway,
        queue_name: &str,
        settings: &ConsumerSettings,
    ) -> Result<ConsumeOutcome, DispatchError> {
        let prefetch = settings.prefetch()?;
        let processor = self
            .processor
            .clone()
            .unwrap_or_else(|| -> Arc<dyn JobProcessor> {
                Arc::new(SimulatedProcessor::new(settings.simulated_delay))
            });

        info!(
            queue = %queue_name,
            workers = settings.worker_count,
            messages = settings.message_count,
            delay_ms = settings.simulated_delay.as_millis() as u64,
            handoff_capacity = settings.handoff_capacity(),
            "Running consumer with {} workers",
            settings.worker_count
        );

        gateway.set_prefetch(prefetch).await?;
        let mut subscription = gateway
            .consume(queue_name, prefetch, settings.ack_mode)
            .await?;

        let (sender, receiver) = handoff_channel(settings.handoff_capacity());
        let pool_config = WorkerPoolConfig::new(settings.worker_count)
            .with_failure_policy(settings.failure_policy);
        let pool = match WorkerPool::spawn_with(pool_config, processor, receiver) {
            Ok(pool) => pool,
            Err(err) => {
                if let Err(cancel_err) = subscription.cancel().await {
                    warn!(error = %cancel_err, "Failed to cancel subscription");
                }
                return Err(err);
            }
        };

        let drained = drain(subscription.deliveries(), settings.message_count, sender).await;
        let pooled = pool.wait().await;
        let result = match (drained, pooled) {
            (Ok(drain), Ok(report)) => Ok(ConsumeOutcome::from_parts(drain, report)),
            // Workers failing first is what closes the handoff; report their cause
            (Err(DispatchError::HandoffClosed { .. }), Err(worker_err)) => Err(worker_err),
            (Err(err), _) | (_, Err(err)) => Err(err),
        };

        match (subscription.cancel().await, &result) {
            (Err(cancel_err), Ok(_)) => return Err(cancel_err.into()),
            (Err(cancel_err), Err(_)) => {
                warn!(error = %cancel_err, "Failed to cancel subscription after error");
            }
            (Ok(()), _) => {}
        }

        let outcome = result?;
        info!(
            dispatched = outcome.dispatched,
            processed = outcome.processed,
            failed = outcome.failed,
            short = outcome.short,
            "Consumer finished"
        );
        Ok(outcome)
    }
}
