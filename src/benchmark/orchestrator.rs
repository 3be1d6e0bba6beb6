//! # Benchmark Orchestrator
//!
//! Runs trials strictly one after another. Each trial declares the queue,
//! publishes its messages, attaches profiling, and times one consumer
//! pipeline run from start to worker pool completion. The next trial starts
//! only after every message of the previous one has been processed and
//! settled. Any error aborts the sweep and no report is produced.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, warn};

use super::profiler::ResourceProfiler;
use super::publisher::Publisher;
use super::report::BenchmarkReport;
use super::trial::{TrialConfig, TrialResult};
use crate::config::BenchConfig;
use crate::dispatch::{ConsumeOutcome, ConsumerPipeline, ConsumerSettings, FailurePolicy};
use crate::error::{BenchError, Result};
use crate::logging::log_trial_operation;
use crate::messaging::{AckMode, BrokerGateway};

pub struct BenchmarkOrchestrator {
    gateway: Arc<dyn BrokerGateway>,
    publisher: Publisher,
    pipeline: ConsumerPipeline,
    profiler: Option<ResourceProfiler>,
    trial_timeout: Option<Duration>,
    handoff_capacity: Option<usize>,
    ack_mode: AckMode,
    failure_policy: FailurePolicy,
}

impl std::fmt::Debug for BenchmarkOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BenchmarkOrchestrator")
            .field("provider", &self.gateway.provider_name())
            .field("queue_name", &self.publisher.queue_name())
            .field("pipeline", &self.pipeline)
            .field("profiler", &self.profiler)
            .field("trial_timeout", &self.trial_timeout)
            .finish()
    }
}

impl BenchmarkOrchestrator {
    pub fn new(gateway: Arc<dyn BrokerGateway>, queue_name: impl Into<String>) -> Self {
        Self {
            gateway,
            publisher: Publisher::new(queue_name),
            pipeline: ConsumerPipeline::simulated(),
            profiler: None,
            trial_timeout: None,
            handoff_capacity: None,
            ack_mode: AckMode::default(),
            failure_policy: FailurePolicy::default(),
        }
    }

    /// Orchestrator configured from loaded settings
    pub fn from_config(gateway: Arc<dyn BrokerGateway>, config: &BenchConfig) -> Self {
        let mut orchestrator = Self::new(gateway, config.broker.queue_name.clone())
            .with_ack_mode(config.consumer.ack_mode)
            .with_failure_policy(config.consumer.failure_policy);
        orchestrator.handoff_capacity = config.consumer.handoff_capacity;
        orchestrator.trial_timeout = config.consumer.trial_timeout();
        if config.benchmark.profiling_enabled {
            orchestrator.profiler = Some(ResourceProfiler::new(
                config.benchmark.profile_dir.clone(),
                config.benchmark.sample_interval(),
            ));
        }
        orchestrator
    }

    pub fn with_pipeline(mut self, pipeline: ConsumerPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_profiler(mut self, profiler: ResourceProfiler) -> Self {
        self.profiler = Some(profiler);
        self
    }

    /// Abort the sweep when one consumption takes longer than `timeout`
    pub fn with_trial_timeout(mut self, timeout: Duration) -> Self {
        self.trial_timeout = Some(timeout);
        self
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

    pub fn queue_name(&self) -> &str {
        self.publisher.queue_name()
    }

    /// Run every trial in order and summarize them
    pub async fn run_sweep(&self, trials: &[TrialConfig]) -> Result<BenchmarkReport> {
        for trial in trials {
            trial.validate()?;
        }

        let started_at = Utc::now();
        let mut results = Vec::with_capacity(trials.len());
        for trial in trials {
            results.push(self.run_trial(trial).await?);
        }

        info!(trials = results.len(), "Benchmark sweep complete");
        Ok(BenchmarkReport::new(started_at, Utc::now(), results))
    }

    /// Publish, consume and time a single trial
    pub async fn run_trial(&self, trial: &TrialConfig) -> Result<TrialResult> {
        trial.validate()?;
        let queue_name = self.publisher.queue_name();
        info!(
            workers = trial.worker_count,
            messages = trial.message_count,
            "Benchmarking with {} workers",
            trial.worker_count
        );
        log_trial_operation(
            "trial",
            trial.worker_count,
            trial.message_count,
            "started",
            None,
            None,
        );

        self.gateway.ensure_queue(queue_name).await?;
        info!("Publishing messages...");
        self.publisher
            .publish_batch(self.gateway.as_ref(), trial.message_count)
            .await?;

        let session = match &self.profiler {
            Some(profiler) => Some(profiler.begin(trial.worker_count).await?),
            None => None,
        };

        let settings = self.settings_for(trial);
        info!("Starting consumer...");
        let start = Instant::now();
        let outcome = consume_with_deadline(
            &self.pipeline,
            self.gateway.as_ref(),
            queue_name,
            &settings,
            self.trial_timeout,
        )
        .await?;
        let elapsed = start.elapsed();

        let resources = match session {
            Some(session) => Some(session.finish().await?),
            None => None,
        };

        if outcome.short {
            warn!(
                workers = trial.worker_count,
                requested = trial.message_count,
                dispatched = outcome.dispatched,
                "Trial ended with fewer messages than requested"
            );
        }

        let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        log_trial_operation(
            "trial",
            trial.worker_count,
            trial.message_count,
            if outcome.short { "short" } else { "completed" },
            Some(duration_ms),
            None,
        );

        Ok(TrialResult {
            config: *trial,
            elapsed,
            processed: outcome.processed,
            failed: outcome.failed,
            short: outcome.short,
            resources,
        })
    }

    fn settings_for(&self, trial: &TrialConfig) -> ConsumerSettings {
        let settings = ConsumerSettings::new(
            trial.worker_count,
            trial.message_count,
            trial.simulated_delay,
        )
        .with_ack_mode(self.ack_mode)
        .with_failure_policy(self.failure_policy);
        match self.handoff_capacity {
            Some(capacity) => settings.with_handoff_capacity(capacity),
            None => settings,
        }
    }
}

/// Run one pipeline consumption, failing with [`BenchError::TrialTimeout`]
/// once `deadline` elapses. Dropping the run on timeout aborts the workers and
/// returns their unsettled deliveries to the broker.
pub async fn consume_with_deadline(
    pipeline: &ConsumerPipeline,
    gateway: &dyn BrokerGateway,
    queue_name: &str,
    settings: &ConsumerSettings,
    deadline: Option<Duration>,
) -> Result<ConsumeOutcome> {
    let consume = pipeline.run(gateway, queue_name, settings);
    match deadline {
        Some(limit) => tokio::time::timeout(limit, consume)
            .await
            .map_err(|_| BenchError::TrialTimeout {
                worker_count: settings.worker_count,
                timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            })?
            .map_err(BenchError::from),
        None => Ok(consume.await?),
    }
}
