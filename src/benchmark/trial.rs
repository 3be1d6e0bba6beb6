//! Trial configuration and per-trial measurements.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::profiler::ResourceSample;
use crate::error::{BenchError, Result};

/// Parameters of one benchmark trial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialConfig {
    /// Messages published before the trial and consumed during it
    pub message_count: usize,
    /// Concurrent workers; also the broker prefetch limit
    pub worker_count: usize,
    /// Per-message processing time
    #[serde(rename = "delay_ms", with = "duration_ms")]
    pub simulated_delay: Duration,
}

impl TrialConfig {
    pub fn new(message_count: usize, worker_count: usize, simulated_delay: Duration) -> Self {
        Self {
            message_count,
            worker_count,
            simulated_delay,
        }
    }

    /// Reject configurations that cannot run
    ///
    /// `message_count` of zero is valid and yields a near-instant trial.
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(BenchError::InvalidTrial(format!(
                "worker_count must be at least 1 (message_count={}, delay={}ms)",
                self.message_count,
                self.simulated_delay.as_millis()
            )));
        }
        if u16::try_from(self.worker_count).is_err() {
            return Err(BenchError::InvalidTrial(format!(
                "worker_count {} exceeds the broker prefetch limit of {}",
                self.worker_count,
                u16::MAX
            )));
        }
        Ok(())
    }

    /// The default sweep: 1000 messages at 100ms, doubling workers from 5 to 640
    pub fn default_sweep() -> Vec<TrialConfig> {
        [5, 10, 20, 40, 80, 160, 320, 640]
            .into_iter()
            .map(|workers| TrialConfig::new(1000, workers, Duration::from_millis(100)))
            .collect()
    }

    /// Lower bound on duration with perfect parallelism
    pub fn ideal_duration(&self) -> Duration {
        if self.worker_count == 0 {
            return Duration::ZERO;
        }
        let rounds =
            u32::try_from(self.message_count.div_ceil(self.worker_count)).unwrap_or(u32::MAX);
        self.simulated_delay.saturating_mul(rounds)
    }
}

/// Measurements of one completed trial
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialResult {
    pub config: TrialConfig,
    /// Wall time from consumer start to worker pool completion
    #[serde(rename = "elapsed_ms", with = "duration_ms")]
    pub elapsed: Duration,
    /// Messages processed successfully
    pub processed: usize,
    /// Messages whose processing failed
    pub failed: usize,
    /// Fewer messages arrived than requested
    pub short: bool,
    pub resources: Option<ResourceSample>,
}

impl TrialResult {
    /// Processed messages per second
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.processed as f64 / secs
    }
}

pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
