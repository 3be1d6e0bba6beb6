//! # Crate Error Types
//!
//! Top-level error for the harness. Every variant aborts the current run:
//! nothing here is retried or downgraded to a warning.

use thiserror::Error;

use crate::dispatch::DispatchError;
use crate::messaging::MessagingError;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid trial configuration: {0}")]
    InvalidTrial(String),

    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("Profiling error: {0}")]
    Profiling(String),

    #[error("Trial with {worker_count} workers exceeded its deadline of {timeout_ms}ms")]
    TrialTimeout { worker_count: usize, timeout_ms: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for BenchError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<serde_json::Error> for BenchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Profiling(format!("serialization failed: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, BenchError>;
