//! # Dispatch Error Types

use thiserror::Error;

use crate::messaging::MessagingError;

/// Errors raised while moving jobs from the broker to the worker pool
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Handoff channel closed after {forwarded} job(s): no worker is receiving")]
    HandoffClosed { forwarded: usize },

    #[error("Worker pool size must be at least 1, got {worker_count}")]
    InvalidPoolSize { worker_count: usize },

    #[error("Worker count {worker_count} exceeds the broker prefetch limit of {max}")]
    PrefetchOverflow { worker_count: usize, max: u16 },

    #[error("Worker terminated abnormally: {message}")]
    WorkerAborted { message: String },

    #[error(transparent)]
    Messaging(#[from] MessagingError),
}

impl DispatchError {
    /// Create a worker aborted error
    pub fn worker_aborted(message: impl Into<String>) -> Self {
        Self::WorkerAborted {
            message: message.into(),
        }
    }
}
