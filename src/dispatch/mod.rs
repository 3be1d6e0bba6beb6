//! # Bounded Dispatch Core
//!
//! Moves jobs from a single broker subscription to a fixed pool of workers:
//!
//! - [`handoff`]: bounded channel between dispatcher and workers
//! - [`dispatcher`]: forwards up to `limit` deliveries, then closes the handoff
//! - [`worker_pool`]: `N` workers pulling one job at a time until drained
//! - [`processor`]: the per-job work and the failure policy
//! - [`pipeline`]: one complete consumption run over a gateway

pub mod dispatcher;
pub mod errors;
pub mod handoff;
pub mod pipeline;
pub mod processor;
pub mod worker_pool;

pub use dispatcher::{drain, DrainOutcome};
pub use errors::DispatchError;
pub use handoff::{handoff_channel, HandoffReceiver, HandoffSender};
pub use pipeline::{ConsumeOutcome, ConsumerPipeline, ConsumerSettings};
pub use processor::{FailurePolicy, JobProcessor, ProcessingError, SimulatedProcessor};
pub use worker_pool::{PoolHandle, PoolReport, WorkerPool, WorkerPoolConfig, WorkerSummary};
