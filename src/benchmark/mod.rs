//! # Benchmark
//!
//! Sweeps over worker counts: publish a batch, consume it through the
//! dispatch pipeline, record how long that took, and print a table.

pub mod orchestrator;
pub mod profiler;
pub mod publisher;
pub mod report;
pub mod trial;

pub use orchestrator::{consume_with_deadline, BenchmarkOrchestrator};
pub use profiler::{CpuSample, ProfileSession, ResourceProfiler, ResourceSample};
pub use publisher::{message_payload, Publisher};
pub use report::BenchmarkReport;
pub use trial::{TrialConfig, TrialResult};
