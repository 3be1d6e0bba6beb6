#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Consumer Bench
//!
//! Benchmarking harness for a bounded-concurrency message consumer.
//!
//! ## Overview
//!
//! A single dispatcher pulls deliveries from a broker queue and hands them,
//! through a bounded channel, to a fixed pool of workers that simulate
//! processing with a configurable delay. The broker's prefetch limit matches
//! the worker count, so at most `worker_count` messages are ever outstanding.
//! The benchmark orchestrator sweeps worker counts, timing how long each
//! configuration takes to drain a published batch.
//!
//! ## Module Organization
//!
//! - [`messaging`] - Broker gateway abstraction with RabbitMQ and in-memory providers
//! - [`dispatch`] - Dispatcher, handoff channel, worker pool and consumer pipeline
//! - [`benchmark`] - Trial sweep, publisher, resource profiling and report
//! - [`config`] - Layered TOML and environment configuration
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use consumer_bench::benchmark::{BenchmarkOrchestrator, TrialConfig};
//! use consumer_bench::messaging::providers::InMemoryGateway;
//!
//! # async fn example() -> consumer_bench::Result<()> {
//! let orchestrator = BenchmarkOrchestrator::new(Arc::new(InMemoryGateway::new()), "hello-queue");
//! let report = orchestrator
//!     .run_sweep(&[TrialConfig::new(100, 10, Duration::from_millis(10))])
//!     .await?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

pub mod benchmark;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod messaging;

pub use crate::benchmark::{BenchmarkOrchestrator, BenchmarkReport, TrialConfig, TrialResult};
pub use crate::config::BenchConfig;
pub use crate::dispatch::{ConsumeOutcome, ConsumerPipeline, ConsumerSettings};
pub use crate::error::{BenchError, Result};
pub use crate::messaging::{AckMode, BrokerConnector, BrokerGateway, MessagingError};
