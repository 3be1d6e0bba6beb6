//! # consumer-bench
//!
//! Command-line entry point: declare the queue, publish a batch, run one
//! consumer, or sweep worker counts against a RabbitMQ broker.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use consumer_bench::benchmark::{consume_with_deadline, BenchmarkOrchestrator, Publisher};
use consumer_bench::config::BenchConfig;
use consumer_bench::dispatch::ConsumerPipeline;
use consumer_bench::logging;
use consumer_bench::messaging::providers::RabbitMqConnector;
use consumer_bench::messaging::{with_gateway, BrokerGateway};
use consumer_bench::BenchError;

#[derive(Parser, Debug)]
#[command(name = "consumer-bench")]
#[command(about = "Benchmark a bounded-concurrency RabbitMQ consumer")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file path (default: config/consumer-bench.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Declare the benchmark queue
    Queue,
    /// Publish a batch of random messages
    Produce {
        /// Number of messages to publish
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },
    /// Consume a fixed number of messages with a worker pool
    Consume {
        /// Concurrent workers
        #[arg(short, long)]
        workers: Option<usize>,
        /// Messages to consume before stopping
        #[arg(short, long)]
        messages: Option<usize>,
        /// Simulated processing time per message
        #[arg(short, long)]
        delay_ms: Option<u64>,
    },
    /// Run the configured sweep of trials and print the results table
    Benchmark {
        /// Skip CPU and memory profiling
        #[arg(long)]
        no_profile: bool,
        /// Also write the report as JSON to this path
        #[arg(long, value_name = "PATH")]
        report_json: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.verbose {
        0 => logging::init_structured_logging(),
        1 => logging::init_with_level("info"),
        2 => logging::init_with_level("debug"),
        _ => logging::init_with_level("trace"),
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            logging::log_error("consumer-bench", "run", &format!("{err:#}"), None);
            error!("Fatal: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = BenchConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let parallelism = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    info!(
        queue = %config.broker.queue_name,
        available_parallelism = parallelism,
        "consumer-bench starting"
    );

    let connector = RabbitMqConnector::new(config.broker.clone());
    match cli.command {
        Commands::Queue => {
            with_gateway(&connector, |gateway| async move {
                gateway.ensure_queue(&config.broker.queue_name).await?;
                Ok::<_, BenchError>(())
            })
            .await
            .context("declaring queue")
        }
        Commands::Produce { count } => {
            let count = count.unwrap_or(config.producer.message_count);
            with_gateway(&connector, |gateway| async move {
                Publisher::new(config.broker.queue_name.clone())
                    .publish_batch(gateway.as_ref(), count)
                    .await?;
                Ok::<_, BenchError>(())
            })
            .await
            .context("publishing messages")
        }
        Commands::Consume {
            workers,
            messages,
            delay_ms,
        } => {
            let mut consumer = config.consumer.clone();
            consumer.worker_count = workers.unwrap_or(consumer.worker_count);
            consumer.message_count = messages.unwrap_or(consumer.message_count);
            consumer.delay_ms = delay_ms.unwrap_or(consumer.delay_ms);
            let settings = consumer.settings();
            let timeout = consumer.trial_timeout();
            let queue_name = config.broker.queue_name.clone();

            with_gateway(&connector, |gateway| async move {
                gateway.ensure_queue(&queue_name).await?;
                let pipeline = ConsumerPipeline::simulated();
                let outcome = consume_with_deadline(
                    &pipeline,
                    gateway.as_ref(),
                    &queue_name,
                    &settings,
                    timeout,
                )
                .await?;
                info!(
                    processed = outcome.processed,
                    failed = outcome.failed,
                    short = outcome.short,
                    "Consumer run complete"
                );
                Ok::<_, BenchError>(())
            })
            .await
            .context("consuming messages")
        }
        Commands::Benchmark {
            no_profile,
            report_json,
        } => {
            let mut config = config;
            if no_profile {
                config.benchmark.profiling_enabled = false;
            }
            let trials = config.benchmark.trials.clone();

            let report = with_gateway(&connector, |gateway: Arc<dyn BrokerGateway>| async move {
                BenchmarkOrchestrator::from_config(gateway, &config)
                    .run_sweep(&trials)
                    .await
            })
            .await
            .context("benchmark sweep aborted")?;

            println!("{report}");
            if let Some(path) = report_json {
                tokio::fs::write(&path, report.to_json()?)
                    .await
                    .with_context(|| format!("writing report to {}", path.display()))?;
                info!(path = %path.display(), "Wrote JSON report");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_consume_overrides_parse() {
        let cli = Cli::try_parse_from([
            "consumer-bench",
            "-vv",
            "consume",
            "--workers",
            "4",
            "--messages",
            "20",
            "--delay-ms",
            "5",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Commands::Consume {
                workers: Some(4),
                messages: Some(20),
                delay_ms: Some(5),
            }
        ));
    }
}
