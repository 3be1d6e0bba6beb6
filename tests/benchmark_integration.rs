mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use consumer_bench::benchmark::{BenchmarkOrchestrator, ResourceProfiler, TrialConfig};
use consumer_bench::config::BenchConfig;
use consumer_bench::messaging::providers::{BrokerEvent, InMemoryGateway};
use consumer_bench::messaging::MessagingError;
use consumer_bench::BenchError;

use common::QUEUE;

#[tokio::test]
async fn test_trials_run_strictly_in_sequence() {
    let gateway = Arc::new(InMemoryGateway::with_event_log());
    let orchestrator = BenchmarkOrchestrator::new(gateway.clone(), QUEUE);
    let trials = [
        TrialConfig::new(10, 2, Duration::from_millis(1)),
        TrialConfig::new(10, 3, Duration::from_millis(1)),
        TrialConfig::new(10, 4, Duration::from_millis(1)),
    ];

    let report = orchestrator.run_sweep(&trials).await.unwrap();
    let workers: Vec<usize> = report.results.iter().map(|r| r.config.worker_count).collect();
    assert_eq!(workers, vec![2, 3, 4]);

    // Message ids are broker-wide: trial k published ids 10k+1 ..= 10k+10
    let events = gateway.events();
    let trial_of = |event: &BrokerEvent| ((event.message_id() - 1) / 10) as usize;
    for k in 0..trials.len() - 1 {
        let last_ack = events
            .iter()
            .rposition(|e| matches!(e, BrokerEvent::Acked { .. }) && trial_of(e) == k)
            .unwrap();
        let next_publish = events
            .iter()
            .position(|e| matches!(e, BrokerEvent::Published { .. }) && trial_of(e) == k + 1)
            .unwrap();
        assert!(
            last_ack < next_publish,
            "trial {} overlapped trial {}",
            k,
            k + 1
        );
    }

    let acked: HashSet<u64> = events
        .iter()
        .filter(|e| matches!(e, BrokerEvent::Acked { .. }))
        .map(BrokerEvent::message_id)
        .collect();
    assert_eq!(acked.len(), 30);
}

#[tokio::test]
async fn test_report_rows_match_trials() {
    let gateway = Arc::new(InMemoryGateway::new());
    let orchestrator = BenchmarkOrchestrator::new(gateway, QUEUE);
    let trials = [
        TrialConfig::new(100, 10, Duration::from_millis(10)),
        TrialConfig::new(0, 5, Duration::from_millis(100)),
    ];

    let report = orchestrator.run_sweep(&trials).await.unwrap();
    assert_eq!(report.results.len(), 2);

    let full = &report.results[0];
    assert_eq!(full.processed, 100);
    assert!(full.elapsed >= Duration::from_millis(100));
    assert!(!full.short);

    let empty = &report.results[1];
    assert_eq!(empty.processed, 0);
    assert!(empty.elapsed < Duration::from_millis(100));

    let rendered = report.to_string();
    assert_eq!(rendered.lines().count(), 3 + 2 + 1);
}

#[tokio::test]
async fn test_declaration_failure_aborts_sweep() {
    let gateway = Arc::new(InMemoryGateway::new());
    gateway.fail_declarations();
    let orchestrator = BenchmarkOrchestrator::new(gateway, QUEUE);

    let result = orchestrator
        .run_sweep(&[TrialConfig::new(5, 1, Duration::ZERO)])
        .await;
    assert!(matches!(
        result,
        Err(BenchError::Messaging(MessagingError::QueueDeclaration { .. }))
    ));
}

#[tokio::test]
async fn test_publish_failure_mid_sweep_discards_results() {
    let gateway = Arc::new(InMemoryGateway::new());
    gateway.fail_publishes_after(15);
    let orchestrator = BenchmarkOrchestrator::new(gateway.clone(), QUEUE);

    let result = orchestrator
        .run_sweep(&[
            TrialConfig::new(10, 2, Duration::ZERO),
            TrialConfig::new(10, 2, Duration::ZERO),
        ])
        .await;

    assert!(matches!(
        result,
        Err(BenchError::Messaging(MessagingError::Publish { .. }))
    ));
    // The first trial completed before the second one failed
    assert_eq!(gateway.acked_count(QUEUE), 10);
}

#[tokio::test]
async fn test_profiles_written_per_worker_count() {
    let dir = tempfile::tempdir().unwrap();
    let profile_dir = dir.path().join("profiles");
    let gateway = Arc::new(InMemoryGateway::new());
    let orchestrator = BenchmarkOrchestrator::new(gateway, QUEUE)
        .with_profiler(ResourceProfiler::new(&profile_dir, Duration::from_millis(5)));

    let report = orchestrator
        .run_sweep(&[
            TrialConfig::new(20, 2, Duration::from_millis(2)),
            TrialConfig::new(20, 4, Duration::from_millis(2)),
        ])
        .await
        .unwrap();

    for workers in [2, 4] {
        assert!(profile_dir.join(format!("cpu-{workers}workers.json")).exists());
        assert!(profile_dir.join(format!("mem-{workers}workers.json")).exists());
    }
    assert!(report.results.iter().all(|r| r.resources.is_some()));
}

#[tokio::test]
async fn test_orchestrator_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = BenchConfig::default();
    config.benchmark.profile_dir = dir.path().join("out");
    config.benchmark.sample_interval_ms = 5;
    config.benchmark.trials = vec![TrialConfig::new(6, 3, Duration::from_millis(1))];
    config.consumer.handoff_capacity = Some(1);

    let gateway = Arc::new(InMemoryGateway::new());
    let orchestrator = BenchmarkOrchestrator::from_config(gateway, &config);
    assert_eq!(orchestrator.queue_name(), "hello-queue");

    let report = orchestrator
        .run_sweep(&config.benchmark.trials)
        .await
        .unwrap();
    assert_eq!(report.results[0].processed, 6);
    assert!(config.benchmark.profile_dir.join("cpu-3workers.json").exists());
}
