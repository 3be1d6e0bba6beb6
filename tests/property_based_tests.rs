mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::{seeded_gateway, ConcurrencyGauge, QUEUE};
use consumer_bench::dispatch::{ConsumerPipeline, ConsumerSettings};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: exactly `message_count` distinct messages are processed and
    /// the surplus stays queued
    #[test]
    fn pipeline_processes_exactly_message_count(
        message_count in 0usize..60,
        surplus in 0usize..10,
        workers in 1usize..12,
        handoff in proptest::option::of(1usize..8),
    ) {
        let (processed, distinct, peak, remaining) = tokio_test::block_on(async {
            let gateway = seeded_gateway(message_count + surplus).await;
            let gauge = Arc::new(ConcurrencyGauge::new(Duration::ZERO));
            let mut settings = ConsumerSettings::new(workers, message_count, Duration::ZERO);
            if let Some(capacity) = handoff {
                settings = settings.with_handoff_capacity(capacity);
            }

            let outcome = ConsumerPipeline::with_processor(gauge.clone())
                .run(&gateway, QUEUE, &settings)
                .await
                .unwrap();
            (outcome.processed, gauge.distinct(), gauge.peak(), gateway.queue_length(QUEUE))
        });

        prop_assert_eq!(processed, message_count);
        prop_assert_eq!(distinct, message_count);
        prop_assert!(peak <= workers);
        prop_assert_eq!(remaining, surplus);
    }

    /// Property: with one worker, jobs are processed in broker order
    #[test]
    fn single_worker_preserves_order(message_count in 1usize..40) {
        let seen = tokio_test::block_on(async {
            let gateway = seeded_gateway(message_count).await;
            let gauge = Arc::new(ConcurrencyGauge::new(Duration::ZERO));
            let settings = ConsumerSettings::new(1, message_count, Duration::ZERO);
            ConsumerPipeline::with_processor(gauge.clone())
                .run(&gateway, QUEUE, &settings)
                .await
                .unwrap();
            gauge.seen()
        });

        let expected: Vec<u64> = (1..=message_count as u64).collect();
        prop_assert_eq!(seen.iter().copied().collect::<HashSet<_>>().len(), message_count);
        prop_assert_eq!(seen, expected);
    }
}
