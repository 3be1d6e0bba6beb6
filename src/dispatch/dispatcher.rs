//! # Dispatcher
//!
//! Pulls deliveries one at a time and forwards them into the handoff channel
//! until the limit is reached or the delivery stream ends. The stream is
//! never polled past the limit, so surplus messages stay with the broker.

use futures::{Stream, StreamExt};
use tracing::{debug, info, warn};

use super::handoff::HandoffSender;
use super::DispatchError;
use crate::messaging::{Job, MessagingError};

/// What a drain accomplished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainOutcome {
    /// Jobs handed to the worker pool
    pub forwarded: usize,
    /// Requested number of jobs
    pub limit: usize,
    /// The delivery stream ended before the limit was reached
    pub end_of_stream: bool,
}

impl DrainOutcome {
    /// Fewer jobs were forwarded than requested
    pub fn is_short(&self) -> bool {
        self.forwarded < self.limit
    }
}

/// Forward up to `limit` deliveries into `out`, then close it
///
/// `out` is consumed, so the handoff is closed on every return path,
/// including errors. A `limit` of zero closes the handoff immediately without
/// touching the stream.
pub async fn drain<S>(
    deliveries: &mut S,
    limit: usize,
    mut out: HandoffSender,
) -> Result<DrainOutcome, DispatchError>
where
    S: Stream<Item = Result<Job, MessagingError>> + Unpin + ?Sized,
{
    let mut end_of_stream = false;

    debug!(limit, capacity = out.capacity(), "Waiting for messages");
    while out.forwarded() < limit {
        match deliveries.next().await {
            Some(Ok(job)) => out.send(job).await?,
            Some(Err(err)) => {
                warn!(
                    forwarded = out.forwarded(),
                    error = %err,
                    "Delivery stream failed, stopping dispatch"
                );
                return Err(err.into());
            }
            None => {
                end_of_stream = true;
                break;
            }
        }
    }

    let outcome = DrainOutcome {
        forwarded: out.forwarded(),
        limit,
        end_of_stream,
    };
    out.close();

    if outcome.is_short() {
        warn!(
            forwarded = outcome.forwarded,
            limit, "Delivery stream ended early, closing handoff"
        );
    } else {
        info!(
            forwarded = outcome.forwarded,
            "Dispatched {} messages, stopping consumer", outcome.forwarded
        );
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::handoff::handoff_channel;
    use futures::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn jobs(count: u64) -> Vec<Result<Job, MessagingError>> {
        (1..=count)
            .map(|id| Ok(Job::auto_acked(id, vec![])))
            .collect()
    }

    #[tokio::test]
    async fn test_zero_limit_closes_immediately() {
        let polled = Arc::new(AtomicUsize::new(0));
        let counter = polled.clone();
        let mut deliveries = stream::iter(jobs(3)).inspect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let (sender, receiver) = handoff_channel(4);
        let outcome = drain(&mut deliveries, 0, sender).await.unwrap();

        assert_eq!(outcome.forwarded, 0);
        assert!(!outcome.is_short());
        assert_eq!(polled.load(Ordering::SeqCst), 0);
        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stops_at_limit_leaving_rest_unconsumed() {
        let mut deliveries = stream::iter(jobs(10));
        let (sender, receiver) = handoff_channel(10);

        let outcome = drain(&mut deliveries, 4, sender).await.unwrap();
        assert_eq!(outcome.forwarded, 4);
        assert!(!outcome.end_of_stream);

        let mut received = Vec::new();
        while let Some(job) = receiver.recv().await {
            received.push(job.message_id);
        }
        assert_eq!(received, vec![1, 2, 3, 4]);

        let next = deliveries.next().await.unwrap().unwrap();
        assert_eq!(next.message_id, 5, "stream must not be advanced past the limit");
    }

    #[tokio::test]
    async fn test_end_of_stream_is_short() {
        let mut deliveries = stream::iter(jobs(2));
        let (sender, receiver) = handoff_channel(4);

        let outcome = drain(&mut deliveries, 5, sender).await.unwrap();
        assert_eq!(outcome.forwarded, 2);
        assert!(outcome.end_of_stream);
        assert!(outcome.is_short());

        assert!(receiver.recv().await.is_some());
        assert!(receiver.recv().await.is_some());
        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_error_is_fatal_and_closes_handoff() {
        let items = vec![
            Ok(Job::auto_acked(1, vec![])),
            Err(MessagingError::delivery("hello-queue", "channel closed")),
            Ok(Job::auto_acked(2, vec![])),
        ];
        let mut deliveries = stream::iter(items);
        let (sender, receiver) = handoff_channel(4);

        let result = drain(&mut deliveries, 3, sender).await;
        assert!(matches!(
            result,
            Err(DispatchError::Messaging(MessagingError::Delivery { .. }))
        ));
        assert_eq!(receiver.recv().await.unwrap().message_id, 1);
        assert!(receiver.recv().await.is_none());
    }
}
