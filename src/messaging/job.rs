//! # Jobs
//!
//! A `Job` is one consumed delivery: the opaque payload plus whatever the
//! provider needs to acknowledge it. Ownership moves from the dispatcher to
//! exactly one worker, and acknowledging consumes the job, so a delivery can
//! be settled at most once.

use std::fmt;

use async_trait::async_trait;

use super::MessagingError;

/// Provider-specific settlement of a single delivery
///
/// Implementations are only present when the consumer runs in manual
/// acknowledgement mode. In auto-ack mode the broker considers the message
/// settled at delivery time and the job carries no acknowledger.
#[async_trait]
pub trait Acknowledger: Send + Sync + 'static {
    /// Positively acknowledge the delivery
    async fn ack(self: Box<Self>) -> Result<(), MessagingError>;

    /// Negatively acknowledge the delivery, optionally returning it to the queue
    async fn nack(self: Box<Self>, requeue: bool) -> Result<(), MessagingError>;
}

/// One consumed message
pub struct Job {
    /// Broker-assigned identifier (in-memory message id or AMQP delivery tag)
    pub message_id: u64,
    /// Opaque payload bytes
    pub payload: Vec<u8>,
    /// Whether the broker flagged this as a redelivery
    pub redelivered: bool,
    acker: Option<Box<dyn Acknowledger>>,
}

impl Job {
    /// Create a job that was already settled by the broker (auto-ack)
    pub fn auto_acked(message_id: u64, payload: Vec<u8>) -> Self {
        Self {
            message_id,
            payload,
            redelivered: false,
            acker: None,
        }
    }

    /// Create a job that must be settled by the worker
    pub fn with_acker(message_id: u64, payload: Vec<u8>, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            message_id,
            payload,
            redelivered: false,
            acker: Some(acker),
        }
    }

    /// Mark the job as a redelivery
    pub fn redelivered(mut self, redelivered: bool) -> Self {
        self.redelivered = redelivered;
        self
    }

    /// Whether the worker is responsible for settling this job
    pub fn requires_ack(&self) -> bool {
        self.acker.is_some()
    }

    /// Payload as UTF-8 text, lossy
    pub fn body(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Acknowledge the job; a no-op for auto-acked deliveries
    pub async fn ack(mut self) -> Result<(), MessagingError> {
        match self.acker.take() {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }

    /// Reject the job; a no-op for auto-acked deliveries
    pub async fn nack(mut self, requeue: bool) -> Result<(), MessagingError> {
        match self.acker.take() {
            Some(acker) => acker.nack(requeue).await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("message_id", &self.message_id)
            .field("payload_len", &self.payload.len())
            .field("redelivered", &self.redelivered)
            .field("requires_ack", &self.requires_ack())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingAcker {
        acks: Arc<AtomicUsize>,
        nacks: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Acknowledger for CountingAcker {
        async fn ack(self: Box<Self>) -> Result<(), MessagingError> {
            self.acks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn nack(self: Box<Self>, _requeue: bool) -> Result<(), MessagingError> {
            self.nacks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_auto_acked_job_settles_without_acker() {
        let job = Job::auto_acked(7, b"Msg #7: abc".to_vec());
        assert!(!job.requires_ack());
        assert_eq!(job.body(), "Msg #7: abc");
        job.ack().await.unwrap();
    }

    #[tokio::test]
    async fn test_manual_job_routes_to_acker() {
        let acks = Arc::new(AtomicUsize::new(0));
        let nacks = Arc::new(AtomicUsize::new(0));
        let make = || {
            Box::new(CountingAcker {
                acks: acks.clone(),
                nacks: nacks.clone(),
            })
        };

        let job = Job::with_acker(1, vec![], make());
        assert!(job.requires_ack());
        job.ack().await.unwrap();

        Job::with_acker(2, vec![], make()).nack(true).await.unwrap();

        assert_eq!(acks.load(Ordering::SeqCst), 1);
        assert_eq!(nacks.load(Ordering::SeqCst), 1);
    }
}
