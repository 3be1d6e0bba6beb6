//! # Handoff Channel
//!
//! Bounded in-process conduit between the dispatcher and the worker pool.
//! A full channel suspends the sender; jobs are never dropped to make room.
//! The receiving side is shared by every worker through a mutex, so each job
//! is taken by exactly one of them. Dropping (or closing) the sender lets
//! workers observe end-of-input once the buffered jobs are gone.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use super::DispatchError;
use crate::messaging::Job;

/// Create a handoff channel holding at most `capacity` buffered jobs
///
/// A capacity of zero is raised to one, the smallest buffer tokio supports.
pub fn handoff_channel(capacity: usize) -> (HandoffSender, HandoffReceiver) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        HandoffSender {
            inner: sender,
            forwarded: 0,
        },
        HandoffReceiver {
            inner: Arc::new(Mutex::new(receiver)),
        },
    )
}

/// Dispatcher side of the handoff
#[derive(Debug)]
pub struct HandoffSender {
    inner: mpsc::Sender<Job>,
    forwarded: usize,
}

impl HandoffSender {
    /// Hand a job to the pool, waiting while the buffer is full
    pub async fn send(&mut self, job: Job) -> Result<(), DispatchError> {
        self.inner
            .send(job)
            .await
            .map_err(|_| DispatchError::HandoffClosed {
                forwarded: self.forwarded,
            })?;
        self.forwarded += 1;
        Ok(())
    }

    /// Jobs successfully handed off so far
    pub fn forwarded(&self) -> usize {
        self.forwarded
    }

    /// Buffer capacity
    pub fn capacity(&self) -> usize {
        self.inner.max_capacity()
    }

    /// Signal end-of-input to the workers
    pub fn close(self) {
        drop(self);
    }
}

/// Worker side of the handoff, cloned once per worker
#[derive(Debug, Clone)]
pub struct HandoffReceiver {
    inner: Arc<Mutex<mpsc::Receiver<Job>>>,
}

impl HandoffReceiver {
    /// Next available job, or `None` once the channel is closed and empty
    pub async fn recv(&self) -> Option<Job> {
        let mut receiver = self.inner.lock().await;
        receiver.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn job(id: u64) -> Job {
        Job::auto_acked(id, format!("Msg #{id}").into_bytes())
    }

    #[tokio::test]
    async fn test_full_channel_blocks_sender() {
        let (mut sender, receiver) = handoff_channel(1);
        sender.send(job(1)).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), sender.send(job(2))).await;
        assert!(blocked.is_err(), "second send must wait for buffer space");

        assert_eq!(receiver.recv().await.unwrap().message_id, 1);
        sender.send(job(3)).await.unwrap();
        assert_eq!(receiver.recv().await.unwrap().message_id, 3);
        assert_eq!(sender.forwarded(), 2);
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let (mut sender, receiver) = handoff_channel(4);
        sender.send(job(1)).await.unwrap();
        sender.send(job(2)).await.unwrap();
        sender.close();

        let other = receiver.clone();
        assert_eq!(receiver.recv().await.unwrap().message_id, 1);
        assert_eq!(other.recv().await.unwrap().message_id, 2);
        assert!(receiver.recv().await.is_none());
        assert!(other.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_send_without_receivers_fails() {
        let (mut sender, receiver) = handoff_channel(2);
        drop(receiver);
        let result = sender.send(job(1)).await;
        assert!(matches!(result, Err(DispatchError::HandoffClosed { forwarded: 0 })));
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let (sender, _receiver) = handoff_channel(0);
        assert_eq!(sender.capacity(), 1);
    }
}
