//! # In-Memory Broker Gateway
//!
//! Thread-safe in-process broker for tests, benches, and broker-less runs.
//!
//! ## Features
//!
//! - **FIFO queues** with broker-wide, monotonically increasing message ids
//! - **Prefetch enforcement**: in manual-ack mode a delivery holds a semaphore
//!   permit until it is acked or nacked
//! - **Lazy delivery**: a message leaves its queue only when the subscriber
//!   polls for it, so deliveries beyond a dispatcher's limit stay queued
//! - **Event log** (opt-in) of publishes, deliveries, and settlements
//! - **Sealing**: a sealed queue ends its delivery streams once drained
//! - **Failure injection** for declaration and publish errors

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};

use crate::messaging::traits::{effective_prefetch, AckMode, BrokerGateway, Subscription};
use crate::messaging::{Acknowledger, Job, MessagingError};

const PROVIDER: &str = "in_memory";

/// Observable broker activity, recorded when the event log is enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerEvent {
    Published { message_id: u64 },
    Delivered { message_id: u64 },
    Acked { message_id: u64 },
    Nacked { message_id: u64, requeue: bool },
    /// Dropped by its consumer without a settlement and put back on the queue
    Released { message_id: u64 },
}

impl BrokerEvent {
    pub fn message_id(&self) -> u64 {
        match *self {
            Self::Published { message_id }
            | Self::Delivered { message_id }
            | Self::Acked { message_id }
            | Self::Nacked { message_id, .. }
            | Self::Released { message_id } => message_id,
        }
    }
}

#[derive(Debug, Clone)]
struct InMemoryMessage {
    id: u64,
    payload: Vec<u8>,
    delivery_count: u32,
}

#[derive(Debug, Default)]
struct InMemoryQueue {
    messages: VecDeque<InMemoryMessage>,
    sealed: bool,
    total_published: u64,
    total_delivered: u64,
    total_acked: u64,
    total_nacked: u64,
}

/// Lifetime counters for one queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounters {
    pub published: u64,
    pub delivered: u64,
    pub acked: u64,
    pub nacked: u64,
}

#[derive(Debug, Default)]
struct FailurePlan {
    fail_declarations: bool,
    publishes_before_failure: Option<u64>,
}

enum Pop {
    Message(InMemoryMessage),
    Empty,
    Drained,
    Missing,
}

#[derive(Debug)]
struct Shared {
    queues: Mutex<HashMap<String, InMemoryQueue>>,
    notify: Notify,
    next_id: AtomicU64,
    prefetch: AtomicU32,
    closed: AtomicBool,
    unacked: AtomicUsize,
    max_unacked: AtomicUsize,
    events: Option<Mutex<Vec<BrokerEvent>>>,
    failures: Mutex<FailurePlan>,
}

impl Shared {
    fn record(&self, event: BrokerEvent) {
        if let Some(events) = &self.events {
            events.lock().push(event);
        }
    }

    fn pop(&self, queue_name: &str) -> Pop {
        let mut queues = self.queues.lock();
        let Some(queue) = queues.get_mut(queue_name) else {
            return Pop::Missing;
        };
        match queue.messages.pop_front() {
            Some(mut message) => {
                message.delivery_count += 1;
                queue.total_delivered += 1;
                Pop::Message(message)
            }
            None if queue.sealed => Pop::Drained,
            None => Pop::Empty,
        }
    }

    fn settle(&self, queue_name: &str, message: InMemoryMessage, outcome: Settlement) {
        let message_id = message.id;
        {
            let mut queues = self.queues.lock();
            if let Some(queue) = queues.get_mut(queue_name) {
                match outcome {
                    Settlement::Ack => queue.total_acked += 1,
                    Settlement::Nack { requeue } => {
                        queue.total_nacked += 1;
                        if requeue {
                            queue.messages.push_front(message);
                        }
                    }
                    Settlement::Release => queue.messages.push_front(message),
                }
            }
        }
        self.unacked.fetch_sub(1, Ordering::SeqCst);
        match outcome {
            Settlement::Ack => self.record(BrokerEvent::Acked { message_id }),
            Settlement::Nack { requeue } => {
                self.record(BrokerEvent::Nacked {
                    message_id,
                    requeue,
                });
                if requeue {
                    self.notify.notify_waiters();
                }
            }
            Settlement::Release => {
                self.record(BrokerEvent::Released { message_id });
                self.notify.notify_waiters();
            }
        }
    }

    fn ensure_open(&self) -> Result<(), MessagingError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(MessagingError::closed(PROVIDER))
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Settlement {
    Ack,
    Nack { requeue: bool },
    Release,
}

/// Manual-ack handle for an in-memory delivery
///
/// Dropping the handle unsettled returns the message to the front of its
/// queue, the way a broker requeues deliveries of a closed channel.
struct InMemoryAcker {
    shared: Arc<Shared>,
    queue_name: String,
    message: Option<InMemoryMessage>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl InMemoryAcker {
    fn settle(&mut self, outcome: Settlement) {
        if let Some(message) = self.message.take() {
            self.shared.settle(&self.queue_name, message, outcome);
        }
    }
}

#[async_trait]
impl Acknowledger for InMemoryAcker {
    async fn ack(mut self: Box<Self>) -> Result<(), MessagingError> {
        self.settle(Settlement::Ack);
        Ok(())
    }

    async fn nack(mut self: Box<Self>, requeue: bool) -> Result<(), MessagingError> {
        self.settle(Settlement::Nack { requeue });
        Ok(())
    }
}

impl Drop for InMemoryAcker {
    fn drop(&mut self) {
        if self.message.is_some() {
            trace!(queue = %self.queue_name, "Unsettled delivery dropped, requeueing");
            self.settle(Settlement::Release);
        }
    }
}

/// In-memory broker gateway
///
/// # Example
///
/// ```rust
/// use consumer_bench::messaging::providers::InMemoryGateway;
/// use consumer_bench::messaging::{AckMode, BrokerGateway};
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let gateway = InMemoryGateway::new();
/// gateway.ensure_queue("hello-queue").await?;
/// gateway.publish("hello-queue", b"Msg #0: abc").await?;
///
/// let mut subscription = gateway.consume("hello-queue", 10, AckMode::Manual).await?;
/// let job = subscription.deliveries().next().await.unwrap()?;
/// job.ack().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryGateway {
    shared: Arc<Shared>,
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGateway {
    /// Create a new gateway without an event log
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Create a new gateway that records every broker event
    pub fn with_event_log() -> Self {
        Self::build(true)
    }

    fn build(event_log: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                queues: Mutex::new(HashMap::new()),
                notify: Notify::new(),
                next_id: AtomicU64::new(1),
                prefetch: AtomicU32::new(0),
                closed: AtomicBool::new(false),
                unacked: AtomicUsize::new(0),
                max_unacked: AtomicUsize::new(0),
                events: event_log.then(|| Mutex::new(Vec::new())),
                failures: Mutex::new(FailurePlan::default()),
            }),
        }
    }

    /// Make every subsequent `ensure_queue` fail
    pub fn fail_declarations(&self) {
        self.shared.failures.lock().fail_declarations = true;
    }

    /// Let `successful` publishes through, then fail every publish after
    pub fn fail_publishes_after(&self, successful: u64) {
        self.shared.failures.lock().publishes_before_failure = Some(successful);
    }

    /// End delivery streams for this queue once it is empty
    pub fn seal(&self, queue_name: &str) {
        if let Some(queue) = self.shared.queues.lock().get_mut(queue_name) {
            queue.sealed = true;
        }
        self.shared.notify.notify_waiters();
    }

    /// Messages waiting in the queue (not yet delivered)
    pub fn queue_length(&self, queue_name: &str) -> usize {
        self.shared
            .queues
            .lock()
            .get(queue_name)
            .map(|q| q.messages.len())
            .unwrap_or(0)
    }

    /// Lifetime counters for the queue (zeroed when it does not exist)
    pub fn counters(&self, queue_name: &str) -> QueueCounters {
        self.shared
            .queues
            .lock()
            .get(queue_name)
            .map(|q| QueueCounters {
                published: q.total_published,
                delivered: q.total_delivered,
                acked: q.total_acked,
                nacked: q.total_nacked,
            })
            .unwrap_or_default()
    }

    /// Total messages acknowledged on the queue
    pub fn acked_count(&self, queue_name: &str) -> u64 {
        self.counters(queue_name).acked
    }

    /// Prefetch most recently set through `set_prefetch`
    pub fn prefetch(&self) -> u16 {
        self.shared.prefetch.load(Ordering::SeqCst) as u16
    }

    /// Highest number of simultaneously unacknowledged manual-ack deliveries
    pub fn max_unacked(&self) -> usize {
        self.shared.max_unacked.load(Ordering::SeqCst)
    }

    /// Manual-ack deliveries currently awaiting settlement
    pub fn unacked(&self) -> usize {
        self.shared.unacked.load(Ordering::SeqCst)
    }

    /// Snapshot of the event log (empty when the log is disabled)
    pub fn events(&self) -> Vec<BrokerEvent> {
        self.shared
            .events
            .as_ref()
            .map(|events| events.lock().clone())
            .unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    fn deliver(
        shared: &Arc<Shared>,
        queue_name: &str,
        message: InMemoryMessage,
        ack_mode: AckMode,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Job {
        let message_id = message.id;
        let redelivered = message.delivery_count > 1;
        shared.record(BrokerEvent::Delivered { message_id });
        trace!(queue = %queue_name, message_id, "In-memory delivery");

        match ack_mode {
            AckMode::Auto => {
                if let Some(queue) = shared.queues.lock().get_mut(queue_name) {
                    queue.total_acked += 1;
                }
                Job::auto_acked(message_id, message.payload).redelivered(redelivered)
            }
            AckMode::Manual => {
                let in_flight = shared.unacked.fetch_add(1, Ordering::SeqCst) + 1;
                shared.max_unacked.fetch_max(in_flight, Ordering::SeqCst);
                let payload = message.payload.clone();
                let acker = InMemoryAcker {
                    shared: shared.clone(),
                    queue_name: queue_name.to_string(),
                    message: Some(message),
                    _permit: permit,
                };
                Job::with_acker(message_id, payload, Box::new(acker)).redelivered(redelivered)
            }
        }
    }
}

struct StreamState {
    shared: Arc<Shared>,
    queue_name: String,
    ack_mode: AckMode,
    permits: Arc<Semaphore>,
    cancelled: Arc<AtomicBool>,
}

async fn next_delivery(state: StreamState) -> Option<(Result<Job, MessagingError>, StreamState)> {
    loop {
        if state.cancelled.load(Ordering::SeqCst) || state.shared.closed.load(Ordering::SeqCst) {
            return None;
        }

        let permit = match state.ack_mode {
            AckMode::Manual => Some(state.permits.clone().acquire_owned().await.ok()?),
            AckMode::Auto => None,
        };

        let shared = state.shared.clone();
        let notified = shared.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        match state.shared.pop(&state.queue_name) {
            Pop::Message(message) => {
                let job = InMemoryGateway::deliver(
                    &state.shared,
                    &state.queue_name,
                    message,
                    state.ack_mode,
                    permit,
                );
                return Some((Ok(job), state));
            }
            Pop::Drained => {
                debug!(queue = %state.queue_name, "Sealed queue drained, ending delivery stream");
                return None;
            }
            Pop::Missing => {
                let err = MessagingError::delivery(&state.queue_name, "queue was removed");
                return Some((Err(err), state));
            }
            Pop::Empty => {
                drop(permit);
                notified.await;
            }
        }
    }
}

#[async_trait]
impl BrokerGateway for InMemoryGateway {
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        self.shared.ensure_open()?;
        if self.shared.failures.lock().fail_declarations {
            return Err(MessagingError::queue_declaration(
                queue_name,
                "declaration rejected by broker",
            ));
        }
        self.shared
            .queues
            .lock()
            .entry(queue_name.to_string())
            .or_default();
        Ok(())
    }

    async fn publish(&self, queue_name: &str, payload: &[u8]) -> Result<(), MessagingError> {
        self.shared.ensure_open()?;
        {
            let mut failures = self.shared.failures.lock();
            if let Some(remaining) = failures.publishes_before_failure.as_mut() {
                if *remaining == 0 {
                    return Err(MessagingError::publish(queue_name, "publish rejected by broker"));
                }
                *remaining -= 1;
            }
        }

        let message_id = {
            let mut queues = self.shared.queues.lock();
            let queue = queues
                .get_mut(queue_name)
                .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
            let message_id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
            queue.messages.push_back(InMemoryMessage {
                id: message_id,
                payload: payload.to_vec(),
                delivery_count: 0,
            });
            queue.total_published += 1;
            message_id
        };

        self.shared.record(BrokerEvent::Published { message_id });
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn set_prefetch(&self, limit: u16) -> Result<(), MessagingError> {
        self.shared.ensure_open()?;
        self.shared.prefetch.store(u32::from(limit), Ordering::SeqCst);
        Ok(())
    }

    async fn consume(
        &self,
        queue_name: &str,
        prefetch_limit: u16,
        ack_mode: AckMode,
    ) -> Result<Subscription, MessagingError> {
        self.shared.ensure_open()?;
        if !self.shared.queues.lock().contains_key(queue_name) {
            return Err(MessagingError::consume_registration(
                queue_name,
                "queue does not exist",
            ));
        }

        let prefetch_limit = effective_prefetch(prefetch_limit, self.prefetch());
        // AMQP semantics: a prefetch of zero means unlimited
        let permits = if prefetch_limit == 0 {
            Semaphore::MAX_PERMITS
        } else {
            usize::from(prefetch_limit)
        };
        let cancelled = Arc::new(AtomicBool::new(false));
        let consumer_tag = format!("in-memory-{}", uuid::Uuid::new_v4());

        let state = StreamState {
            shared: self.shared.clone(),
            queue_name: queue_name.to_string(),
            ack_mode,
            permits: Arc::new(Semaphore::new(permits)),
            cancelled: cancelled.clone(),
        };
        let deliveries = futures::stream::unfold(state, next_delivery).boxed();

        let shared = self.shared.clone();
        let cancel = async move {
            cancelled.store(true, Ordering::SeqCst);
            shared.notify.notify_waiters();
            Ok::<(), MessagingError>(())
        }
        .boxed();

        debug!(queue = %queue_name, prefetch_limit, ?ack_mode, "In-memory consumer registered");
        Ok(Subscription::new(queue_name, consumer_tag, deliveries, cancel))
    }

    async fn close(&self) -> Result<(), MessagingError> {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.notify.notify_waiters();
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}
