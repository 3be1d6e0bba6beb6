//! # Broker Gateway Traits
//!
//! Provider-agnostic capability the dispatch core consumes. The core never
//! talks to a broker client directly: it receives an explicitly passed
//! `Arc<dyn BrokerGateway>` and, when it owns the connection, acquires it
//! through [`with_gateway`] so the gateway is closed on every exit path.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tracing::{debug, warn};

use super::{Job, MessagingError};

/// Lazy, ordered sequence of deliveries for one consumer registration
pub type DeliveryStream = BoxStream<'static, Result<Job, MessagingError>>;

/// Whether the broker settles deliveries itself or waits for the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// Broker treats a message as settled once delivered
    Auto,
    /// Worker acknowledges after processing; prefetch bounds in-flight work
    #[default]
    Manual,
}

/// Core broker capability
///
/// Implementations must be safe to share between the producing and consuming
/// phases of a trial. Within a trial the phases never overlap, so a gateway
/// is never mutated by two flows at once.
#[async_trait]
pub trait BrokerGateway: Send + Sync + 'static {
    /// Declare the queue if it does not exist (idempotent)
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError>;

    /// Publish one payload to the queue via the default route
    async fn publish(&self, queue_name: &str, payload: &[u8]) -> Result<(), MessagingError>;

    /// Bound the number of unacknowledged deliveries handed out at once
    ///
    /// Prefetch is per consumer, so the value is recorded and applied to
    /// consumers registered after the call that do not ask for their own
    /// limit.
    async fn set_prefetch(&self, limit: u16) -> Result<(), MessagingError>;

    /// Register a consumer and return its delivery subscription
    ///
    /// A `prefetch_limit` of zero falls back to the limit recorded by
    /// [`set_prefetch`](Self::set_prefetch); zero in both means unlimited.
    async fn consume(
        &self,
        queue_name: &str,
        prefetch_limit: u16,
        ack_mode: AckMode,
    ) -> Result<Subscription, MessagingError>;

    /// Release the connection and any channels still open
    async fn close(&self) -> Result<(), MessagingError>;

    /// Provider name for logging
    fn provider_name(&self) -> &'static str;
}

/// Prefetch a new consumer runs with, see [`BrokerGateway::consume`]
pub fn effective_prefetch(requested: u16, recorded: u16) -> u16 {
    if requested == 0 {
        recorded
    } else {
        requested
    }
}

/// Factory for gateways, used for scoped acquisition
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Open a new gateway
    async fn connect(&self) -> Result<Arc<dyn BrokerGateway>, MessagingError>;
}

/// A registered consumer: its delivery stream plus the means to cancel it
///
/// Cancelling drops the stream before releasing the registration, so
/// deliveries the dispatcher never pulled stay with the broker.
pub struct Subscription {
    queue_name: String,
    consumer_tag: String,
    deliveries: DeliveryStream,
    cancel: BoxFuture<'static, Result<(), MessagingError>>,
}

impl Subscription {
    pub fn new(
        queue_name: impl Into<String>,
        consumer_tag: impl Into<String>,
        deliveries: DeliveryStream,
        cancel: BoxFuture<'static, Result<(), MessagingError>>,
    ) -> Self {
        Self {
            queue_name: queue_name.into(),
            consumer_tag: consumer_tag.into(),
            deliveries,
            cancel,
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Mutable access to the delivery stream
    pub fn deliveries(&mut self) -> &mut DeliveryStream {
        &mut self.deliveries
    }

    /// Stop consuming and release the registration
    pub async fn cancel(self) -> Result<(), MessagingError> {
        let Self {
            queue_name,
            consumer_tag,
            deliveries,
            cancel,
        } = self;
        drop(deliveries);
        debug!(queue = %queue_name, consumer_tag = %consumer_tag, "Cancelling subscription");
        cancel.await
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("queue_name", &self.queue_name)
            .field("consumer_tag", &self.consumer_tag)
            .finish()
    }
}

/// Run `f` with a freshly connected gateway, closing it afterwards
///
/// The gateway is closed whether `f` succeeds or fails. A close failure is
/// reported when `f` succeeded; when `f` already failed, its error wins and
/// the close failure is logged.
pub async fn with_gateway<C, F, Fut, T, E>(connector: &C, f: F) -> Result<T, E>
where
    C: BrokerConnector + ?Sized,
    F: FnOnce(Arc<dyn BrokerGateway>) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<MessagingError> + fmt::Display,
{
    let gateway = connector.connect().await?;
    let provider = gateway.provider_name();
    debug!(provider, "Broker gateway acquired");

    let result = f(gateway.clone()).await;
    let closed = gateway.close().await;
    debug!(provider, "Broker gateway released");

    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(close_err)) => Err(close_err.into()),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(close_err)) => {
            warn!(
                provider,
                error = %close_err,
                original_error = %err,
                "Failed to close broker gateway after error"
            );
            Err(err)
        }
    }
}
