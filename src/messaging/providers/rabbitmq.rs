//! # RabbitMQ Broker Gateway
//!
//! `BrokerGateway` implementation over AMQP 0.9.1 using the `lapin` crate.
//!
//! ## Channel layout
//!
//! | Channel | Used for | Lifetime |
//! |---------|----------|----------|
//! | publish | queue declaration, publishing (with confirms) | gateway |
//! | consumer | one `basic_consume` with its own `basic_qos` | subscription |
//!
//! Giving every subscription its own channel means cancelling it closes the
//! channel, and RabbitMQ returns any prefetched-but-unacknowledged deliveries
//! to the queue instead of leaving them parked on a stale consumer.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use lapin::acker::Acker;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tracing::{debug, info, warn};

use crate::config::BrokerConfig;
use crate::messaging::traits::{
    effective_prefetch, AckMode, BrokerConnector, BrokerGateway, Subscription,
};
use crate::messaging::{Acknowledger, Job, MessagingError};

const PROVIDER: &str = "rabbitmq";
const REPLY_SUCCESS: u16 = 200;

/// Manual-ack handle wrapping the lapin acker of one delivery
struct AmqpAcker {
    acker: Acker,
    delivery_tag: u64,
}

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(self: Box<Self>) -> Result<(), MessagingError> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| {
                MessagingError::acknowledgement(self.delivery_tag, format!("ack failed: {e}"))
            })
    }

    async fn nack(self: Box<Self>, requeue: bool) -> Result<(), MessagingError> {
        self.acker
            .nack(BasicNackOptions {
                requeue,
                ..Default::default()
            })
            .await
            .map_err(|e| {
                MessagingError::acknowledgement(self.delivery_tag, format!("nack failed: {e}"))
            })
    }
}

fn job_from_delivery(delivery: Delivery, ack_mode: AckMode) -> Job {
    let Delivery {
        delivery_tag,
        redelivered,
        data,
        acker,
        ..
    } = delivery;

    let job = match ack_mode {
        AckMode::Auto => Job::auto_acked(delivery_tag, data),
        AckMode::Manual => Job::with_acker(
            delivery_tag,
            data,
            Box::new(AmqpAcker {
                acker,
                delivery_tag,
            }),
        ),
    };
    job.redelivered(redelivered)
}

/// RabbitMQ-backed gateway
pub struct RabbitMqGateway {
    connection: Connection,
    publish_channel: Channel,
    config: BrokerConfig,
    prefetch: AtomicU16,
}

impl std::fmt::Debug for RabbitMqGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RabbitMqGateway")
            .field("url", &self.connection_url_redacted())
            .field("prefetch", &self.prefetch())
            .finish()
    }
}

impl RabbitMqGateway {
    /// Connect, open the publish channel, and enable publisher confirms
    pub async fn connect(config: &BrokerConfig) -> Result<Self, MessagingError> {
        let properties = ConnectionProperties::default()
            .with_connection_name(config.connection_name.clone().into());
        let timeout = Duration::from_secs(config.connection_timeout_seconds);

        let connection = tokio::time::timeout(timeout, Connection::connect(&config.url, properties))
            .await
            .map_err(|_| {
                MessagingError::connection(format!(
                    "RabbitMQ connection timed out after {}s",
                    config.connection_timeout_seconds
                ))
            })?
            .map_err(|e| MessagingError::connection(format!("RabbitMQ connection failed: {e}")))?;

        let publish_channel = connection.create_channel().await.map_err(|e| {
            MessagingError::connection(format!("RabbitMQ channel creation failed: {e}"))
        })?;

        publish_channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| {
                MessagingError::configuration(PROVIDER, format!("Failed to enable confirms: {e}"))
            })?;

        let gateway = Self {
            connection,
            publish_channel,
            config: config.clone(),
            prefetch: AtomicU16::new(0),
        };
        info!(url = %gateway.connection_url_redacted(), "Connected to RabbitMQ");
        Ok(gateway)
    }

    /// Connection URL with credentials hidden
    pub fn connection_url_redacted(&self) -> &str {
        if self.config.url.contains('@') {
            if let Some(scheme_end) = self.config.url.find("://") {
                return &self.config.url[..scheme_end + 3];
            }
        }
        &self.config.url
    }

    /// Prefetch most recently set through `set_prefetch`
    pub fn prefetch(&self) -> u16 {
        self.prefetch.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerGateway for RabbitMqGateway {
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        debug!(queue = %queue_name, durable = self.config.durable_queue, "Declaring queue");
        let queue = self
            .publish_channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable: self.config.durable_queue,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::queue_declaration(queue_name, e.to_string()))?;

        info!(
            queue = %queue.name().as_str(),
            messages = queue.message_count(),
            consumers = queue.consumer_count(),
            "Queue declared"
        );
        Ok(())
    }

    async fn publish(&self, queue_name: &str, payload: &[u8]) -> Result<(), MessagingError> {
        let confirm = self
            .publish_channel
            .basic_publish(
                "",         // default exchange
                queue_name, // routing key = queue name
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_content_type("text/plain".into()),
            )
            .await
            .map_err(|e| MessagingError::publish(queue_name, e.to_string()))?;

        let confirmation = confirm
            .await
            .map_err(|e| MessagingError::publish(queue_name, format!("confirmation failed: {e}")))?;

        if confirmation.is_nack() {
            return Err(MessagingError::publish(queue_name, "broker nacked the message"));
        }
        Ok(())
    }

    // QoS is channel scoped and every consumer gets its own channel, so the
    // limit is applied in `consume` rather than on the publish channel.
    async fn set_prefetch(&self, limit: u16) -> Result<(), MessagingError> {
        if !self.connection.status().connected() {
            return Err(MessagingError::connection("RabbitMQ connection is closed"));
        }
        self.prefetch.store(limit, Ordering::SeqCst);
        debug!(prefetch = limit, "Prefetch recorded for new consumers");
        Ok(())
    }

    async fn consume(
        &self,
        queue_name: &str,
        prefetch_limit: u16,
        ack_mode: AckMode,
    ) -> Result<Subscription, MessagingError> {
        let prefetch_limit = effective_prefetch(prefetch_limit, self.prefetch());
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| MessagingError::consume_registration(queue_name, e.to_string()))?;

        channel
            .basic_qos(prefetch_limit, BasicQosOptions::default())
            .await
            .map_err(|e| {
                MessagingError::consume_registration(queue_name, format!("Failed to set QoS: {e}"))
            })?;

        let consumer_tag = format!("consumer-bench-{}", uuid::Uuid::new_v4());
        let consumer = channel
            .basic_consume(
                queue_name,
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: ack_mode == AckMode::Auto,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::consume_registration(queue_name, e.to_string()))?;

        info!(
            queue = %queue_name,
            consumer_tag = %consumer_tag,
            prefetch_limit,
            ?ack_mode,
            "RabbitMQ consumer registered"
        );

        let stream_queue = queue_name.to_string();
        let deliveries = consumer
            .map(move |result| match result {
                Ok(delivery) => Ok(job_from_delivery(delivery, ack_mode)),
                Err(e) => Err(MessagingError::delivery(&stream_queue, e.to_string())),
            })
            .boxed();

        let cancel = async move {
            if channel.status().connected() {
                channel
                    .close(REPLY_SUCCESS, "consumer cancelled")
                    .await
                    .map_err(|e| MessagingError::connection(format!("Channel close failed: {e}")))?;
            }
            Ok::<(), MessagingError>(())
        }
        .boxed();

        Ok(Subscription::new(queue_name, consumer_tag, deliveries, cancel))
    }

    async fn close(&self) -> Result<(), MessagingError> {
        if self.publish_channel.status().connected() {
            self.publish_channel
                .close(REPLY_SUCCESS, "OK")
                .await
                .map_err(|e| MessagingError::connection(format!("Channel close failed: {e}")))?;
        }
        if self.connection.status().connected() {
            self.connection
                .close(REPLY_SUCCESS, "OK")
                .await
                .map_err(|e| MessagingError::connection(format!("Connection close failed: {e}")))?;
        } else {
            warn!("RabbitMQ connection already closed");
        }
        debug!("RabbitMQ gateway closed");
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}

/// Opens a fresh RabbitMQ gateway per acquisition
#[derive(Debug, Clone)]
pub struct RabbitMqConnector {
    config: BrokerConfig,
}

impl RabbitMqConnector {
    pub fn new(config: BrokerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrokerConnector for RabbitMqConnector {
    async fn connect(&self) -> Result<Arc<dyn BrokerGateway>, MessagingError> {
        let gateway = RabbitMqGateway::connect(&self.config).await?;
        Ok(Arc::new(gateway))
    }
}
