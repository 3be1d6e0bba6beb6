//! Fills a queue with benchmark messages.

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, info};

use crate::messaging::{BrokerGateway, MessagingError};

/// Length of the random suffix of each payload
pub const PAYLOAD_SUFFIX_LEN: usize = 10;

/// Payload for the `index`-th message: `Msg #<index>: <10 random alphanumerics>`
pub fn message_payload(index: usize) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PAYLOAD_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("Msg #{index}: {suffix}")
}

/// Publishes batches of benchmark messages through a gateway
#[derive(Debug, Clone)]
pub struct Publisher {
    queue_name: String,
}

impl Publisher {
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Publish exactly `count` messages, stopping at the first failure
    pub async fn publish_batch(
        &self,
        gateway: &dyn BrokerGateway,
        count: usize,
    ) -> Result<usize, MessagingError> {
        for index in 0..count {
            let payload = message_payload(index);
            gateway.publish(&self.queue_name, payload.as_bytes()).await?;
            debug!(queue = %self.queue_name, body = %payload, "Published message");
        }
        info!(queue = %self.queue_name, count, "Published {} messages", count);
        Ok(count)
    }
}
