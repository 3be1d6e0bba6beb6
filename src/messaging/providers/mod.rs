//! # Broker Gateway Providers
//!
//! - [`InMemoryGateway`]: in-process broker for tests and broker-less runs
//! - [`RabbitMqGateway`]: AMQP 0.9.1 via `lapin` (feature `rabbitmq`)

pub mod in_memory;
#[cfg(feature = "rabbitmq")]
pub mod rabbitmq;

pub use in_memory::{BrokerEvent, InMemoryGateway, QueueCounters};
#[cfg(feature = "rabbitmq")]
pub use rabbitmq::{RabbitMqConnector, RabbitMqGateway};
