//! # Messaging Error Types
//!
//! Structured error handling for the broker gateway using thiserror.
//! Every variant is fatal for the current run: the gateway never retries
//! and never downgrades a broker failure to a warning.

use thiserror::Error;

/// Broker gateway error taxonomy
#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Broker connection error: {message}")]
    Connection { message: String },

    #[error("Queue declaration failed: {queue_name}: {message}")]
    QueueDeclaration { queue_name: String, message: String },

    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Publish failed: {queue_name}: {message}")]
    Publish { queue_name: String, message: String },

    #[error("Consumer registration failed: {queue_name}: {message}")]
    ConsumeRegistration { queue_name: String, message: String },

    #[error("Delivery stream error: {queue_name}: {message}")]
    Delivery { queue_name: String, message: String },

    #[error("Acknowledgement failed for message {message_id}: {message}")]
    Acknowledgement { message_id: u64, message: String },

    #[error("Configuration error: {component}: {message}")]
    Configuration { component: String, message: String },

    #[error("Gateway is closed: {provider}")]
    Closed { provider: String },
}

impl MessagingError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a queue declaration error
    pub fn queue_declaration(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::QueueDeclaration {
            queue_name: queue_name.into(),
            message: message.into(),
        }
    }

    /// Create a queue not found error
    pub fn queue_not_found(queue_name: impl Into<String>) -> Self {
        Self::QueueNotFound {
            queue_name: queue_name.into(),
        }
    }

    /// Create a publish error
    pub fn publish(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            queue_name: queue_name.into(),
            message: message.into(),
        }
    }

    /// Create a consumer registration error
    pub fn consume_registration(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConsumeRegistration {
            queue_name: queue_name.into(),
            message: message.into(),
        }
    }

    /// Create a delivery stream error
    pub fn delivery(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Delivery {
            queue_name: queue_name.into(),
            message: message.into(),
        }
    }

    /// Create an acknowledgement error
    pub fn acknowledgement(message_id: u64, message: impl Into<String>) -> Self {
        Self::Acknowledgement {
            message_id,
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create a closed gateway error
    pub fn closed(provider: impl Into<String>) -> Self {
        Self::Closed {
            provider: provider.into(),
        }
    }

    /// Short classification used in structured log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection",
            Self::QueueDeclaration { .. } => "declaration",
            Self::QueueNotFound { .. } => "queue_not_found",
            Self::Publish { .. } => "publish",
            Self::ConsumeRegistration { .. } => "consume_registration",
            Self::Delivery { .. } => "delivery",
            Self::Acknowledgement { .. } => "acknowledgement",
            Self::Configuration { .. } => "configuration",
            Self::Closed { .. } => "closed",
        }
    }
}
