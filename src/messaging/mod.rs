//! # Messaging
//!
//! The broker gateway capability consumed by the dispatch core: the
//! `BrokerGateway` trait, the `Job` unit of work, the error taxonomy, and the
//! concrete providers.

pub mod errors;
pub mod job;
pub mod providers;
pub mod traits;

pub use errors::MessagingError;
pub use job::{Acknowledger, Job};
pub use traits::{
    effective_prefetch, with_gateway, AckMode, BrokerConnector, BrokerGateway, DeliveryStream,
    Subscription,
};
