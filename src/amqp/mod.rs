//! AMQP integration for the matchmaking service
//!
//! Formed matches are published as durable history messages to a topic
//! exchange.

pub mod connection;
pub mod messages;
pub mod publisher;

pub use connection::{AmqpConfig, AmqpConnection};
pub use messages::*;
pub use publisher::{AmqpMatchRecorder, PublisherConfig};
