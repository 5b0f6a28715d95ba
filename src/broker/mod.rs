//! Broker abstraction over ordered, partitioned, at-least-once queues.
//!
//! The durable broker itself is an external dependency; this module defines
//! the seam the pipeline talks through plus an in-memory implementation for
//! tests and single-node deployments. Messages published with the same
//! partition key preserve their relative order; no cross-key ordering is
//! guaranteed.

mod memory;

pub use memory::InMemoryBroker;

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Publish failed (connection loss, broker backpressure)
    #[error("failed to publish to topic '{topic}': {reason}")]
    Publish { topic: String, reason: String },

    /// Subscription could not be established
    #[error("failed to subscribe to topic '{topic}': {reason}")]
    Subscribe { topic: String, reason: String },

    /// Topic has been closed and accepts no more traffic
    #[error("topic '{0}' is closed")]
    TopicClosed(String),
}

impl BrokerError {
    /// Publish failures are assumed recoverable; a closed topic is not.
    pub fn is_transient(&self) -> bool {
        matches!(self, BrokerError::Publish { .. } | BrokerError::Subscribe { .. })
    }
}

/// Acknowledgment half of a delivery, implemented per broker.
#[async_trait]
pub trait Acker: Send {
    /// Mark the delivery as consumed.
    async fn ack(self: Box<Self>);

    /// Return the delivery to the broker for redelivery to the group.
    async fn nack(self: Box<Self>);
}

/// A single message handed to a consumer group member.
///
/// Dropping a delivery without acking leaves redelivery to the broker's
/// policy; callers decide per priority tier.
pub struct Delivery {
    /// Partition key the message was published under
    pub key: String,
    /// Serialized message payload
    pub payload: Vec<u8>,
    /// How many times this message has been redelivered
    pub redelivery_count: u32,
    acker: Box<dyn Acker>,
}

impl Delivery {
    /// Assemble a delivery from its parts (used by broker implementations).
    pub fn new(key: String, payload: Vec<u8>, redelivery_count: u32, acker: Box<dyn Acker>) -> Self {
        Self {
            key,
            payload,
            redelivery_count,
            acker,
        }
    }

    /// Acknowledge the delivery as consumed.
    pub async fn ack(self) {
        self.acker.ack().await;
    }

    /// Reject the delivery and request redelivery.
    pub async fn nack(self) {
        self.acker.nack().await;
    }
}

/// One consumer group member's view of a topic.
#[async_trait]
pub trait Subscription: Send {
    /// Receive the next delivery, or `None` once the topic is closed.
    async fn next(&mut self) -> Option<Delivery>;
}

/// Broker seam for publishing and group consumption.
///
/// Implementations must be thread-safe (`Send + Sync`) as they are shared
/// across the producer, the dispatcher worker pools, and the status
/// subscriber.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish a payload under a partition key.
    ///
    /// At-least-once: a successful return means the broker accepted the
    /// message; duplicate delivery to consumers remains possible.
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), BrokerError>;

    /// Join a consumer group on a topic.
    ///
    /// Each call returns one group member; messages are distributed among
    /// the members of the same group.
    async fn subscribe(&self, topic: &str, group: &str)
        -> Result<Box<dyn Subscription>, BrokerError>;
}
