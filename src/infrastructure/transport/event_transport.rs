//! Message transport contract for access events.

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::access_event::AccessEvent;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("transport connection error: {0}")]
    Connection(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("receive failed: {0}")]
    Receive(String),

    #[error("acknowledgement of {tag} failed: {reason}")]
    Ack { tag: String, reason: String },
}

pub type TransportResult<T> = Result<T, TransportError>;

/// A received message awaiting ack or nack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Transport-assigned identifier used for acknowledgement.
    pub tag: String,
    pub message_id: String,
    /// Serialized [`AccessEvent`].
    pub payload: String,
    /// 1 on first delivery, incremented on every nack.
    pub attempt: u32,
}

/// At-least-once publish/subscribe for access events.
///
/// A delivery stays pending until acked; a nacked delivery is redelivered
/// later, possibly to another consumer.
///
/// # Implementations
///
/// - [`crate::infrastructure::transport::RedisStreamTransport`] - Redis Streams consumer group
/// - [`crate::infrastructure::transport::MemoryTransport`] - In-process queue
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn publish(&self, event: &AccessEvent) -> TransportResult<()>;

    /// Waits up to `max_wait` for the next delivery.
    async fn receive(&self, max_wait: Duration) -> TransportResult<Option<Delivery>>;

    async fn ack(&self, delivery: &Delivery) -> TransportResult<()>;

    /// Returns `delivery` to the transport for redelivery.
    async fn nack(&self, delivery: Delivery) -> TransportResult<()>;

    async fn ping(&self) -> TransportResult<()>;
}
