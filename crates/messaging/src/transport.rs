use std::time::Duration;

use async_trait::async_trait;

use crate::{Result, message::EventMessage};

/// Publishing side of the message transport.
///
/// Implementations must be thread-safe: the outbox dispatcher publishes from
/// a background task while producers keep enqueuing.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Publishes a JSON payload to a topic.
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<()>;

    /// Opens a durable subscription on a topic.
    ///
    /// Subscribing again with the same name resumes the existing
    /// subscription: messages that arrived in the meantime, plus any that
    /// were delivered but never acknowledged, are delivered again.
    async fn subscribe(&self, topic: &str, subscription: &str) -> Result<Box<dyn Subscription>>;
}

/// Consuming side of one durable subscription.
#[async_trait]
pub trait Subscription: Send {
    /// Waits up to `timeout` for the next message.
    ///
    /// `None` on timeout, so callers can check a shutdown flag between
    /// messages instead of blocking indefinitely.
    async fn receive(&mut self, timeout: Duration) -> Result<Option<EventMessage>>;

    /// Acknowledges a message: it will not be delivered again.
    async fn ack(&mut self, message: &EventMessage) -> Result<()>;

    /// Negatively acknowledges a message: it is requeued for redelivery.
    async fn nack(&mut self, message: &EventMessage) -> Result<()>;
}
