use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::RetryPolicy;

use crate::Result;
use crate::event::{NewOutboxEvent, OutboxEvent, OutboxEventId};

/// Queue depth counters used for gauges and operator visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueDepth {
    pub pending: i64,
    pub processed: i64,
    pub failed: i64,
}

/// Core trait for outbox store implementations.
///
/// The store is the durable half of the transactional outbox: events are
/// enqueued alongside the state change that caused them and drained by a
/// single dispatcher in creation order. Delivery is at-least-once; consumers
/// must tolerate duplicates.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Adds an event to the queue in `pending` state.
    async fn enqueue(&self, event: NewOutboxEvent) -> Result<OutboxEvent>;

    /// Fetches up to `limit` pending events, oldest first.
    async fn claim_pending(&self, limit: usize) -> Result<Vec<OutboxEvent>>;

    /// Marks an event successfully published.
    async fn mark_processed(&self, id: OutboxEventId) -> Result<()>;

    /// Marks a publish attempt failed, bumping the retry count and keeping a
    /// capped error message.
    async fn mark_failed(&self, id: OutboxEventId, error: &str) -> Result<()>;

    /// Moves failed events whose backoff has elapsed back to `pending`.
    ///
    /// An event becomes eligible once `created_at + delay_for(retry_count)`
    /// has passed; events that exhausted the policy's attempts stay failed
    /// for manual inspection. Returns how many events were released.
    async fn release_for_retry(&self, policy: &RetryPolicy) -> Result<usize>;

    /// Deletes processed events older than the cutoff. Returns how many rows
    /// were removed.
    async fn delete_processed_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Current queue depth by status.
    async fn queue_depth(&self) -> Result<QueueDepth>;
}
