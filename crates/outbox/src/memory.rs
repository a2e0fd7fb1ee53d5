use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use common::RetryPolicy;
use tokio::sync::RwLock;

use crate::Result;
use crate::error::OutboxError;
use crate::event::{NewOutboxEvent, OutboxEvent, OutboxEventId, OutboxStatus, cap_error_message};
use crate::store::{OutboxStore, QueueDepth};

/// In-memory outbox store implementation.
///
/// Useful for testing and development. Events live in a Vec in enqueue
/// order, which doubles as the FIFO order `claim_pending` serves.
#[derive(Clone, Default)]
pub struct InMemoryOutboxStore {
    events: Arc<RwLock<Vec<OutboxEvent>>>,
}

impl InMemoryOutboxStore {
    /// Creates a new empty in-memory outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events held, across all statuses.
    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    /// Fetches one event by id, for assertions in tests.
    pub async fn get(&self, id: OutboxEventId) -> Option<OutboxEvent> {
        self.events.read().await.iter().find(|e| e.id == id).cloned()
    }

    /// Clears all events.
    pub async fn clear(&self) {
        self.events.write().await.clear();
    }

    async fn update<F>(&self, id: OutboxEventId, apply: F) -> Result<()>
    where
        F: FnOnce(&mut OutboxEvent),
    {
        let mut events = self.events.write().await;
        let event = events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(OutboxError::NotFound(id))?;
        apply(event);
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn enqueue(&self, event: NewOutboxEvent) -> Result<OutboxEvent> {
        let event = event.into_event();
        self.events.write().await.push(event.clone());
        Ok(event)
    }

    async fn claim_pending(&self, limit: usize) -> Result<Vec<OutboxEvent>> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|e| e.status == OutboxStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_processed(&self, id: OutboxEventId) -> Result<()> {
        self.update(id, |event| {
            event.status = OutboxStatus::Processed;
            event.processed_at = Some(Utc::now());
            event.error_message = None;
        })
        .await
    }

    async fn mark_failed(&self, id: OutboxEventId, error: &str) -> Result<()> {
        self.update(id, |event| {
            event.status = OutboxStatus::Failed;
            event.retry_count += 1;
            event.error_message = Some(cap_error_message(error));
        })
        .await
    }

    async fn release_for_retry(&self, policy: &RetryPolicy) -> Result<usize> {
        let now = Utc::now();
        let mut events = self.events.write().await;
        let mut released = 0;
        for event in events.iter_mut() {
            if event.status != OutboxStatus::Failed || policy.is_exhausted(event.retry_count) {
                continue;
            }
            let backoff = ChronoDuration::seconds(
                policy.delay_for(event.retry_count).as_secs().min(i64::MAX as u64) as i64,
            );
            if event.created_at + backoff <= now {
                event.status = OutboxStatus::Pending;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn delete_processed_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut events = self.events.write().await;
        let before = events.len();
        events.retain(|e| {
            e.status != OutboxStatus::Processed
                || e.processed_at.map(|at| at >= cutoff).unwrap_or(true)
        });
        Ok((before - events.len()) as u64)
    }

    async fn queue_depth(&self) -> Result<QueueDepth> {
        let events = self.events.read().await;
        let mut depth = QueueDepth::default();
        for event in events.iter() {
            match event.status {
                OutboxStatus::Pending => depth.pending += 1,
                OutboxStatus::Processed => depth.processed += 1,
                OutboxStatus::Failed => depth.failed += 1,
            }
        }
        Ok(depth)
    }
}
