//! Background dispatcher that drains the outbox to the message broker.

use std::time::Duration;

use chrono::Utc;
use common::RetryPolicy;
use messaging::{AggregateType, IntegrationEnvelope, MessageTransport};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::Result;
use crate::event::OutboxEvent;
use crate::store::OutboxStore;

/// Tuning knobs for the dispatcher loop.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// How often the outbox is polled.
    pub poll_interval: Duration,
    /// Maximum events published per pass.
    pub batch_size: usize,
    /// Backoff policy for failed events; its attempt budget is the retry cap.
    pub retry: RetryPolicy,
    /// How long processed events are kept before cleanup deletes them.
    pub retention: Duration,
    /// How often the cleanup pass runs.
    pub cleanup_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 100,
            retry: RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(300)),
            retention: Duration::from_secs(7 * 24 * 60 * 60),
            cleanup_interval: Duration::from_secs(60 * 60),
        }
    }
}

/// Counters from one dispatch pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchStats {
    pub released: usize,
    pub published: usize,
    pub failed: usize,
}

/// Polls the outbox and publishes pending events to the broker.
///
/// Exactly one dispatcher should run against a given outbox; events are
/// published oldest first and delivery is at-least-once. Failed events are
/// retried with exponential backoff until the retry budget runs out, after
/// which they stay failed for manual inspection.
pub struct OutboxDispatcher<S, T>
where
    S: OutboxStore,
    T: MessageTransport,
{
    store: S,
    transport: T,
    config: DispatcherConfig,
}

impl<S, T> OutboxDispatcher<S, T>
where
    S: OutboxStore,
    T: MessageTransport,
{
    pub fn new(store: S, transport: T, config: DispatcherConfig) -> Self {
        Self {
            store,
            transport,
            config,
        }
    }

    /// Runs dispatch passes until the shutdown signal flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            "outbox dispatcher started"
        );

        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cleanup = tokio::time::interval(self.config.cleanup_interval);
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of an interval fires immediately; swallow the
        // cleanup one so startup does not begin with a delete.
        cleanup.tick().await;

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    if let Err(e) = self.run_once().await {
                        metrics::counter!("outbox_dispatch_errors_total").increment(1);
                        tracing::error!(error = %e, "outbox dispatch pass failed");
                        // A failed pass usually means the store is unhappy;
                        // wait a doubled interval before polling it again.
                        poll.reset_after(self.config.poll_interval * 2);
                    }
                }
                _ = cleanup.tick() => {
                    if let Err(e) = self.cleanup().await {
                        tracing::error!(error = %e, "outbox cleanup failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("outbox dispatcher stopped");
    }

    /// One dispatch pass: release due retries, then publish a batch.
    pub async fn run_once(&self) -> Result<DispatchStats> {
        let mut stats = DispatchStats {
            released: self.store.release_for_retry(&self.config.retry).await?,
            ..DispatchStats::default()
        };
        if stats.released > 0 {
            tracing::info!(released = stats.released, "re-queued failed outbox events");
        }

        let batch = self.store.claim_pending(self.config.batch_size).await?;
        for event in batch {
            match self.publish(&event).await {
                Ok(()) => {
                    self.store.mark_processed(event.id).await?;
                    metrics::counter!("outbox_published_total").increment(1);
                    stats.published += 1;
                }
                Err(reason) => {
                    tracing::warn!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        retry_count = event.retry_count,
                        reason,
                        "outbox publish failed"
                    );
                    self.store.mark_failed(event.id, &reason).await?;
                    metrics::counter!("outbox_publish_failures_total").increment(1);
                    stats.failed += 1;
                }
            }
        }

        let depth = self.store.queue_depth().await?;
        metrics::gauge!("outbox_pending_events").set(depth.pending as f64);
        metrics::gauge!("outbox_failed_events").set(depth.failed as f64);

        if stats.published > 0 || stats.failed > 0 {
            tracing::debug!(
                published = stats.published,
                failed = stats.failed,
                "outbox dispatch pass finished"
            );
        }
        Ok(stats)
    }

    /// Deletes processed events past the retention window.
    pub async fn cleanup(&self) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.config.retention.as_secs() as i64);
        let deleted = self.store.delete_processed_before(cutoff).await?;
        if deleted > 0 {
            tracing::info!(deleted, "cleaned up processed outbox events");
        }
        Ok(deleted)
    }

    async fn publish(&self, event: &OutboxEvent) -> std::result::Result<(), String> {
        let aggregate_type = AggregateType::parse(&event.aggregate_type)
            .ok_or_else(|| format!("unknown aggregate type: {}", event.aggregate_type))?;

        let envelope = IntegrationEnvelope::new(
            &event.event_type,
            &event.aggregate_type,
            event.aggregate_id,
            event.payload.clone(),
        );
        let payload = serde_json::to_value(&envelope).map_err(|e| e.to_string())?;

        self.transport
            .publish(aggregate_type.topic(), payload)
            .await
            .map_err(|e| e.to_string())
    }
}
