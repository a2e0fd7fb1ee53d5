//! The consumer loop: one durable subscription, processed one message at a
//! time, with bounded reconnection on transport failures.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use common::RetryPolicy;
use messaging::{
    EventMessage, IntegrationEnvelope, MessageTransport, Subscription, subscription_name,
};
use tokio::sync::watch;

use crate::events::IntegrationEvent;
use crate::handler::EventHandler;
use crate::mapper::map_envelope;

/// Settings for one topic consumer.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Used as the subscription name prefix, so each service gets its own
    /// durable cursor per topic.
    pub service_name: String,
    pub topic: String,
    /// How long one receive call waits before checking for shutdown.
    pub receive_timeout: Duration,
    /// Backoff between reconnect attempts; its attempt budget decides when
    /// the consumer gives up.
    pub reconnect: RetryPolicy,
}

impl ConsumerConfig {
    pub fn new(service_name: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            topic: topic.into(),
            receive_timeout: Duration::from_secs(30),
            reconnect: RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(60)),
        }
    }

    pub fn subscription(&self) -> String {
        subscription_name(&self.service_name, &self.topic)
    }
}

/// Why the consumer loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerExit {
    /// Stopped because shutdown was signalled.
    Shutdown,
    /// Gave up after exhausting the reconnect budget.
    GaveUp,
}

enum LoopEnd {
    Shutdown,
    ConnectionLost { made_progress: bool },
}

/// Consumes one topic and feeds every mapped event to a handler.
///
/// Messages are acknowledged only after the handler decides: success and
/// non-recoverable failures ack, recoverable failures nack for redelivery.
/// Unknown payloads are logged and acked so they can never wedge the
/// subscription.
pub struct EventConsumer<T, H>
where
    T: MessageTransport,
    H: EventHandler,
{
    transport: T,
    handler: H,
    config: ConsumerConfig,
    healthy: Arc<AtomicBool>,
}

impl<T, H> EventConsumer<T, H>
where
    T: MessageTransport,
    H: EventHandler,
{
    pub fn new(transport: T, handler: H, config: ConsumerConfig) -> Self {
        Self {
            transport,
            handler,
            config,
            healthy: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Shared flag that flips to false when the consumer gives up.
    pub fn health_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.healthy)
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Runs until shutdown or until reconnection gives up.
    #[tracing::instrument(skip(self, shutdown), fields(topic = %self.config.topic))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> ConsumerExit {
        let subscription = self.config.subscription();
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow() {
                return ConsumerExit::Shutdown;
            }

            match self
                .transport
                .subscribe(&self.config.topic, &subscription)
                .await
            {
                Ok(mut active) => {
                    tracing::info!(subscription = %subscription, "subscription open");
                    match self.consume_loop(active.as_mut(), &mut shutdown).await {
                        LoopEnd::Shutdown => return ConsumerExit::Shutdown,
                        LoopEnd::ConnectionLost { made_progress } => {
                            // A connection that served us resets the budget;
                            // a flapping one keeps burning it down.
                            if made_progress {
                                attempt = 0;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to open subscription");
                }
            }

            attempt += 1;
            metrics::counter!("consumer_reconnects_total").increment(1);
            if self.config.reconnect.is_exhausted(attempt) {
                self.healthy.store(false, Ordering::SeqCst);
                metrics::gauge!("consumer_healthy", "topic" => self.config.topic.clone()).set(0.0);
                tracing::error!(
                    attempts = attempt,
                    "giving up on subscription after repeated failures"
                );
                return ConsumerExit::GaveUp;
            }

            let delay = self.config.reconnect.delay_for(attempt);
            tracing::info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "reconnecting after backoff"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return ConsumerExit::Shutdown;
                    }
                }
            }
        }
    }

    async fn consume_loop(
        &self,
        subscription: &mut dyn Subscription,
        shutdown: &mut watch::Receiver<bool>,
    ) -> LoopEnd {
        self.healthy.store(true, Ordering::SeqCst);
        metrics::gauge!("consumer_healthy", "topic" => self.config.topic.clone()).set(1.0);

        let mut made_progress = false;
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return LoopEnd::Shutdown;
                    }
                }
                received = subscription.receive(self.config.receive_timeout) => {
                    match received {
                        Ok(Some(message)) => {
                            made_progress = true;
                            if let Err(e) = self.process(subscription, &message).await {
                                tracing::warn!(error = %e, "subscription broke while processing");
                                return LoopEnd::ConnectionLost { made_progress };
                            }
                        }
                        // Idle timeout; a healthy connection, nothing to do.
                        Ok(None) => {
                            made_progress = true;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "receive failed");
                            return LoopEnd::ConnectionLost { made_progress };
                        }
                    }
                }
            }
        }
    }

    async fn process(
        &self,
        subscription: &mut dyn Subscription,
        message: &EventMessage,
    ) -> messaging::Result<()> {
        metrics::counter!("consumer_messages_total").increment(1);

        let envelope: IntegrationEnvelope = match serde_json::from_value(message.payload.clone()) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(
                    message_id = %message.id,
                    error = %e,
                    "dropping message with unreadable payload"
                );
                metrics::counter!("consumer_unknown_total").increment(1);
                return subscription.ack(message).await;
            }
        };

        let event = map_envelope(&self.config.topic, &envelope);
        if let IntegrationEvent::Unknown { event_type } = &event {
            tracing::warn!(
                message_id = %message.id,
                event_type,
                "dropping unrecognized event"
            );
            metrics::counter!("consumer_unknown_total").increment(1);
            return subscription.ack(message).await;
        }

        match self.handler.handle(event).await {
            Ok(()) => {
                metrics::counter!("consumer_processed_total").increment(1);
                subscription.ack(message).await
            }
            Err(e) if e.is_recoverable() => {
                tracing::warn!(
                    message_id = %message.id,
                    error = %e,
                    "handler failed, requeueing for redelivery"
                );
                metrics::counter!("consumer_requeued_total").increment(1);
                subscription.nack(message).await
            }
            Err(e) => {
                tracing::error!(
                    message_id = %message.id,
                    error = %e,
                    "handler rejected event, dropping"
                );
                metrics::counter!("consumer_dropped_total").increment(1);
                subscription.ack(message).await
            }
        }
    }
}
