use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::{
    Result, TransportError,
    message::{EventMessage, MessageId},
    transport::{MessageTransport, Subscription},
};

type SubscriptionKey = (String, String);

#[derive(Default)]
struct SubscriptionQueue {
    pending: VecDeque<EventMessage>,
    in_flight: HashMap<MessageId, EventMessage>,
    notify: Arc<Notify>,
}

#[derive(Default)]
struct BrokerState {
    subscriptions: HashMap<SubscriptionKey, SubscriptionQueue>,
    published: Vec<(String, serde_json::Value)>,
    fail_publish: bool,
    fail_subscribes_remaining: u32,
}

/// In-process message transport for testing and single-node deployments.
///
/// Subscriptions are durable for the life of the process: messages published
/// while no handle is polling accumulate under the subscription name, and
/// unacknowledged deliveries are requeued when the subscription reopens.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryTransport {
    /// Creates a new empty transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every publish fail until reset.
    pub fn set_fail_publish(&self, fail: bool) {
        self.state.lock().unwrap().fail_publish = fail;
    }

    /// Makes the next `n` subscribe calls fail.
    pub fn fail_next_subscribes(&self, n: u32) {
        self.state.lock().unwrap().fail_subscribes_remaining = n;
    }

    /// Every payload published so far, in publish order.
    pub fn published(&self) -> Vec<(String, serde_json::Value)> {
        self.state.lock().unwrap().published.clone()
    }

    /// Payloads published to one topic, in publish order.
    pub fn published_to(&self, topic: &str) -> Vec<serde_json::Value> {
        self.state
            .lock()
            .unwrap()
            .published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Number of messages waiting (not in flight) on a subscription.
    pub fn pending_count(&self, topic: &str, subscription: &str) -> usize {
        let key = (topic.to_string(), subscription.to_string());
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .get(&key)
            .map(|q| q.pending.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageTransport for InMemoryTransport {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_publish {
            return Err(TransportError::Connection(
                "publish failed (injected)".to_string(),
            ));
        }

        state.published.push((topic.to_string(), payload.clone()));
        for ((t, _), queue) in state.subscriptions.iter_mut() {
            if t == topic {
                queue.pending.push_back(EventMessage::new(topic, payload.clone()));
                queue.notify.notify_one();
            }
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, subscription: &str) -> Result<Box<dyn Subscription>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_subscribes_remaining > 0 {
            state.fail_subscribes_remaining -= 1;
            return Err(TransportError::Connection(
                "subscribe failed (injected)".to_string(),
            ));
        }

        let key = (topic.to_string(), subscription.to_string());
        let queue = state.subscriptions.entry(key.clone()).or_default();

        // A reopened subscription gets anything a previous session received
        // but never acknowledged.
        let unacked: Vec<_> = queue.in_flight.drain().map(|(_, m)| m).collect();
        for message in unacked {
            queue.pending.push_back(message);
        }

        Ok(Box::new(InMemorySubscription {
            state: Arc::clone(&self.state),
            key,
        }))
    }
}

struct InMemorySubscription {
    state: Arc<Mutex<BrokerState>>,
    key: SubscriptionKey,
}

impl InMemorySubscription {
    fn closed(&self) -> TransportError {
        TransportError::Closed(format!("{}/{}", self.key.0, self.key.1))
    }
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn receive(&mut self, timeout: Duration) -> Result<Option<EventMessage>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notify = {
                let mut state = self.state.lock().unwrap();
                let queue = state
                    .subscriptions
                    .get_mut(&self.key)
                    .ok_or_else(|| self.closed())?;
                if let Some(message) = queue.pending.pop_front() {
                    queue.in_flight.insert(message.id, message.clone());
                    return Ok(Some(message));
                }
                Arc::clone(&queue.notify)
            };

            tokio::select! {
                _ = notify.notified() => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            }
        }
    }

    async fn ack(&mut self, message: &EventMessage) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(queue) = state.subscriptions.get_mut(&self.key) {
            queue.in_flight.remove(&message.id);
        }
        Ok(())
    }

    async fn nack(&mut self, message: &EventMessage) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let queue = state
            .subscriptions
            .get_mut(&self.key)
            .ok_or_else(|| self.closed())?;
        if let Some(requeued) = queue.in_flight.remove(&message.id) {
            queue.pending.push_back(requeued);
            queue.notify.notify_one();
        }
        Ok(())
    }
}
