use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a transport message, used for ack/nack bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new random message ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One message as delivered to a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct EventMessage {
    pub id: MessageId,
    pub topic: String,
    pub payload: serde_json::Value,
    pub published_at: DateTime<Utc>,
}

impl EventMessage {
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: MessageId::new(),
            topic: topic.into(),
            payload,
            published_at: Utc::now(),
        }
    }
}

/// Wire shape of every integration event published through the outbox.
///
/// Consumers receive this envelope and map `data` to a typed event based on
/// `event_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationEnvelope {
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl IntegrationEnvelope {
    pub fn new(
        event_type: impl Into<String>,
        aggregate_type: impl Into<String>,
        aggregate_id: Uuid,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            aggregate_type: aggregate_type.into(),
            aggregate_id,
            timestamp: Utc::now(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serialization_keeps_field_names() {
        let envelope = IntegrationEnvelope::new(
            "affiliate_created",
            "Affiliate",
            Uuid::new_v4(),
            serde_json::json!({"name": "Maria"}),
        );

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["event_type"], "affiliate_created");
        assert_eq!(json["aggregate_type"], "Affiliate");
        assert_eq!(json["data"]["name"], "Maria");

        let back: IntegrationEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn message_ids_are_unique() {
        assert_ne!(MessageId::new(), MessageId::new());
    }
}
