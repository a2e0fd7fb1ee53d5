//! Maps broker envelopes to typed integration events.

use messaging::IntegrationEnvelope;
use serde_json::Value;
use uuid::Uuid;

use crate::events::IntegrationEvent;

/// Maps an envelope received on `topic` to a typed event.
///
/// The mapping is total: unexpected event types, events on the wrong topic,
/// and payloads with missing or malformed fields all collapse to
/// [`IntegrationEvent::Unknown`] instead of an error.
pub fn map_envelope(topic: &str, envelope: &IntegrationEnvelope) -> IntegrationEvent {
    try_map(topic, envelope).unwrap_or_else(|| IntegrationEvent::Unknown {
        event_type: envelope.event_type.clone(),
    })
}

fn try_map(topic: &str, envelope: &IntegrationEnvelope) -> Option<IntegrationEvent> {
    let data = &envelope.data;
    match (topic, envelope.event_type.as_str()) {
        ("affiliate-events", "AffiliateCreated") => Some(IntegrationEvent::AffiliateCreated {
            affiliate_id: get_uuid(data, "affiliate_id")?,
            name: get_string(data, "name")?,
            email: get_string(data, "email")?,
        }),
        ("affiliate-events", "AffiliateActivated") => Some(IntegrationEvent::AffiliateActivated {
            affiliate_id: get_uuid(data, "affiliate_id")?,
        }),
        ("affiliate-events", "AffiliateDeactivated") => {
            Some(IntegrationEvent::AffiliateDeactivated {
                affiliate_id: get_uuid(data, "affiliate_id")?,
                reason: get_optional_string(data, "reason"),
            })
        }
        ("affiliate-events", "CommissionRateUpdated") => {
            Some(IntegrationEvent::CommissionRateUpdated {
                affiliate_id: get_uuid(data, "affiliate_id")?,
                rate: get_f64(data, "rate")?,
            })
        }
        ("conversion-events", "ConversionRecorded") => Some(IntegrationEvent::ConversionRecorded {
            conversion_id: get_uuid(data, "conversion_id")?,
            affiliate_id: get_uuid(data, "affiliate_id")?,
            amount: get_f64(data, "amount")?,
        }),
        ("commission-events", "CommissionCreated") => Some(IntegrationEvent::CommissionCreated {
            commission_id: get_uuid(data, "commission_id")?,
            affiliate_id: get_uuid(data, "affiliate_id")?,
            amount: get_f64(data, "amount")?,
        }),
        ("commission-events", "CommissionPaid") => Some(IntegrationEvent::CommissionPaid {
            commission_id: get_uuid(data, "commission_id")?,
        }),
        ("commission-events", "CommissionCancelled") => {
            Some(IntegrationEvent::CommissionCancelled {
                commission_id: get_uuid(data, "commission_id")?,
                reason: get_optional_string(data, "reason"),
            })
        }
        _ => None,
    }
}

fn get_uuid(data: &Value, key: &str) -> Option<Uuid> {
    data.get(key)?.as_str()?.parse().ok()
}

fn get_string(data: &Value, key: &str) -> Option<String> {
    Some(data.get(key)?.as_str()?.to_string())
}

fn get_optional_string(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_string)
}

fn get_f64(data: &Value, key: &str) -> Option<f64> {
    data.get(key)?.as_f64()
}
