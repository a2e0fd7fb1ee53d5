//! Integration events this service consumes from other services.

use uuid::Uuid;

/// Every cross-service event the consumer understands.
///
/// The enum is closed: payloads that do not map to a known variant become
/// `Unknown`, which the consumer logs and acknowledges so a bad payload can
/// never wedge a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum IntegrationEvent {
    AffiliateCreated {
        affiliate_id: Uuid,
        name: String,
        email: String,
    },
    AffiliateActivated {
        affiliate_id: Uuid,
    },
    AffiliateDeactivated {
        affiliate_id: Uuid,
        reason: Option<String>,
    },
    CommissionRateUpdated {
        affiliate_id: Uuid,
        rate: f64,
    },
    ConversionRecorded {
        conversion_id: Uuid,
        affiliate_id: Uuid,
        amount: f64,
    },
    CommissionCreated {
        commission_id: Uuid,
        affiliate_id: Uuid,
        amount: f64,
    },
    CommissionPaid {
        commission_id: Uuid,
    },
    CommissionCancelled {
        commission_id: Uuid,
        reason: Option<String>,
    },
    /// Anything the mapper could not understand.
    Unknown {
        event_type: String,
    },
}

impl IntegrationEvent {
    /// The wire-level event type name.
    pub fn event_type(&self) -> &str {
        match self {
            IntegrationEvent::AffiliateCreated { .. } => "AffiliateCreated",
            IntegrationEvent::AffiliateActivated { .. } => "AffiliateActivated",
            IntegrationEvent::AffiliateDeactivated { .. } => "AffiliateDeactivated",
            IntegrationEvent::CommissionRateUpdated { .. } => "CommissionRateUpdated",
            IntegrationEvent::ConversionRecorded { .. } => "ConversionRecorded",
            IntegrationEvent::CommissionCreated { .. } => "CommissionCreated",
            IntegrationEvent::CommissionPaid { .. } => "CommissionPaid",
            IntegrationEvent::CommissionCancelled { .. } => "CommissionCancelled",
            IntegrationEvent::Unknown { event_type } => event_type,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, IntegrationEvent::Unknown { .. })
    }
}
