use serde::{Deserialize, Serialize};

/// Closed set of aggregate kinds that publish integration events.
///
/// Each kind maps 1:1 to a transport topic. Outbox rows store the wire tag as
/// text; anything that does not parse here is not publishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateType {
    Affiliate,
    Conversion,
    Commission,
}

impl AggregateType {
    /// The tag stored in outbox rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateType::Affiliate => "Affiliate",
            AggregateType::Conversion => "Conversion",
            // Legacy tag kept for rows written by the services that predate
            // the English naming.
            AggregateType::Commission => "Comision",
        }
    }

    /// The transport topic this aggregate's events are published to.
    pub fn topic(&self) -> &'static str {
        match self {
            AggregateType::Affiliate => "affiliate-events",
            AggregateType::Conversion => "conversion-events",
            AggregateType::Commission => "commission-events",
        }
    }

    /// Parses a stored tag. Unknown tags are `None`, never a panic.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Affiliate" => Some(AggregateType::Affiliate),
            "Conversion" => Some(AggregateType::Conversion),
            "Comision" | "Commission" => Some(AggregateType::Commission),
            _ => None,
        }
    }
}

impl std::fmt::Display for AggregateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Builds the durable subscription name for a consuming service and topic.
///
/// Names must stay stable across restarts so the transport can resume
/// delivery from the recorded position.
pub fn subscription_name(service: &str, topic: &str) -> String {
    format!("{service}-{topic}")
}
