//! Outbox record types.

use hostmeter_types::CanonicalEvent;
use serde::Serialize;

/// Delivery state of an outbox record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    /// Written, not yet accepted downstream.
    Pending,
    /// Accepted downstream (or logged while emission was disabled).
    Sent,
}

impl DeliveryState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
        }
    }
}

impl std::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeliveryState {
    type Err = ParseDeliveryStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            _ => Err(ParseDeliveryStateError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown delivery state string.
#[derive(Debug, Clone)]
pub struct ParseDeliveryStateError(pub String);

impl std::fmt::Display for ParseDeliveryStateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown delivery state: {}", self.0)
    }
}

impl std::error::Error for ParseDeliveryStateError {}

/// A stored canonical event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboxRecord {
    pub id: i64,
    pub org_id: String,
    pub event: CanonicalEvent,
    pub state: DeliveryState,
    pub created_at: String,
    pub sent_at: Option<String>,
}
