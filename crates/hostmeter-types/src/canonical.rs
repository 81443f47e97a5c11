//! Canonical billing events produced by the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Source label stamped on every canonical event.
pub const EVENT_SOURCE: &str = "HBI_HOST";

/// Service type stamped on every canonical event.
pub const SERVICE_TYPE: &str = "RHEL System";

/// Lifecycle transition a canonical event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    InstanceCreated,
    InstanceUpdated,
    InstanceDeleted,
}

impl EventType {
    /// Returns the canonical string label for this event type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InstanceCreated => "INSTANCE_CREATED",
            Self::InstanceUpdated => "INSTANCE_UPDATED",
            Self::InstanceDeleted => "INSTANCE_DELETED",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = ParseEventTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSTANCE_CREATED" => Ok(Self::InstanceCreated),
            "INSTANCE_UPDATED" => Ok(Self::InstanceUpdated),
            "INSTANCE_DELETED" => Ok(Self::InstanceDeleted),
            _ => Err(ParseEventTypeError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown event type string.
#[derive(Debug, Clone)]
pub struct ParseEventTypeError(pub String);

impl std::fmt::Display for ParseEventTypeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown event type: {}", self.0)
    }
}

impl std::error::Error for ParseEventTypeError {}

/// Service level agreement declared through system purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sla {
    Premium,
    Standard,
    #[serde(rename = "Self-Support")]
    SelfSupport,
}

impl Sla {
    /// Parses a raw fact value, case-insensitively. Unknown values yield `None`.
    pub fn from_fact(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "premium" => Some(Self::Premium),
            "standard" => Some(Self::Standard),
            "self-support" => Some(Self::SelfSupport),
            _ => None,
        }
    }
}

/// Intended usage declared through system purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Usage {
    Production,
    #[serde(rename = "Development/Test")]
    DevelopmentTest,
    #[serde(rename = "Disaster Recovery")]
    DisasterRecovery,
}

impl Usage {
    /// Parses a raw fact value, case-insensitively. Unknown values yield `None`.
    pub fn from_fact(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" => Some(Self::Production),
            "development/test" => Some(Self::DevelopmentTest),
            "disaster recovery" => Some(Self::DisasterRecovery),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HardwareType {
    Physical,
    Virtual,
    Cloud,
}

/// Public clouds whose instances are metered as cloud hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloudProvider {
    Aws,
    Azure,
    Gcp,
    Alibaba,
}

impl CloudProvider {
    /// Parses a system-profile `cloud_provider` value, case-insensitively.
    pub fn from_fact(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "aws" => Some(Self::Aws),
            "azure" => Some(Self::Azure),
            "gcp" => Some(Self::Gcp),
            "alibaba" => Some(Self::Alibaba),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricId {
    Cores,
    Sockets,
}

/// A single metered value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub metric_id: MetricId,
    pub value: f64,
}

/// A canonical billing event, as stored in the outbox and published.
///
/// `event_id` is assigned once at construction; consumers deduplicate on it,
/// so re-flushing an outbox record republishes the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub event_id: Uuid,
    pub org_id: String,
    pub instance_id: String,
    pub event_type: EventType,
    pub event_source: String,
    pub service_type: String,
    pub timestamp: DateTime<Utc>,
    pub expiration: DateTime<Utc>,
    #[serde(default)]
    pub inventory_id: Option<String>,
    #[serde(default)]
    pub insights_id: Option<String>,
    #[serde(default)]
    pub subscription_manager_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub hypervisor_uuid: Option<String>,
    #[serde(default)]
    pub sla: Option<Sla>,
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub hardware_type: Option<HardwareType>,
    #[serde(default)]
    pub cloud_provider: Option<CloudProvider>,
    #[serde(default)]
    pub product_ids: Vec<String>,
    #[serde(default)]
    pub product_tags: Vec<String>,
    #[serde(default)]
    pub is_virtual: bool,
    #[serde(default)]
    pub is_hypervisor: bool,
    #[serde(default)]
    pub is_unmapped_guest: bool,
    #[serde(default)]
    pub conversion: bool,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub measurements: Vec<Measurement>,
}

impl CanonicalEvent {
    /// Returns the value recorded for `metric`, if any.
    pub fn measurement(&self, metric: MetricId) -> Option<f64> {
        self.measurements
            .iter()
            .find(|m| m.metric_id == metric)
            .map(|m| m.value)
    }
}
