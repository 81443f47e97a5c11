//! Inbound host-inventory lifecycle events.
//!
//! Messages arrive as JSON objects carrying a `type` discriminator. The
//! discriminator is read first and the body is then decoded into the
//! matching variant; kinds this crate does not model are kept raw in
//! [`HbiEvent::Other`] so routing decisions stay with the dispatcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Discriminator of a host creation event.
pub const KIND_CREATED: &str = "created";
/// Discriminator of a host update event.
pub const KIND_UPDATED: &str = "updated";
/// Discriminator of a host deletion event.
pub const KIND_DELETE: &str = "delete";

/// Errors raised while decoding an inbound message.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The message is not valid JSON or does not match the variant's shape.
    #[error("malformed inbound message: {0}")]
    Json(#[from] serde_json::Error),

    /// The message has no string `type` field.
    #[error("inbound message has no event type")]
    MissingKind,
}

/// A decoded inbound event, tagged by its discriminator.
#[derive(Debug, Clone, PartialEq)]
pub enum HbiEvent {
    /// `created` or `updated`.
    CreateUpdate(HbiHostCreateUpdateEvent),
    /// `delete`.
    Delete(HbiHostDeleteEvent),
    /// Any other discriminator.
    Other(UnknownHbiEvent),
}

impl HbiEvent {
    /// Decodes a raw message body.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError::MissingKind` when the `type` field is absent and
    /// `DecodeError::Json` when the body does not match the variant it names.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    /// Decodes an already-parsed JSON value.
    ///
    /// # Errors
    ///
    /// See [`HbiEvent::from_slice`].
    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingKind)?
            .to_string();

        match kind.as_str() {
            KIND_CREATED | KIND_UPDATED => Ok(Self::CreateUpdate(serde_json::from_value(value)?)),
            KIND_DELETE => Ok(Self::Delete(serde_json::from_value(value)?)),
            _ => Ok(Self::Other(UnknownHbiEvent { kind, body: value })),
        }
    }

    /// Returns the raw discriminator.
    pub fn kind(&self) -> &str {
        match self {
            Self::CreateUpdate(e) => &e.event_type,
            Self::Delete(e) => &e.event_type,
            Self::Other(e) => &e.kind,
        }
    }

    /// Returns the organization the event belongs to, if it names one.
    ///
    /// Used as the partition key.
    pub fn org_id(&self) -> Option<&str> {
        match self {
            Self::CreateUpdate(e) => e.host.org_id.as_deref(),
            Self::Delete(e) => e.org_id.as_deref(),
            Self::Other(e) => e.body.get("org_id").and_then(Value::as_str),
        }
    }
}

/// An inbound event whose discriminator has no dedicated variant.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownHbiEvent {
    /// The raw `type` value.
    pub kind: String,
    /// The full message body.
    pub body: Value,
}

/// A `created` / `updated` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HbiHostCreateUpdateEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub host: HbiHost,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HbiEventMetadata>,
}

/// A `delete` event. Identifiers are carried at the top level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HbiHostDeleteEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    /// Inventory id of the deleted host.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub insights_id: Option<String>,
    #[serde(default)]
    pub subscription_manager_id: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_metadata: Option<Value>,
}

/// Producer metadata attached to create/update events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HbiEventMetadata {
    #[serde(default)]
    pub request_id: Option<String>,
}

/// The host record carried by create/update events.
///
/// This is also the shape persisted as a host's latest event data, so it
/// round-trips through JSON without loss of the fields the pipeline reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HbiHost {
    /// Inventory id.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub insights_id: Option<String>,
    #[serde(default)]
    pub subscription_manager_id: Option<String>,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub provider_type: Option<String>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stale_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reporter: Option<String>,
    #[serde(default)]
    pub facts: Vec<HbiHostFacts>,
    #[serde(default)]
    pub system_profile: Map<String, Value>,
}

/// One namespaced block of raw facts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HbiHostFacts {
    pub namespace: String,
    #[serde(default)]
    pub facts: Map<String, Value>,
}
