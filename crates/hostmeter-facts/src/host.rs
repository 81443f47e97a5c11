use chrono::{DateTime, Utc};
use hostmeter_types::HbiHost;

use crate::error::FactError;
use crate::namespace::{FactSet, SystemProfileFacts};

/// The per-event view of an inbound host.
///
/// Built fresh for every event and never persisted as-is; the raw host is
/// what gets stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Host {
    pub org_id: String,
    pub inventory_id: String,
    pub subscription_manager_id: Option<String>,
    pub insights_id: Option<String>,
    pub display_name: Option<String>,
    pub provider_id: Option<String>,
    pub updated: Option<DateTime<Utc>>,
    pub stale_timestamp: Option<DateTime<Utc>>,
    pub system_profile: SystemProfileFacts,
    pub facts: FactSet,
}

impl Host {
    /// Builds the view.
    ///
    /// # Errors
    ///
    /// Returns `FactError::MissingField` when the org id or inventory id is
    /// absent or blank.
    pub fn from_hbi(host: &HbiHost) -> Result<Self, FactError> {
        Ok(Self {
            org_id: required(&host.org_id, "org_id")?,
            inventory_id: required(&host.id, "id")?,
            subscription_manager_id: non_blank(&host.subscription_manager_id),
            insights_id: non_blank(&host.insights_id),
            display_name: non_blank(&host.display_name),
            provider_id: non_blank(&host.provider_id),
            updated: host.updated,
            stale_timestamp: host.stale_timestamp,
            system_profile: SystemProfileFacts::from_map(&host.system_profile),
            facts: FactSet::parse(&host.facts),
        })
    }

    /// The RHSM `BILLING_MODEL` fact.
    pub fn billing_model(&self) -> Option<&str> {
        self.facts.rhsm().and_then(|f| f.billing_model.as_deref())
    }

    /// The system-profile `host_type`.
    pub fn host_type(&self) -> Option<&str> {
        self.system_profile.host_type.as_deref()
    }
}

fn required(value: &Option<String>, field: &'static str) -> Result<String, FactError> {
    non_blank(value).ok_or(FactError::MissingField(field))
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
