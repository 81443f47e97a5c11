//! Suppression of events that must not produce billing signals.

use chrono::{DateTime, Duration, Utc};

use crate::host::Host;

const MARKETPLACE_BILLING_MODEL: &str = "marketplace";
const EDGE_HOST_TYPE: &str = "edge";

/// Why an event was suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// Billed through a cloud marketplace instead.
    MarketplaceBilling,
    /// Edge hosts are not metered.
    EdgeHost,
    /// The host is past its stale timestamp plus the culling offset.
    Stale,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MarketplaceBilling => "marketplace_billing",
            Self::EdgeHost => "edge_host",
            Self::Stale => "stale",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides whether a create/update event is suppressed.
#[derive(Debug, Clone, Copy)]
pub struct EventFilter {
    culling_offset: Duration,
}

impl EventFilter {
    pub fn new(culling_offset: Duration) -> Self {
        Self { culling_offset }
    }

    /// `true` when any suppression rule matches. Every matching rule is
    /// logged.
    pub fn should_skip(&self, host: &Host, stale_timestamp: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let reasons = self.skip_reasons(host, stale_timestamp, now);
        for reason in &reasons {
            tracing::info!(
                org_id = %host.org_id,
                inventory_id = %host.inventory_id,
                reason = reason.as_str(),
                "filtering host event"
            );
        }
        !reasons.is_empty()
    }

    /// Every rule that matches, in evaluation order.
    pub fn skip_reasons(
        &self,
        host: &Host,
        stale_timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Vec<SkipReason> {
        let mut reasons = Vec::new();
        if is_marketplace_billing(host) {
            reasons.push(SkipReason::MarketplaceBilling);
        }
        if is_edge_host(host) {
            reasons.push(SkipReason::EdgeHost);
        }
        if self.is_stale(stale_timestamp, now) {
            reasons.push(SkipReason::Stale);
        }
        reasons
    }

    /// A host is stale from the instant `stale_timestamp + culling_offset`
    /// onward; the boundary instant itself counts as stale.
    pub fn is_stale(&self, stale_timestamp: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now >= stale_timestamp + self.culling_offset
    }
}

/// RHSM billing model is `marketplace`, ignoring case.
pub fn is_marketplace_billing(host: &Host) -> bool {
    host.billing_model()
        .is_some_and(|m| m.eq_ignore_ascii_case(MARKETPLACE_BILLING_MODEL))
}

/// System-profile host type is `edge`, ignoring case.
pub fn is_edge_host(host: &Host) -> bool {
    host.host_type()
        .is_some_and(|t| t.eq_ignore_ascii_case(EDGE_HOST_TYPE))
}
