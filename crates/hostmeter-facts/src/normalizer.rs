//! Derivation of normalized facts from a host view.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use hostmeter_types::{CloudProvider, HardwareType, Sla, Usage};

use crate::host::Host;
use crate::products::{ProductCatalog, Products};

/// `true` when a host is virtual and names a non-blank hypervisor.
///
/// A host that is not virtual is never a guest, whatever hypervisor uuid it
/// reports.
pub fn is_guest(is_virtual: bool, hypervisor_uuid: Option<&str>) -> bool {
    is_virtual && hypervisor_uuid.is_some_and(|uuid| !uuid.trim().is_empty())
}

/// Canonical facts about one host.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFacts {
    pub org_id: String,
    pub inventory_id: String,
    /// Provider id when the host has one, else the inventory id.
    pub instance_id: String,
    pub subscription_manager_id: Option<String>,
    pub insights_id: Option<String>,
    pub display_name: Option<String>,
    pub is_virtual: bool,
    pub hypervisor_uuid: Option<String>,
    pub cloud_provider: Option<CloudProvider>,
    pub hardware_type: HardwareType,
    pub sla: Option<Sla>,
    pub usage: Option<Usage>,
    pub product_ids: BTreeSet<String>,
    pub product_tags: BTreeSet<String>,
    pub is_marketplace: bool,
    pub conversion: bool,
    pub last_seen: Option<DateTime<Utc>>,
    /// RHSM facts were older than the sync threshold and left out.
    pub rhsm_ignored: bool,
}

impl NormalizedFacts {
    pub fn is_guest(&self) -> bool {
        is_guest(self.is_virtual, self.hypervisor_uuid.as_deref())
    }

    /// Whether any product tag names RHEL.
    pub fn has_rhel_tag(&self) -> bool {
        self.product_tags
            .iter()
            .any(|t| t.to_ascii_uppercase().starts_with("RHEL"))
    }
}

/// Turns a [`Host`] into [`NormalizedFacts`].
#[derive(Debug, Clone)]
pub struct FactNormalizer {
    host_last_sync_threshold: Duration,
    catalog: ProductCatalog,
}

impl FactNormalizer {
    pub fn new(host_last_sync_threshold: Duration, catalog: ProductCatalog) -> Self {
        Self {
            host_last_sync_threshold,
            catalog,
        }
    }

    /// Normalizes `host`. `start_of_today` anchors the RHSM sync threshold.
    pub fn normalize(&self, host: &Host, start_of_today: DateTime<Utc>) -> NormalizedFacts {
        let sp = &host.system_profile;
        let rhsm = host.facts.rhsm();
        let satellite = host.facts.satellite();

        let satellite_hypervisor = satellite.and_then(|s| s.hypervisor_uuid.clone());
        let is_virtual = rhsm.and_then(|r| r.is_virtual).unwrap_or(false)
            || satellite_hypervisor.is_some()
            || sp
                .infrastructure_type
                .as_deref()
                .is_some_and(|t| t.eq_ignore_ascii_case("virtual"));

        let hypervisor_uuid = satellite_hypervisor
            .or_else(|| sp.virtual_host_uuid.clone())
            .or_else(|| rhsm.and_then(|r| r.vm_host_uuid.clone()));

        let cloud_provider = sp.cloud_provider.as_deref().and_then(CloudProvider::from_fact);
        let hardware_type = if cloud_provider.is_some() {
            HardwareType::Cloud
        } else if is_virtual {
            HardwareType::Virtual
        } else {
            HardwareType::Physical
        };

        let rhsm_ignored = self.rhsm_out_of_sync(host, start_of_today);
        let trusted_rhsm = rhsm.filter(|_| !rhsm_ignored);

        let sla = trusted_rhsm
            .and_then(|r| r.sla.as_deref())
            .and_then(Sla::from_fact)
            .or_else(|| satellite.and_then(|s| s.sla.as_deref()).and_then(Sla::from_fact));
        let usage = trusted_rhsm
            .and_then(|r| r.usage.as_deref())
            .and_then(Usage::from_fact)
            .or_else(|| satellite.and_then(|s| s.usage.as_deref()).and_then(Usage::from_fact));

        let products = Products::derive(
            &self.catalog,
            sp,
            rhsm,
            satellite,
            host.facts.qpc(),
            rhsm_ignored,
        );

        NormalizedFacts {
            org_id: host.org_id.clone(),
            inventory_id: host.inventory_id.clone(),
            instance_id: host
                .provider_id
                .clone()
                .unwrap_or_else(|| host.inventory_id.clone()),
            subscription_manager_id: host.subscription_manager_id.clone(),
            insights_id: host.insights_id.clone(),
            display_name: host.display_name.clone(),
            is_virtual,
            hypervisor_uuid,
            cloud_provider,
            hardware_type,
            sla,
            usage,
            product_ids: products.ids,
            product_tags: products.tags,
            is_marketplace: sp.is_marketplace.unwrap_or(false),
            conversion: sp.third_party_migrated.unwrap_or(false),
            last_seen: host.updated,
            rhsm_ignored,
        }
    }

    fn rhsm_out_of_sync(&self, host: &Host, start_of_today: DateTime<Utc>) -> bool {
        let Some(synced) = host.facts.rhsm().and_then(|r| r.sync_timestamp) else {
            return false;
        };
        let cutoff = start_of_today - self.host_last_sync_threshold;
        if synced < cutoff {
            tracing::info!(
                org_id = %host.org_id,
                inventory_id = %host.inventory_id,
                sync_timestamp = %synced,
                "ignoring rhsm facts older than the last sync threshold"
            );
            return true;
        }
        false
    }
}
