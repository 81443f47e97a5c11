//! Product ids and tags.
//!
//! Engineering product ids and system-purpose roles are mapped to billing
//! tags through a [`ProductCatalog`]. The catalog is data, loaded from
//! configuration, with a small built-in default.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

use crate::namespace::{QpcFacts, RhsmFacts, SatelliteFacts, SystemProfileFacts};

const RHEL: &str = "RHEL";
const RHEL_UNGROUPED: &str = "RHEL Ungrouped";

/// Engineering-id and role lookup tables.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProductCatalog {
    /// Engineering product id to tags.
    #[serde(default)]
    pub engineering_ids: BTreeMap<String, Vec<String>>,
    /// System-purpose role to tags.
    #[serde(default)]
    pub roles: BTreeMap<String, Vec<String>>,
}

impl Default for ProductCatalog {
    fn default() -> Self {
        let eng = [
            ("69", "RHEL for x86"),
            ("479", "RHEL for x86"),
            ("419", "RHEL for ARM"),
            ("279", "RHEL for IBM Power"),
            ("72", "RHEL for IBM z"),
            ("290", "OpenShift Container Platform"),
        ];
        let roles = [
            ("Red Hat Enterprise Linux Server", "RHEL for x86"),
            ("Red Hat Enterprise Linux Workstation", "RHEL for x86"),
            ("Red Hat Enterprise Linux Compute Node", "RHEL for x86"),
        ];
        Self {
            engineering_ids: eng
                .iter()
                .map(|(id, tag)| (id.to_string(), vec![tag.to_string()]))
                .collect(),
            roles: roles
                .iter()
                .map(|(role, tag)| (role.to_string(), vec![tag.to_string()]))
                .collect(),
        }
    }
}

impl ProductCatalog {
    fn tags_for_ids<'a>(&'a self, ids: &'a [String]) -> impl Iterator<Item = &'a String> + 'a {
        ids.iter()
            .filter_map(|id| self.engineering_ids.get(id))
            .flatten()
    }

    fn tags_for_role(&self, role: Option<&str>) -> impl Iterator<Item = &String> + '_ {
        role.and_then(|r| self.roles.get(r)).into_iter().flatten()
    }
}

/// Product ids and tags derived for one host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Products {
    pub ids: BTreeSet<String>,
    pub tags: BTreeSet<String>,
}

impl Products {
    /// Collects products from every source. RHSM facts are left out when
    /// `skip_rhsm` is set.
    pub fn derive(
        catalog: &ProductCatalog,
        system_profile: &SystemProfileFacts,
        rhsm: Option<&RhsmFacts>,
        satellite: Option<&SatelliteFacts>,
        qpc: Option<&QpcFacts>,
        skip_rhsm: bool,
    ) -> Self {
        let mut products = Self::default();

        products.ids.extend(system_profile.product_ids.iter().cloned());
        products
            .tags
            .extend(catalog.tags_for_ids(&system_profile.product_ids).cloned());

        products.tags.extend(
            catalog
                .tags_for_role(satellite.and_then(|s| s.role.as_deref()))
                .cloned(),
        );

        if let Some(rhsm) = rhsm.filter(|_| !skip_rhsm) {
            products.ids.extend(rhsm.product_ids.iter().cloned());
            products
                .tags
                .extend(catalog.tags_for_ids(&rhsm.product_ids).cloned());
            products
                .tags
                .extend(catalog.tags_for_role(rhsm.role.as_deref()).cloned());
        }

        if qpc.is_some_and(QpcFacts::reports_rhel) {
            if system_profile.product_ids.is_empty() {
                if let Some(tag) = system_profile.arch.as_deref().and_then(arch_tag) {
                    products.tags.insert(tag.to_string());
                }
            }
            products.tags.insert(RHEL.to_string());
        }

        let variants = products.tags.iter().filter(|t| is_rhel_variant(t)).count();
        if (variants == 0 && products.tags.contains(RHEL)) || variants > 1 {
            products.tags.insert(RHEL_UNGROUPED.to_string());
        }

        products
    }
}

fn arch_tag(arch: &str) -> Option<&'static str> {
    match arch {
        "x86_64" | "i686" | "i386" => Some("RHEL for x86"),
        "aarch64" => Some("RHEL for ARM"),
        "ppc64le" => Some("RHEL for IBM Power"),
        _ => None,
    }
}

/// `RHEL <variant>` tags other than the architecture tags (`RHEL for ...`).
fn is_rhel_variant(tag: &str) -> bool {
    tag.starts_with("RHEL ") && !tag.starts_with("RHEL for ") && tag != RHEL_UNGROUPED
}
