//! Typed views over raw namespaced facts.
//!
//! Producers report facts loosely typed: booleans arrive as `true` or as
//! `"True"`, counts as numbers or numeric strings. The accessors here accept
//! both and treat anything else as absent.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hostmeter_types::HbiHostFacts;
use serde_json::{Map, Value};

/// Namespace of subscription-manager facts.
pub const RHSM: &str = "rhsm";
/// Namespace of Satellite facts.
pub const SATELLITE: &str = "satellite";
/// Namespace of discovery (qpc) facts.
pub const QPC: &str = "qpc";

/// Facts reported by subscription-manager.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RhsmFacts {
    pub is_virtual: Option<bool>,
    pub vm_host_uuid: Option<String>,
    pub sync_timestamp: Option<DateTime<Utc>>,
    pub sla: Option<String>,
    pub usage: Option<String>,
    pub role: Option<String>,
    pub units: Option<String>,
    pub billing_model: Option<String>,
    pub product_ids: Vec<String>,
}

impl RhsmFacts {
    fn from_map(facts: &Map<String, Value>) -> Self {
        Self {
            is_virtual: facts.get("IS_VIRTUAL").and_then(bool_value),
            vm_host_uuid: facts.get("VM_HOST_UUID").and_then(string_value),
            sync_timestamp: facts.get("SYNC_TIMESTAMP").and_then(timestamp_value),
            sla: facts.get("SYSPURPOSE_SLA").and_then(string_value),
            usage: facts.get("SYSPURPOSE_USAGE").and_then(string_value),
            role: facts.get("SYSPURPOSE_ROLE").and_then(string_value),
            units: facts.get("SYSPURPOSE_UNITS").and_then(string_value),
            billing_model: facts.get("BILLING_MODEL").and_then(string_value),
            product_ids: facts.get("RH_PROD").map(string_list).unwrap_or_default(),
        }
    }
}

/// Facts reported by Satellite.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SatelliteFacts {
    pub hypervisor_uuid: Option<String>,
    pub sla: Option<String>,
    pub usage: Option<String>,
    pub role: Option<String>,
}

impl SatelliteFacts {
    fn from_map(facts: &Map<String, Value>) -> Self {
        Self {
            hypervisor_uuid: facts.get("virtual_host_uuid").and_then(string_value),
            sla: facts.get("system_purpose_sla").and_then(string_value),
            usage: facts.get("system_purpose_usage").and_then(string_value),
            role: facts.get("system_purpose_role").and_then(string_value),
        }
    }
}

/// Facts reported by discovery scans.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QpcFacts {
    pub is_rhel: Option<bool>,
    pub products: Vec<String>,
}

impl QpcFacts {
    fn from_map(facts: &Map<String, Value>) -> Self {
        Self {
            is_rhel: facts.get("IS_RHEL").and_then(bool_value),
            products: facts
                .get("rh_products_installed")
                .map(string_list)
                .unwrap_or_default(),
        }
    }

    /// Whether the scan identified the host as RHEL.
    pub fn reports_rhel(&self) -> bool {
        self.is_rhel == Some(true) || self.products.iter().any(|p| p == "RHEL")
    }
}

/// One parsed namespace.
#[derive(Debug, Clone, PartialEq)]
pub enum NamespaceFacts {
    Rhsm(RhsmFacts),
    Satellite(SatelliteFacts),
    Qpc(QpcFacts),
    /// A namespace without a typed view. Kept as reported.
    Unparsed(Map<String, Value>),
}

/// Parsed fact blocks of one host, keyed by namespace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactSet {
    namespaces: BTreeMap<String, NamespaceFacts>,
}

impl FactSet {
    /// Parses every block. Repeated namespaces are merged, later keys winning.
    pub fn parse(blocks: &[HbiHostFacts]) -> Self {
        let mut merged: BTreeMap<&str, Map<String, Value>> = BTreeMap::new();
        for block in blocks {
            let entry = merged.entry(block.namespace.as_str()).or_default();
            for (key, value) in &block.facts {
                entry.insert(key.clone(), value.clone());
            }
        }

        let namespaces = merged
            .into_iter()
            .map(|(namespace, facts)| {
                let parsed = match namespace {
                    RHSM => NamespaceFacts::Rhsm(RhsmFacts::from_map(&facts)),
                    SATELLITE => NamespaceFacts::Satellite(SatelliteFacts::from_map(&facts)),
                    QPC => NamespaceFacts::Qpc(QpcFacts::from_map(&facts)),
                    other => {
                        tracing::trace!(namespace = other, "keeping unrecognized fact namespace raw");
                        NamespaceFacts::Unparsed(facts)
                    }
                };
                (namespace.to_string(), parsed)
            })
            .collect();

        Self { namespaces }
    }

    pub fn rhsm(&self) -> Option<&RhsmFacts> {
        match self.namespaces.get(RHSM) {
            Some(NamespaceFacts::Rhsm(f)) => Some(f),
            _ => None,
        }
    }

    pub fn satellite(&self) -> Option<&SatelliteFacts> {
        match self.namespaces.get(SATELLITE) {
            Some(NamespaceFacts::Satellite(f)) => Some(f),
            _ => None,
        }
    }

    pub fn qpc(&self) -> Option<&QpcFacts> {
        match self.namespaces.get(QPC) {
            Some(NamespaceFacts::Qpc(f)) => Some(f),
            _ => None,
        }
    }

    /// Raw facts of a namespace that has no typed view.
    pub fn unparsed(&self, namespace: &str) -> Option<&Map<String, Value>> {
        match self.namespaces.get(namespace) {
            Some(NamespaceFacts::Unparsed(f)) => Some(f),
            _ => None,
        }
    }

    pub fn get(&self, namespace: &str) -> Option<&NamespaceFacts> {
        self.namespaces.get(namespace)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.namespaces.keys().map(String::as_str)
    }
}

/// The host's system profile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemProfileFacts {
    pub host_type: Option<String>,
    pub infrastructure_type: Option<String>,
    pub virtual_host_uuid: Option<String>,
    pub cores_per_socket: Option<i64>,
    pub sockets: Option<i64>,
    pub cpus: Option<i64>,
    pub threads_per_core: Option<f64>,
    pub cloud_provider: Option<String>,
    pub arch: Option<String>,
    pub is_marketplace: Option<bool>,
    pub owner_id: Option<String>,
    pub third_party_migrated: Option<bool>,
    pub product_ids: Vec<String>,
}

impl SystemProfileFacts {
    pub fn from_map(profile: &Map<String, Value>) -> Self {
        let product_ids = profile
            .get("installed_products")
            .and_then(Value::as_array)
            .map(|products| {
                products
                    .iter()
                    .filter_map(|p| p.get("id").and_then(string_value))
                    .collect()
            })
            .unwrap_or_default();

        let third_party_migrated = profile
            .get("third_party_migrated")
            .or_else(|| profile.get("is_3rd_party_migrated"))
            .and_then(bool_value);

        Self {
            host_type: profile.get("host_type").and_then(string_value),
            infrastructure_type: profile.get("infrastructure_type").and_then(string_value),
            virtual_host_uuid: profile.get("virtual_host_uuid").and_then(string_value),
            cores_per_socket: profile.get("cores_per_socket").and_then(int_value),
            sockets: profile.get("number_of_sockets").and_then(int_value),
            cpus: profile.get("number_of_cpus").and_then(int_value),
            threads_per_core: profile.get("threads_per_core").and_then(float_value),
            cloud_provider: profile.get("cloud_provider").and_then(string_value),
            arch: profile.get("arch").and_then(string_value),
            is_marketplace: profile.get("is_marketplace").and_then(bool_value),
            owner_id: profile.get("owner_id").and_then(string_value),
            third_party_migrated,
            product_ids,
        }
    }
}

fn bool_value(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

fn int_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn float_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Non-blank strings only. Numbers are accepted and rendered.
fn string_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(string_value).collect(),
        other => string_value(other).into_iter().collect(),
    }
}

fn timestamp_value(value: &Value) -> Option<DateTime<Utc>> {
    let raw = value.as_str()?;
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(e) => {
            tracing::debug!(value = raw, error = %e, "ignoring unparseable fact timestamp");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn block(namespace: &str, facts: Value) -> HbiHostFacts {
        HbiHostFacts {
            namespace: namespace.to_string(),
            facts: facts.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn lenient_scalars() {
        assert_eq!(bool_value(&json!("TRUE")), Some(true));
        assert_eq!(bool_value(&json!("no")), None);
        assert_eq!(int_value(&json!(" 4 ")), Some(4));
        assert_eq!(int_value(&json!(2.5)), None);
        assert_eq!(float_value(&json!("1.5")), Some(1.5));
        assert_eq!(string_value(&json!("  ")), None);
        assert_eq!(string_value(&json!(69)), Some("69".to_string()));
        assert_eq!(string_list(&json!("69")), vec!["69".to_string()]);
    }

    #[test]
    fn repeated_namespace_blocks_merge() {
        let facts = FactSet::parse(&[
            block(RHSM, json!({"IS_VIRTUAL": false, "SYSPURPOSE_SLA": "Standard"})),
            block(RHSM, json!({"IS_VIRTUAL": "True"})),
        ]);
        let rhsm = facts.rhsm().expect("rhsm should be parsed");
        assert_eq!(rhsm.is_virtual, Some(true));
        assert_eq!(rhsm.sla.as_deref(), Some("Standard"));
    }

    #[test]
    fn unknown_namespace_is_kept_raw() {
        let facts = FactSet::parse(&[
            block("puptoo", json!({"bios_vendor": "SeaBIOS"})),
            block(QPC, json!({"rh_products_installed": ["RHEL", "EAP"]})),
        ]);
        assert_eq!(facts.namespaces().collect::<Vec<_>>(), vec!["puptoo", "qpc"]);
        assert_eq!(
            facts.unparsed("puptoo").and_then(|m| m.get("bios_vendor")),
            Some(&json!("SeaBIOS"))
        );
        assert!(facts.rhsm().is_none());
        assert!(facts.qpc().expect("qpc should be parsed").reports_rhel());
    }

    #[test]
    fn system_profile_reads_counts_and_products() {
        let profile = json!({
            "number_of_sockets": 3,
            "cores_per_socket": "4",
            "threads_per_core": 1,
            "installed_products": [{"id": "69"}, {"name": "no id"}, {"id": 479}],
            "is_3rd_party_migrated": true
        });
        let sp = SystemProfileFacts::from_map(profile.as_object().expect("object"));
        assert_eq!(sp.sockets, Some(3));
        assert_eq!(sp.cores_per_socket, Some(4));
        assert_eq!(sp.threads_per_core, Some(1.0));
        assert_eq!(sp.product_ids, vec!["69".to_string(), "479".to_string()]);
        assert_eq!(sp.third_party_migrated, Some(true));
    }
}
