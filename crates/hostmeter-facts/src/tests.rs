use chrono::{DateTime, Duration, TimeZone, Utc};
use hostmeter_types::{CloudProvider, HardwareType, HbiHost, Sla, Usage};
use serde_json::{json, Value};

use super::*;

fn ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .expect("valid timestamp")
        .with_timezone(&Utc)
}

fn today() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 10, 0, 0, 0).single().expect("valid date")
}

fn hbi(value: Value) -> HbiHost {
    serde_json::from_value(value).expect("should decode host")
}

fn host(value: Value) -> Host {
    Host::from_hbi(&hbi(value)).expect("should build host view")
}

fn base(extra: Value) -> Value {
    let mut v = json!({
        "id": "inv-1",
        "org_id": "org1",
        "subscription_manager_id": "sm-1",
        "display_name": "host1",
        "updated": "2024-06-09T12:00:00Z",
        "stale_timestamp": "2024-06-11T12:00:00Z",
        "facts": [],
        "system_profile": {}
    });
    if let (Some(target), Some(extra)) = (v.as_object_mut(), extra.as_object()) {
        for (k, val) in extra {
            target.insert(k.clone(), val.clone());
        }
    }
    v
}

fn normalizer() -> FactNormalizer {
    FactNormalizer::new(Duration::hours(24), ProductCatalog::default())
}

fn normalize(value: Value) -> (Host, NormalizedFacts) {
    let h = host(base(value));
    let facts = normalizer().normalize(&h, today());
    (h, facts)
}

// ── host view ──

#[test]
fn host_view_requires_org_and_inventory_id() {
    let err = Host::from_hbi(&hbi(json!({"id": "inv-1"}))).expect_err("org id is required");
    assert_eq!(err, FactError::MissingField("org_id"));

    let err = Host::from_hbi(&hbi(json!({"org_id": "org1", "id": "  "})))
        .expect_err("blank inventory id is rejected");
    assert_eq!(err, FactError::MissingField("id"));
}

// ── guest classification ──

#[test]
fn non_virtual_host_is_never_a_guest() {
    for uuid in [None, Some(""), Some("hyp-1")] {
        assert!(!is_guest(false, uuid), "uuid {uuid:?}");
    }
}

#[test]
fn virtual_host_is_guest_only_with_hypervisor_uuid() {
    assert!(is_guest(true, Some("hyp-1")));
    assert!(!is_guest(true, None));
    assert!(!is_guest(true, Some("")));
    assert!(!is_guest(true, Some("   ")));
}

#[test]
fn guest_from_system_profile() {
    let (_, facts) = normalize(json!({
        "system_profile": {"infrastructure_type": "VIRTUAL", "virtual_host_uuid": "hyp-1"}
    }));
    assert!(facts.is_virtual);
    assert_eq!(facts.hypervisor_uuid.as_deref(), Some("hyp-1"));
    assert!(facts.is_guest());
    assert_eq!(facts.hardware_type, HardwareType::Virtual);
}

#[test]
fn satellite_hypervisor_wins_and_implies_virtual() {
    let (_, facts) = normalize(json!({
        "facts": [{"namespace": "satellite", "facts": {"virtual_host_uuid": "sat-hyp"}}],
        "system_profile": {"virtual_host_uuid": "sp-hyp"}
    }));
    assert!(facts.is_virtual);
    assert_eq!(facts.hypervisor_uuid.as_deref(), Some("sat-hyp"));
}

#[test]
fn hypervisor_uuid_on_physical_host_is_not_a_guest() {
    let (_, facts) = normalize(json!({
        "system_profile": {"infrastructure_type": "physical", "virtual_host_uuid": "hyp-1"}
    }));
    assert!(!facts.is_virtual);
    assert!(!facts.is_guest());
    assert_eq!(facts.hardware_type, HardwareType::Physical);
}

// ── normalization ──

#[test]
fn instance_id_prefers_provider_id() {
    let (_, facts) = normalize(json!({"provider_id": "i-0abc"}));
    assert_eq!(facts.instance_id, "i-0abc");

    let (_, facts) = normalize(json!({}));
    assert_eq!(facts.instance_id, "inv-1");
}

#[test]
fn cloud_provider_sets_cloud_hardware() {
    let (_, facts) = normalize(json!({
        "system_profile": {"cloud_provider": "aws", "infrastructure_type": "virtual"}
    }));
    assert_eq!(facts.cloud_provider, Some(CloudProvider::Aws));
    assert_eq!(facts.hardware_type, HardwareType::Cloud);

    let (_, facts) = normalize(json!({"system_profile": {"cloud_provider": "openstack"}}));
    assert_eq!(facts.cloud_provider, None);
    assert_eq!(facts.hardware_type, HardwareType::Physical);
}

#[test]
fn system_purpose_prefers_rhsm_then_satellite() {
    let (_, facts) = normalize(json!({
        "facts": [
            {"namespace": "rhsm", "facts": {"SYSPURPOSE_SLA": "Premium", "SYSPURPOSE_USAGE": "bogus", "SYNC_TIMESTAMP": "2024-06-09T23:00:00Z"}},
            {"namespace": "satellite", "facts": {"system_purpose_sla": "Standard", "system_purpose_usage": "Production"}}
        ]
    }));
    assert_eq!(facts.sla, Some(Sla::Premium));
    assert_eq!(facts.usage, Some(Usage::Production));
    assert!(!facts.rhsm_ignored);
}

#[test]
fn stale_rhsm_facts_are_ignored() {
    let (_, facts) = normalize(json!({
        "facts": [
            {"namespace": "rhsm", "facts": {"SYSPURPOSE_SLA": "Premium", "RH_PROD": ["69"], "SYNC_TIMESTAMP": "2024-06-08T23:59:59Z"}},
            {"namespace": "satellite", "facts": {"system_purpose_sla": "Standard"}}
        ]
    }));
    assert!(facts.rhsm_ignored);
    assert_eq!(facts.sla, Some(Sla::Standard));
    assert!(facts.product_ids.is_empty());
}

#[test]
fn unknown_system_purpose_values_become_absent() {
    let (_, facts) = normalize(json!({
        "facts": [{"namespace": "satellite", "facts": {"system_purpose_sla": "Gold"}}]
    }));
    assert_eq!(facts.sla, None);
    assert_eq!(facts.usage, None);
}

#[test]
fn products_from_all_sources() {
    let (_, facts) = normalize(json!({
        "facts": [{"namespace": "rhsm", "facts": {"RH_PROD": ["419"], "SYNC_TIMESTAMP": "2024-06-09T00:00:00Z"}}],
        "system_profile": {"installed_products": [{"id": "69"}]}
    }));
    assert_eq!(
        facts.product_ids.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["419", "69"]
    );
    assert!(facts.product_tags.contains("RHEL for x86"));
    assert!(facts.product_tags.contains("RHEL for ARM"));
}

#[test]
fn qpc_rhel_adds_arch_and_ungrouped_tags() {
    let (_, facts) = normalize(json!({
        "facts": [{"namespace": "qpc", "facts": {"IS_RHEL": "true"}}],
        "system_profile": {"arch": "aarch64"}
    }));
    let tags: Vec<_> = facts.product_tags.iter().map(String::as_str).collect();
    assert_eq!(tags, vec!["RHEL", "RHEL Ungrouped", "RHEL for ARM"]);
}

#[test]
fn qpc_installed_products_are_not_product_ids() {
    let (_, facts) = normalize(json!({
        "facts": [{"namespace": "qpc", "facts": {"IS_RHEL": "true", "rh_products_installed": ["RHEL", "EAP"]}}],
        "system_profile": {"installed_products": [{"id": "69"}]}
    }));
    assert_eq!(
        facts.product_ids.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["69"]
    );
    assert!(facts.product_tags.contains("RHEL"));
}

#[test]
fn last_seen_and_conversion() {
    let (_, facts) = normalize(json!({"system_profile": {"is_3rd_party_migrated": true}}));
    assert_eq!(facts.last_seen, Some(ts("2024-06-09T12:00:00Z")));
    assert!(facts.conversion);
}

// ── measurements ──

fn measure(value: Value, role: HostRole) -> Measurements {
    let (h, facts) = normalize(value);
    MeasurementNormalizer::default().measure(&h, &facts, role)
}

#[test]
fn physical_host_rounds_odd_sockets_up() {
    let m = measure(
        json!({"system_profile": {"number_of_sockets": 3, "cores_per_socket": 4}}),
        HostRole::default(),
    );
    assert_eq!(m.cores, Some(12.0));
    assert_eq!(m.sockets, Some(4.0));
}

#[test]
fn virtual_x86_guest_halves_cores() {
    let m = measure(
        json!({"system_profile": {
            "arch": "x86_64", "infrastructure_type": "virtual", "virtual_host_uuid": "hyp",
            "number_of_sockets": 3, "cores_per_socket": 3
        }}),
        HostRole::default(),
    );
    assert_eq!(m.cores, Some(5.0));
    assert_eq!(m.sockets, Some(3.0), "mapped guests keep odd socket counts");
}

#[test]
fn openshift_uses_reported_threads_per_core() {
    let m = measure(
        json!({"system_profile": {
            "arch": "x86_64", "infrastructure_type": "virtual",
            "number_of_sockets": 2, "cores_per_socket": 4, "threads_per_core": 1,
            "installed_products": [{"id": "290"}]
        }}),
        HostRole::default(),
    );
    assert_eq!(m.cores, Some(8.0));
}

#[test]
fn hypervisor_rounds_sockets_even_when_virtual() {
    let m = measure(
        json!({"system_profile": {"infrastructure_type": "virtual", "number_of_sockets": 1, "cores_per_socket": 2}}),
        HostRole { is_hypervisor: true, is_unmapped_guest: false },
    );
    assert_eq!(m.sockets, Some(2.0));
}

#[test]
fn cloud_guest_counts_one_socket() {
    let m = measure(
        json!({"system_profile": {"infrastructure_type": "virtual", "cloud_provider": "azure", "number_of_sockets": 4}}),
        HostRole::default(),
    );
    assert_eq!(m.sockets, Some(1.0));
}

#[test]
fn unmapped_rhel_guest_counts_one_socket() {
    let value = json!({"system_profile": {
        "infrastructure_type": "virtual", "virtual_host_uuid": "hyp",
        "number_of_sockets": 4, "installed_products": [{"id": "69"}]
    }});
    let unmapped = measure(value.clone(), HostRole { is_hypervisor: false, is_unmapped_guest: true });
    assert_eq!(unmapped.sockets, Some(1.0));

    let mapped = measure(value, HostRole::default());
    assert_eq!(mapped.sockets, Some(4.0));
}

#[test]
fn marketplace_profile_zeroes_everything() {
    let m = measure(
        json!({"system_profile": {"is_marketplace": true, "number_of_sockets": 2, "cores_per_socket": 8}}),
        HostRole::default(),
    );
    assert_eq!(m.cores, Some(0.0));
    assert_eq!(m.sockets, Some(0.0));
}

#[test]
fn zero_sockets_are_absent() {
    let m = measure(json!({"system_profile": {"number_of_sockets": 0}}), HostRole::default());
    assert_eq!(m, Measurements::default());
    assert!(m.to_vec().is_empty());
}

#[test]
fn syspurpose_units_drop_the_other_metric() {
    let sockets_only = measure(
        json!({
            "facts": [{"namespace": "rhsm", "facts": {"SYSPURPOSE_UNITS": "Sockets"}}],
            "system_profile": {"number_of_sockets": 2, "cores_per_socket": 4}
        }),
        HostRole::default(),
    );
    assert_eq!(sockets_only.cores, None);
    assert_eq!(sockets_only.sockets, Some(2.0));

    let cores_only = measure(
        json!({
            "facts": [{"namespace": "rhsm", "facts": {"SYSPURPOSE_UNITS": "Cores/vCPU"}}],
            "system_profile": {"number_of_sockets": 2, "cores_per_socket": 4}
        }),
        HostRole::default(),
    );
    assert_eq!(cores_only.cores, Some(8.0));
    assert_eq!(cores_only.sockets, None);
    assert_eq!(cores_only.to_vec().len(), 1);
}

// ── event filter ──

fn filter() -> EventFilter {
    EventFilter::new(Duration::days(7))
}

fn filter_host(billing_model: Option<&str>, host_type: Option<&str>) -> Host {
    let mut value = base(json!({}));
    if let Some(model) = billing_model {
        value["facts"] = json!([{"namespace": "rhsm", "facts": {"BILLING_MODEL": model}}]);
    }
    if let Some(host_type) = host_type {
        value["system_profile"] = json!({"host_type": host_type});
    }
    host(value)
}

#[test]
fn marketplace_billing_is_skipped_in_any_case() {
    let now = ts("2024-06-10T00:00:00Z");
    let fresh = ts("2024-06-11T00:00:00Z");
    for model in ["marketplace", "MARKETPLACE", "MarketPlace"] {
        let h = filter_host(Some(model), None);
        assert!(filter().should_skip(&h, fresh, now), "{model}");
        assert_eq!(filter().skip_reasons(&h, fresh, now), vec![SkipReason::MarketplaceBilling]);
    }
    assert!(!filter().should_skip(&filter_host(Some("annual"), None), fresh, now));
}

#[test]
fn edge_hosts_are_skipped_in_any_case() {
    let now = ts("2024-06-10T00:00:00Z");
    let fresh = ts("2024-06-11T00:00:00Z");
    for host_type in ["edge", "EDGE", "Edge"] {
        let h = filter_host(None, Some(host_type));
        assert_eq!(filter().skip_reasons(&h, fresh, now), vec![SkipReason::EdgeHost]);
    }
}

#[test]
fn blank_or_missing_values_are_not_filtered() {
    let now = ts("2024-06-10T00:00:00Z");
    let fresh = ts("2024-06-11T00:00:00Z");
    assert!(!filter().should_skip(&filter_host(None, None), fresh, now));
    assert!(!filter().should_skip(&filter_host(Some(""), Some("")), fresh, now));
}

#[test]
fn staleness_boundary_counts_as_stale() {
    let stale_timestamp = ts("2024-06-01T00:00:00Z");
    let deadline = stale_timestamp + Duration::days(7);
    let f = filter();

    assert!(!f.is_stale(stale_timestamp, deadline - Duration::seconds(1)));
    assert!(f.is_stale(stale_timestamp, deadline));
    assert!(f.is_stale(stale_timestamp, deadline + Duration::seconds(1)));
}

#[test]
fn every_matching_reason_is_reported() {
    let h = filter_host(Some("marketplace"), Some("edge"));
    let reasons = filter().skip_reasons(&h, ts("2024-01-01T00:00:00Z"), ts("2024-06-10T00:00:00Z"));
    assert_eq!(
        reasons,
        vec![SkipReason::MarketplaceBilling, SkipReason::EdgeHost, SkipReason::Stale]
    );
    assert_eq!(SkipReason::Stale.to_string(), "stale");
}
