//! `cores` and `sockets` measurements.

use hostmeter_types::{Measurement, MetricId};

use crate::host::Host;
use crate::normalizer::NormalizedFacts;

const OPENSHIFT_TAG: &str = "OpenShift Container Platform";
const THREADS_PER_CORE_DEFAULT: f64 = 2.0;

/// A host's place in the hypervisor/guest graph, as known to storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostRole {
    /// At least one guest maps to this host.
    pub is_hypervisor: bool,
    /// This host is a guest whose hypervisor has not reported itself yet.
    pub is_unmapped_guest: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Measurements {
    pub cores: Option<f64>,
    pub sockets: Option<f64>,
}

impl Measurements {
    /// Present values in a stable order.
    pub fn to_vec(self) -> Vec<Measurement> {
        let mut out = Vec::with_capacity(2);
        if let Some(value) = self.cores {
            out.push(Measurement {
                metric_id: MetricId::Cores,
                value,
            });
        }
        if let Some(value) = self.sockets {
            out.push(Measurement {
                metric_id: MetricId::Sockets,
                value,
            });
        }
        out
    }
}

/// Derives measurements from the system profile and normalized facts.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeasurementNormalizer {
    /// Use reported threads-per-core for every product, not just OpenShift.
    pub use_cpu_system_facts_for_all_products: bool,
}

impl MeasurementNormalizer {
    pub fn new(use_cpu_system_facts_for_all_products: bool) -> Self {
        Self {
            use_cpu_system_facts_for_all_products,
        }
    }

    pub fn measure(&self, host: &Host, facts: &NormalizedFacts, role: HostRole) -> Measurements {
        let sp = &host.system_profile;
        let marketplace = facts.is_marketplace;
        let raw_sockets = sp.sockets.filter(|s| *s != 0);

        let mut cores = if marketplace { Some(0) } else { self.cores(host, facts) };
        let mut sockets = if marketplace {
            Some(0)
        } else {
            adjust_sockets(raw_sockets, facts, role)
        };

        cores = cores.or(sp.cores_per_socket.filter(|c| *c != 0));
        sockets = sockets.or(raw_sockets);

        if let Some(units) = host.facts.rhsm().and_then(|r| r.units.as_deref()) {
            match units {
                "Sockets" => {
                    cores = None;
                    sockets = sockets.or(sp.sockets);
                }
                "Cores/vCPU" => {
                    sockets = None;
                    cores = cores.or(sp.cores_per_socket);
                }
                other => tracing::warn!(
                    org_id = %facts.org_id,
                    subscription_manager_id = facts.subscription_manager_id.as_deref().unwrap_or(""),
                    units = other,
                    "unsupported syspurpose units value"
                ),
            }
        }

        Measurements {
            cores: cores.map(|c| c as f64),
            sockets: sockets.map(|s| s as f64),
        }
    }

    fn cores(&self, host: &Host, facts: &NormalizedFacts) -> Option<i64> {
        let sp = &host.system_profile;
        let (sockets, per_socket) = (positive(sp.sockets), positive(sp.cores_per_socket));
        let physical_cores = sockets.zip(per_socket).map(|(s, c)| s * c);

        let virtual_x86 = sp.arch.as_deref() == Some("x86_64")
            && sp
                .infrastructure_type
                .as_deref()
                .is_some_and(|t| t.eq_ignore_ascii_case("virtual"));
        if !virtual_x86 {
            return physical_cores;
        }

        let cpus = physical_cores?;
        let mut threads_per_core = THREADS_PER_CORE_DEFAULT;
        if self.use_cpu_system_facts_for_all_products || facts.product_tags.contains(OPENSHIFT_TAG) {
            if let Some(reported) = sp.threads_per_core.filter(|t| *t > 0.0) {
                threads_per_core = reported;
            } else if let Some(logical) = positive(sp.cpus) {
                threads_per_core = logical as f64 / cpus as f64;
            }
            if threads_per_core != THREADS_PER_CORE_DEFAULT {
                tracing::warn!(
                    inventory_id = %facts.inventory_id,
                    threads_per_core,
                    "using reported threads per core to calculate vCPUs"
                );
            }
        }
        Some((cpus as f64 / threads_per_core).ceil() as i64)
    }
}

/// Odd socket counts round up for physical hosts and hypervisors. Virtual
/// guests on a cloud, and unmapped RHEL guests, count a single socket.
fn adjust_sockets(sockets: Option<i64>, facts: &NormalizedFacts, role: HostRole) -> Option<i64> {
    if role.is_hypervisor || !facts.is_virtual {
        return sockets.map(|s| if s % 2 == 1 { s + 1 } else { s });
    }
    if facts.cloud_provider.is_some() {
        return Some(1);
    }
    if role.is_unmapped_guest && facts.has_rhel_tag() {
        return Some(1);
    }
    sockets
}

fn positive(value: Option<i64>) -> Option<i64> {
    value.filter(|v| *v > 0)
}
