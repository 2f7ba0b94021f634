//! Engine-private bookkeeping: what the engine last believes it deployed.

use graphop_core::{ComponentSpec, DesiredGraphSpec, GraphStatus};
use rustc_hash::FxHashMap;

use crate::status;

/// Per-component bookkeeping keyed by package name.
pub type ComponentRecords = FxHashMap<String, ComponentRecord>;

/// One component as last reconciled. The `*_ok` flags record intended
/// convergence: they are set the moment the component enters the record,
/// whether or not the executor confirmed anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentRecord {
    pub spec: ComponentSpec,
    pub deployment_ok: bool,
    pub service_ok: bool,
    pub config_map_ok: bool,
}

impl ComponentRecord {
    pub fn converged(spec: ComponentSpec) -> Self {
        Self { spec, deployment_ok: true, service_ok: true, config_map_ok: true }
    }
}

/// Everything the engine keeps for one environment. Replaced wholesale on
/// every reconciliation, never merged.
#[derive(Debug, Clone)]
pub struct EnvironmentRecord {
    pub last_spec: DesiredGraphSpec,
    pub last_status: GraphStatus,
    pub components: ComponentRecords,
}

impl EnvironmentRecord {
    /// Build the record that mirrors `spec` exactly, with its projected status.
    pub fn converged(spec: DesiredGraphSpec) -> Self {
        let components: ComponentRecords = spec
            .components
            .iter()
            .map(|c| (c.package_name.clone(), ComponentRecord::converged(c.clone())))
            .collect();
        let last_status = status::project(&spec, &components);
        Self { last_spec: spec, last_status, components }
    }
}
