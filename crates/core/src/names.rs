//! Deterministic resource names shared by the engine and the executors.

pub fn deployment_name(package_name: &str) -> String { format!("deploy-{}", package_name) }

pub fn service_name(package_name: &str) -> String { format!("svc-{}", package_name) }

pub fn config_map_name(package_name: &str) -> String { format!("cm-{}", package_name) }

/// Ingress name for an environment. Keyed by environment id for both create
/// and update so that a host change targets the same object.
pub fn ingress_name(environment_id: &str) -> String { format!("{}-ingress", environment_id) }

/// In-cluster upstream URL for a route target.
pub fn service_url(target_component: &str, target_port: i32) -> String {
    format!("http://{}:{}", service_name(target_component), target_port)
}
