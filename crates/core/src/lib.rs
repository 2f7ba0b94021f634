//! Graphop core types: the desired state of one API graph environment,
//! the convergence actions derived from it, and the reported status.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod names;

pub mod prelude {
    pub use super::{
        Action, ActionType, ComponentRuntime, ComponentSpec, ComponentStatus, DesiredGraphSpec, GraphStatus,
        IngressRoute, IngressSpec, PackageKind, Phase, ResourceKind, ResourceRequirements, TlsConfig,
    };
}

/// Classifies what a package provides to the platform. Not used in diffing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PackageKind {
    #[default]
    Unspecified,
    #[serde(rename = "GRAPHQL_SUBGRAPH")]
    GraphQlSubgraph,
    #[serde(rename = "OPENAPI_SERVICE")]
    OpenApiService,
    #[serde(rename = "GRAPHQL_OPERATIONS")]
    GraphQlOperations,
    PostmanCollection,
    #[serde(rename = "GRAPHQL_SUPERGRAPH")]
    GraphQlSupergraph,
    WorkflowEngine,
    Ingress,
    Egress,
}

/// Lifecycle phase of a graph or one of its components.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum Phase {
    #[default]
    Pending,
    Deploying,
    Running,
    /// Reserved for external health feedback; the projector never emits it.
    Degraded,
    /// Reserved for external health feedback; the projector never emits it.
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Pending => "Pending",
            Phase::Deploying => "Deploying",
            Phase::Running => "Running",
            Phase::Degraded => "Degraded",
            Phase::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Target state for one environment. `environment_id` is the reconciliation key;
/// `build_id` only shows up in status messages and annotations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DesiredGraphSpec {
    pub environment_id: String,
    pub build_id: String,
    #[serde(default)]
    pub root_package: String,
    #[serde(default)]
    pub components: Vec<ComponentSpec>,
    #[serde(default)]
    pub ingress: IngressSpec,
}

impl DesiredGraphSpec {
    pub fn component(&self, package_name: &str) -> Option<&ComponentSpec> {
        self.components.iter().find(|c| c.package_name == package_name)
    }
}

/// One deployable package. `package_name` must be unique within a spec.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    pub package_name: String,
    #[serde(default)]
    pub package_version: String,
    #[serde(default)]
    pub kind: PackageKind,
    #[serde(default)]
    pub artifact_hash: String,
    #[serde(default)]
    pub runtime: ComponentRuntime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ComponentRuntime {
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub resources: ResourceRequirements,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Container image; executors pick a placeholder when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// CPU/memory requests and limits as opaque quantity strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_limit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<String>,
}

/// Routing configuration. An empty `host` means no ingress is desired.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct IngressSpec {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub routes: Vec<IngressRoute>,
    #[serde(default)]
    pub tls: TlsConfig,
}

impl IngressSpec {
    pub fn is_enabled(&self) -> bool { !self.host.is_empty() }

    pub fn wants_tls(&self) -> bool { self.tls.auto_cert || !self.tls.secret_name.is_empty() }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub struct IngressRoute {
    pub path: String,
    pub target_component: String,
    pub target_port: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    #[serde(default)]
    pub secret_name: String,
    #[serde(default)]
    pub auto_cert: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ActionType {
    Create,
    Update,
    Delete,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionType::Create => "Create",
            ActionType::Update => "Update",
            ActionType::Delete => "Delete",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Deployment,
    Service,
    ConfigMap,
    Ingress,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Deployment => "Deployment",
            ResourceKind::Service => "Service",
            ResourceKind::ConfigMap => "ConfigMap",
            ResourceKind::Ingress => "Ingress",
        };
        f.write_str(s)
    }
}

/// One unit of convergence work against one named resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub resource_kind: ResourceKind,
    pub resource_name: String,
    /// Free-text rationale; never interpreted.
    pub details: String,
}

impl Action {
    pub fn new(action_type: ActionType, resource_kind: ResourceKind, resource_name: impl Into<String>, details: impl Into<String>) -> Self {
        Self { action_type, resource_kind, resource_name: resource_name.into(), details: details.into() }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.action_type, self.resource_kind, self.resource_name)
    }
}

/// Reportable projection of an environment after reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GraphStatus {
    pub phase: Phase,
    pub component_statuses: Vec<ComponentStatus>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub preview_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub last_reconciled: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    pub package_name: String,
    pub phase: Phase,
    pub ready_replicas: i32,
    pub desired_replicas: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_reads_camel_case_and_defaults() {
        let v = serde_json::json!({
            "environmentId": "env-1",
            "buildId": "build-1",
            "components": [{
                "packageName": "users-api",
                "kind": "GRAPHQL_SUBGRAPH",
                "artifactHash": "abc123",
                "runtime": { "replicas": 2, "env": { "LOG_LEVEL": "info" }, "resources": { "cpuRequest": "100m" } }
            }],
            "ingress": { "host": "api.example.com", "routes": [{ "path": "/graphql", "targetComponent": "users-api", "targetPort": 4000 }], "tls": { "autoCert": true } }
        });
        let spec: DesiredGraphSpec = serde_json::from_value(v).unwrap();
        assert_eq!(spec.environment_id, "env-1");
        assert_eq!(spec.root_package, "");
        let c = spec.component("users-api").unwrap();
        assert_eq!(c.kind, PackageKind::GraphQlSubgraph);
        assert_eq!(c.runtime.replicas, 2);
        assert_eq!(c.runtime.resources.cpu_request.as_deref(), Some("100m"));
        assert!(c.runtime.image.is_none());
        assert!(spec.ingress.is_enabled());
        assert!(spec.ingress.wants_tls());
        assert_eq!(spec.ingress.routes[0].target_port, 4000);
    }

    #[test]
    fn empty_ingress_is_disabled() {
        let spec: DesiredGraphSpec = serde_json::from_str(r#"{"environmentId":"e","buildId":"b"}"#).unwrap();
        assert!(!spec.ingress.is_enabled());
        assert!(!spec.ingress.wants_tls());
        assert!(spec.components.is_empty());
    }

    #[test]
    fn action_serializes_type_field() {
        let a = Action::new(ActionType::Update, ResourceKind::ConfigMap, "cm-x", "env_vars=0");
        let v = serde_json::to_value(&a).unwrap();
        assert_eq!(v["type"], "Update");
        assert_eq!(v["resourceKind"], "ConfigMap");
        assert_eq!(v["resourceName"], "cm-x");
        assert_eq!(a.to_string(), "Update ConfigMap cm-x");
    }

    #[test]
    fn package_kind_wire_names() {
        assert_eq!(serde_json::to_value(PackageKind::OpenApiService).unwrap(), "OPENAPI_SERVICE");
        assert_eq!(serde_json::to_value(PackageKind::PostmanCollection).unwrap(), "POSTMAN_COLLECTION");
        assert_eq!(serde_json::to_value(PackageKind::Unspecified).unwrap(), "UNSPECIFIED");
    }
}
