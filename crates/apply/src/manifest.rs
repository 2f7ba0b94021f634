//! Kubernetes objects rendered from a component or ingress spec.

use std::collections::BTreeMap;

use graphop_core::names::{config_map_name, deployment_name, ingress_name, service_name};
use graphop_core::{ComponentSpec, IngressRoute, IngressSpec};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapEnvSource, Container, EnvFromSource, PodSpec, PodTemplateSpec, ResourceRequirements, Service, ServicePort,
    ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule, IngressServiceBackend, IngressSpec as K8sIngressSpec,
    IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

/// Used when a component does not name an image.
pub const DEFAULT_IMAGE: &str = "registry.k8s.io/pause:3.9";
pub const SERVICE_PORT: i32 = 8080;

pub const ANNO_ARTIFACT_HASH: &str = "graphop.io/artifact-hash";
pub const ANNO_BUILD_ID: &str = "graphop.io/build-id";
pub const ANNO_CLUSTER_ISSUER: &str = "cert-manager.io/cluster-issuer";

pub fn labels(environment_id: &str, component: Option<&str>) -> BTreeMap<String, String> {
    let mut m = BTreeMap::new();
    m.insert("app.kubernetes.io/managed-by".to_string(), "graphop".to_string());
    m.insert("app.kubernetes.io/instance".to_string(), environment_id.to_string());
    m.insert("graphop.io/environment".to_string(), environment_id.to_string());
    if let Some(c) = component {
        m.insert("app.kubernetes.io/name".to_string(), c.to_string());
        m.insert("graphop.io/component".to_string(), c.to_string());
    }
    m
}

fn selector(environment_id: &str, component: &str) -> BTreeMap<String, String> {
    let mut m = BTreeMap::new();
    m.insert("app.kubernetes.io/name".to_string(), component.to_string());
    m.insert("app.kubernetes.io/instance".to_string(), environment_id.to_string());
    m
}

fn meta(name: String, namespace: &str, labels: BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta { name: Some(name), namespace: Some(namespace.to_string()), labels: Some(labels), ..Default::default() }
}

fn resources(c: &ComponentSpec) -> Option<ResourceRequirements> {
    let r = &c.runtime.resources;
    let pick = |cpu: &Option<String>, mem: &Option<String>| {
        let mut m = BTreeMap::new();
        if let Some(v) = cpu { m.insert("cpu".to_string(), Quantity(v.clone())); }
        if let Some(v) = mem { m.insert("memory".to_string(), Quantity(v.clone())); }
        if m.is_empty() { None } else { Some(m) }
    };
    let requests = pick(&r.cpu_request, &r.memory_request);
    let limits = pick(&r.cpu_limit, &r.memory_limit);
    if requests.is_none() && limits.is_none() {
        return None;
    }
    Some(ResourceRequirements { requests, limits, ..Default::default() })
}

pub fn deployment(namespace: &str, environment_id: &str, build_id: &str, c: &ComponentSpec) -> Deployment {
    let name = &c.package_name;
    let mut annotations = c.runtime.annotations.clone();
    annotations.insert(ANNO_ARTIFACT_HASH.to_string(), c.artifact_hash.clone());
    annotations.insert(ANNO_BUILD_ID.to_string(), build_id.to_string());

    let mut pod_annotations = BTreeMap::new();
    pod_annotations.insert(ANNO_ARTIFACT_HASH.to_string(), c.artifact_hash.clone());

    let container = Container {
        name: name.clone(),
        image: Some(c.runtime.image.clone().unwrap_or_else(|| DEFAULT_IMAGE.to_string())),
        env_from: Some(vec![EnvFromSource {
            config_map_ref: Some(ConfigMapEnvSource { name: Some(config_map_name(name)), optional: Some(true) }),
            ..Default::default()
        }]),
        resources: resources(c),
        ..Default::default()
    };

    let mut metadata = meta(deployment_name(name), namespace, labels(environment_id, Some(name)));
    metadata.annotations = Some(annotations);

    Deployment {
        metadata,
        spec: Some(DeploymentSpec {
            replicas: Some(c.runtime.replicas),
            selector: LabelSelector { match_labels: Some(selector(environment_id, name)), ..Default::default() },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels(environment_id, Some(name))),
                    annotations: Some(pod_annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec { containers: vec![container], ..Default::default() }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Ports the Service must expose: `http` on [`SERVICE_PORT`] plus every
/// other port a route aims at this component, in route order.
pub fn service_ports(package_name: &str, routes: &[IngressRoute]) -> Vec<i32> {
    let mut ports = vec![SERVICE_PORT];
    for r in routes.iter().filter(|r| r.target_component == package_name) {
        if !ports.contains(&r.target_port) {
            ports.push(r.target_port);
        }
    }
    ports
}

pub fn service(namespace: &str, environment_id: &str, c: &ComponentSpec, routes: &[IngressRoute]) -> Service {
    let name = &c.package_name;
    let ports = service_ports(name, routes)
        .into_iter()
        .map(|p| ServicePort {
            name: Some(if p == SERVICE_PORT { "http".to_string() } else { format!("port-{}", p) }),
            port: p,
            target_port: Some(IntOrString::Int(p)),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        })
        .collect();
    Service {
        metadata: meta(service_name(name), namespace, labels(environment_id, Some(name))),
        spec: Some(ServiceSpec {
            selector: Some(selector(environment_id, name)),
            type_: Some("ClusterIP".to_string()),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn config_map(namespace: &str, environment_id: &str, c: &ComponentSpec) -> ConfigMap {
    let name = &c.package_name;
    ConfigMap {
        metadata: meta(config_map_name(name), namespace, labels(environment_id, Some(name))),
        data: Some(c.runtime.env.clone()),
        ..Default::default()
    }
}

/// Ingress with one rule for the host and one prefix path per route, in order.
pub fn ingress(namespace: &str, environment_id: &str, spec: &IngressSpec, cluster_issuer: &str) -> Ingress {
    let paths = spec
        .routes
        .iter()
        .map(|r| HTTPIngressPath {
            path: Some(r.path.clone()),
            path_type: "Prefix".to_string(),
            backend: IngressBackend {
                service: Some(IngressServiceBackend {
                    name: service_name(&r.target_component),
                    port: Some(ServiceBackendPort { number: Some(r.target_port), ..Default::default() }),
                }),
                ..Default::default()
            },
        })
        .collect();

    let tls = spec.wants_tls().then(|| {
        let secret = if spec.tls.secret_name.is_empty() { format!("{}-tls", environment_id) } else { spec.tls.secret_name.clone() };
        vec![IngressTLS { hosts: Some(vec![spec.host.clone()]), secret_name: Some(secret) }]
    });

    let mut metadata = meta(ingress_name(environment_id), namespace, labels(environment_id, None));
    if spec.tls.auto_cert {
        let mut a = BTreeMap::new();
        a.insert(ANNO_CLUSTER_ISSUER.to_string(), cluster_issuer.to_string());
        metadata.annotations = Some(a);
    }

    Ingress {
        metadata,
        spec: Some(K8sIngressSpec {
            rules: Some(vec![IngressRule { host: Some(spec.host.clone()), http: Some(HTTPIngressRuleValue { paths }) }]),
            tls,
            ..Default::default()
        }),
        ..Default::default()
    }
}
