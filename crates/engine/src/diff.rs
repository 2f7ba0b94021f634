//! Desired-vs-recorded diff producing ordered convergence actions.
//!
//! Only `artifact_hash` and `runtime.replicas` count as component changes;
//! env vars, resources, annotations and image are deliberately not compared.

use graphop_core::names::{config_map_name, deployment_name, ingress_name, service_name};
use graphop_core::{Action, ActionType, ComponentSpec, DesiredGraphSpec, IngressSpec, ResourceKind};
use rustc_hash::FxHashSet;

use crate::record::EnvironmentRecord;

/// Compute the actions that take `prior` to `spec`. Components keep the order
/// of `spec.components`; deletions follow the order of the prior spec.
pub fn compute_actions(spec: &DesiredGraphSpec, prior: Option<&EnvironmentRecord>) -> Vec<Action> {
    let mut actions = Vec::new();

    let Some(prior) = prior else {
        for c in &spec.components {
            actions.extend(create_component(c));
        }
        if let Some(a) = create_ingress(spec) {
            actions.push(a);
        }
        return actions;
    };

    for c in &spec.components {
        match prior.components.get(&c.package_name) {
            None => actions.extend(create_component(c)),
            Some(rec) if component_changed(&rec.spec, c) => actions.extend(update_component(c)),
            Some(_) => {}
        }
    }

    let desired: FxHashSet<&str> = spec.components.iter().map(|c| c.package_name.as_str()).collect();
    for old in &prior.last_spec.components {
        if !desired.contains(old.package_name.as_str()) && prior.components.contains_key(&old.package_name) {
            actions.extend(delete_component(&old.package_name));
        }
    }

    if ingress_changed(&prior.last_spec.ingress, &spec.ingress) {
        actions.push(Action::new(
            ActionType::Update,
            ResourceKind::Ingress,
            ingress_name(&spec.environment_id),
            format!("update ingress host={} routes={}", spec.ingress.host, spec.ingress.routes.len()),
        ));
    }

    actions
}

fn component_changed(prev: &ComponentSpec, next: &ComponentSpec) -> bool {
    prev.artifact_hash != next.artifact_hash || prev.runtime.replicas != next.runtime.replicas
}

/// Host change or any per-index route difference (reordering counts).
fn ingress_changed(prev: &IngressSpec, next: &IngressSpec) -> bool {
    prev.host != next.host || prev.routes != next.routes
}

fn deployment_details(c: &ComponentSpec) -> String {
    format!("image=artifact:{} replicas={}", c.artifact_hash, c.runtime.replicas)
}

fn config_map_details(c: &ComponentSpec) -> String { format!("env_vars={}", c.runtime.env.len()) }

fn create_component(c: &ComponentSpec) -> [Action; 3] {
    [
        Action::new(ActionType::Create, ResourceKind::Deployment, deployment_name(&c.package_name), deployment_details(c)),
        Action::new(ActionType::Create, ResourceKind::Service, service_name(&c.package_name), format!("selector={}", c.package_name)),
        Action::new(ActionType::Create, ResourceKind::ConfigMap, config_map_name(&c.package_name), config_map_details(c)),
    ]
}

// Service selectors never change, so services are never updated.
fn update_component(c: &ComponentSpec) -> [Action; 2] {
    [
        Action::new(ActionType::Update, ResourceKind::Deployment, deployment_name(&c.package_name), deployment_details(c)),
        Action::new(ActionType::Update, ResourceKind::ConfigMap, config_map_name(&c.package_name), config_map_details(c)),
    ]
}

fn delete_component(package_name: &str) -> [Action; 3] {
    const WHY: &str = "removing unused component";
    [
        Action::new(ActionType::Delete, ResourceKind::Deployment, deployment_name(package_name), WHY),
        Action::new(ActionType::Delete, ResourceKind::Service, service_name(package_name), WHY),
        Action::new(ActionType::Delete, ResourceKind::ConfigMap, config_map_name(package_name), WHY),
    ]
}

fn create_ingress(spec: &DesiredGraphSpec) -> Option<Action> {
    let ing = &spec.ingress;
    if !ing.is_enabled() {
        return None;
    }
    Some(Action::new(
        ActionType::Create,
        ResourceKind::Ingress,
        ingress_name(&spec.environment_id),
        format!("host={} routes={} tls={}", ing.host, ing.routes.len(), ing.wants_tls()),
    ))
}
