//! Status projector: derives the reportable status from intent alone.

use chrono::{DateTime, Utc};
use graphop_core::{ComponentStatus, DesiredGraphSpec, GraphStatus, IngressSpec, Phase};

use crate::record::ComponentRecords;

pub fn project(spec: &DesiredGraphSpec, components: &ComponentRecords) -> GraphStatus {
    project_at(spec, components, Utc::now())
}

pub fn project_at(spec: &DesiredGraphSpec, components: &ComponentRecords, now: DateTime<Utc>) -> GraphStatus {
    let component_statuses: Vec<ComponentStatus> = spec
        .components
        .iter()
        .map(|c| {
            let deployed = components.get(&c.package_name).map(|r| r.deployment_ok).unwrap_or(false);
            let (phase, ready_replicas) = if deployed { (Phase::Running, c.runtime.replicas) } else { (Phase::Pending, 0) };
            ComponentStatus {
                package_name: c.package_name.clone(),
                phase,
                ready_replicas,
                desired_replicas: c.runtime.replicas,
                message: None,
            }
        })
        .collect();

    // Degraded/Failed need real health feedback, which this engine never has.
    let phase = if component_statuses.iter().all(|c| c.phase == Phase::Running) { Phase::Running } else { Phase::Deploying };

    GraphStatus {
        phase,
        component_statuses,
        preview_url: preview_url(&spec.ingress),
        message: format!("Reconciled build {}", spec.build_id),
        last_reconciled: now,
    }
}

pub fn preview_url(ingress: &IngressSpec) -> String {
    if !ingress.is_enabled() {
        return String::new();
    }
    let scheme = if ingress.wants_tls() { "https" } else { "http" };
    format!("{}://{}", scheme, ingress.host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ComponentRecord;
    use graphop_core::{ComponentSpec, TlsConfig};

    fn comp(name: &str, replicas: i32) -> ComponentSpec {
        let mut c = ComponentSpec { package_name: name.into(), artifact_hash: "h".into(), ..Default::default() };
        c.runtime.replicas = replicas;
        c
    }

    fn spec_with(components: Vec<ComponentSpec>) -> DesiredGraphSpec {
        DesiredGraphSpec { environment_id: "env-1".into(), build_id: "build-7".into(), components, ..Default::default() }
    }

    #[test]
    fn converged_components_report_running() {
        let spec = spec_with(vec![comp("a", 2), comp("b", 0)]);
        let records: ComponentRecords = spec.components.iter().map(|c| (c.package_name.clone(), ComponentRecord::converged(c.clone()))).collect();
        let st = project(&spec, &records);
        assert_eq!(st.phase, Phase::Running);
        assert_eq!(st.component_statuses.len(), 2);
        assert_eq!(st.component_statuses[0].ready_replicas, 2);
        assert_eq!(st.component_statuses[0].desired_replicas, 2);
        assert_eq!(st.component_statuses[1].ready_replicas, 0);
        assert!(st.message.contains("build-7"));
    }

    #[test]
    fn missing_or_unconverged_component_is_pending() {
        let spec = spec_with(vec![comp("a", 2), comp("b", 3)]);
        let mut records = ComponentRecords::default();
        let mut a = ComponentRecord::converged(spec.components[0].clone());
        a.deployment_ok = false;
        records.insert("a".into(), a);
        let st = project(&spec, &records);
        assert_eq!(st.phase, Phase::Deploying);
        assert!(st.component_statuses.iter().all(|c| c.phase == Phase::Pending && c.ready_replicas == 0));
        assert_eq!(st.component_statuses[1].desired_replicas, 3);
    }

    #[test]
    fn empty_graph_is_running() {
        let spec = spec_with(vec![]);
        let st = project(&spec, &ComponentRecords::default());
        assert_eq!(st.phase, Phase::Running);
        assert!(st.component_statuses.is_empty());
    }

    #[test]
    fn preview_url_scheme_follows_tls() {
        let mut ing = IngressSpec { host: "api.example.com".into(), ..Default::default() };
        assert_eq!(preview_url(&ing), "http://api.example.com");
        ing.tls = TlsConfig { secret_name: String::new(), auto_cert: true };
        assert_eq!(preview_url(&ing), "https://api.example.com");
        ing.tls = TlsConfig { secret_name: "api-tls".into(), auto_cert: false };
        assert_eq!(preview_url(&ing), "https://api.example.com");
        ing.host.clear();
        assert_eq!(preview_url(&ing), "");
    }
}
