//! Graphop executors: turn reconciliation actions into cluster mutations
//! (`KubeExecutor`) or just log and record them (`LogExecutor`).

#![forbid(unsafe_code)]

use std::fmt::Debug;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use graphop_core::names::{config_map_name, deployment_name, service_name};
use graphop_core::{Action, ActionType, ComponentSpec, DesiredGraphSpec, ResourceKind};
use graphop_engine::Executor;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource};
use metrics::{counter, histogram};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

mod logging;
pub mod manifest;

pub use logging::{AppliedBatch, LogExecutor};

pub const FIELD_MANAGER: &str = "graphop";
pub const DEFAULT_CLUSTER_ISSUER: &str = "letsencrypt";

/// Applies actions against a live cluster with typed kube APIs.
///
/// Creates fall back to server-side apply when the object already exists,
/// updates create the object when it is missing, and deletes of missing
/// objects succeed. Applying the ingress also re-applies the Services its
/// routes point at. The first failing action aborts the batch.
pub struct KubeExecutor {
    client: Client,
    cluster_issuer: String,
}

impl KubeExecutor {
    pub fn new(client: Client) -> Self { Self { client, cluster_issuer: DEFAULT_CLUSTER_ISSUER.to_string() } }

    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await.context("building kube client")?;
        Ok(Self::new(client))
    }

    pub fn with_cluster_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.cluster_issuer = issuer.into();
        self
    }

    async fn apply_one(&self, ns: &str, env: &str, action: &Action, spec: &DesiredGraphSpec) -> Result<()> {
        let name = action.resource_name.as_str();
        match action.resource_kind {
            ResourceKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), ns);
                match action.action_type {
                    ActionType::Delete => delete_ignoring_missing(&api, name).await,
                    t => {
                        let c = component_for(spec, action)?;
                        let obj = manifest::deployment(ns, env, &spec.build_id, c);
                        if t == ActionType::Create { create_or_apply(&api, name, &obj).await } else { server_apply(&api, name, &obj).await }
                    }
                }
            }
            ResourceKind::Service => {
                let api: Api<Service> = Api::namespaced(self.client.clone(), ns);
                match action.action_type {
                    ActionType::Delete => delete_ignoring_missing(&api, name).await,
                    // The diff only ever creates services; ports track routes via the ingress arm.
                    _ => create_or_apply(&api, name, &manifest::service(ns, env, component_for(spec, action)?, &spec.ingress.routes)).await,
                }
            }
            ResourceKind::ConfigMap => {
                let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), ns);
                match action.action_type {
                    ActionType::Delete => delete_ignoring_missing(&api, name).await,
                    t => {
                        let obj = manifest::config_map(ns, env, component_for(spec, action)?);
                        if t == ActionType::Create { create_or_apply(&api, name, &obj).await } else { server_apply(&api, name, &obj).await }
                    }
                }
            }
            ResourceKind::Ingress => {
                let api: Api<Ingress> = Api::namespaced(self.client.clone(), ns);
                match action.action_type {
                    ActionType::Delete => delete_ignoring_missing(&api, name).await,
                    // An update to an empty host means ingress is no longer wanted.
                    ActionType::Update if !spec.ingress.is_enabled() => delete_ignoring_missing(&api, name).await,
                    t => {
                        let obj = manifest::ingress(ns, env, &spec.ingress, &self.cluster_issuer);
                        if t == ActionType::Create { create_or_apply(&api, name, &obj).await? } else { server_apply(&api, name, &obj).await? }
                        self.apply_route_services(ns, env, spec).await
                    }
                }
            }
        }
    }

    /// Re-apply the Service of every component a route targets so each
    /// backend port the ingress names is exposed.
    async fn apply_route_services(&self, ns: &str, env: &str, spec: &DesiredGraphSpec) -> Result<()> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), ns);
        let mut seen: Vec<&str> = Vec::new();
        for r in &spec.ingress.routes {
            if seen.contains(&r.target_component.as_str()) {
                continue;
            }
            seen.push(&r.target_component);
            let Some(c) = spec.component(&r.target_component) else {
                debug!(component = %r.target_component, "route targets no component in this spec");
                continue;
            };
            let svc = service_name(&c.package_name);
            server_apply(&api, &svc, &manifest::service(ns, env, c, &spec.ingress.routes)).await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Executor for KubeExecutor {
    async fn apply(&self, namespace: &str, environment_id: &str, actions: &[Action], spec: &DesiredGraphSpec) -> Result<()> {
        let t0 = Instant::now();
        for action in actions {
            info!(env = %environment_id, ns = %namespace, action = %action.action_type, kind = %action.resource_kind, name = %action.resource_name, "applying action");
            if let Err(e) = self.apply_one(namespace, environment_id, action, spec).await {
                counter!("executor_errors_total", "executor" => "kube").increment(1);
                warn!(error = %e, action = %action, "action failed; aborting batch");
                return Err(e.context(format!("applying {} {} {}", action.action_type, action.resource_kind, action.resource_name)));
            }
            counter!("executor_actions_total", "executor" => "kube").increment(1);
        }
        histogram!("executor_apply_ms", "executor" => "kube").record(t0.elapsed().as_secs_f64() * 1000.0);
        Ok(())
    }
}

/// Look up the component an action's resource name was derived from.
fn component_for<'a>(spec: &'a DesiredGraphSpec, action: &Action) -> Result<&'a ComponentSpec> {
    let derive: fn(&str) -> String = match action.resource_kind {
        ResourceKind::Deployment => deployment_name,
        ResourceKind::Service => service_name,
        ResourceKind::ConfigMap => config_map_name,
        ResourceKind::Ingress => return Err(anyhow!("ingress is not a component resource")),
    };
    spec.components
        .iter()
        .find(|c| derive(&c.package_name) == action.resource_name)
        .ok_or_else(|| anyhow!("component not found for {} {}", action.resource_kind, action.resource_name))
}

pub(crate) fn is_conflict(e: &kube::Error) -> bool { matches!(e, kube::Error::Api(ae) if ae.code == 409) }

pub(crate) fn is_not_found(e: &kube::Error) -> bool { matches!(e, kube::Error::Api(ae) if ae.code == 404) }

async fn create_or_apply<K>(api: &Api<K>, name: &str, obj: &K) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    match api.create(&PostParams::default(), obj).await {
        Ok(_) => Ok(()),
        Err(e) if is_conflict(&e) => {
            debug!(name, "already exists; applying instead");
            server_apply(api, name, obj).await
        }
        Err(e) => Err(e.into()),
    }
}

/// Server-side apply; creates the object when it does not exist yet.
async fn server_apply<K>(api: &Api<K>, name: &str, obj: &K) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    let pp = PatchParams::apply(FIELD_MANAGER).force();
    api.patch(name, &pp, &Patch::Apply(obj)).await?;
    Ok(())
}

async fn delete_ignoring_missing<K>(api: &Api<K>, name: &str) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(e) if is_not_found(&e) => {
            debug!(name, "already gone");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
