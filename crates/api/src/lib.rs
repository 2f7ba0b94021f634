//! Graphop public API façade (in-process).
//!
//! Frontends depend on [`GraphApi`] rather than on the engine directly. The
//! in-process implementation validates requests and forwards to a shared
//! [`Reconciler`].

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub mod gateway;

pub use gateway::{GatewayConfig, GatewayRoute, GatewayRoutingTable};
pub use graphop_core::{Action, DesiredGraphSpec, GraphStatus};
pub use graphop_engine::{ReconcileOutcome, Reconciler};

/// API errors suitable for transport over RPC later.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum ApiError {
    #[error("validation: {0}")]
    Validation(String),
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

#[async_trait::async_trait]
pub trait GraphApi: Send + Sync {
    /// Validate and reconcile one environment spec.
    async fn reconcile(&self, spec: DesiredGraphSpec) -> ApiResult<ReconcileOutcome>;

    async fn status(&self, environment_id: &str) -> ApiResult<GraphStatus>;

    /// Every known environment's status, ordered by environment id.
    async fn statuses(&self) -> ApiResult<BTreeMap<String, GraphStatus>>;

    /// Gateway routes for every stored spec.
    async fn gateway_config(&self) -> ApiResult<GatewayConfig>;
}

pub struct InProcApi {
    reconciler: Arc<Reconciler>,
}

impl InProcApi {
    pub fn new(reconciler: Arc<Reconciler>) -> Self { Self { reconciler } }

    pub fn reconciler(&self) -> &Arc<Reconciler> { &self.reconciler }
}

/// Reject specs the engine cannot key or label.
pub fn validate(spec: &DesiredGraphSpec) -> ApiResult<()> {
    if spec.environment_id.trim().is_empty() {
        return Err(ApiError::Validation("spec.environmentId is required".into()));
    }
    if spec.build_id.trim().is_empty() {
        return Err(ApiError::Validation("spec.buildId is required".into()));
    }
    Ok(())
}

#[async_trait::async_trait]
impl GraphApi for InProcApi {
    async fn reconcile(&self, spec: DesiredGraphSpec) -> ApiResult<ReconcileOutcome> {
        if let Err(e) = validate(&spec) {
            warn!(env = %spec.environment_id, error = %e, "rejected spec");
            return Err(e);
        }
        Ok(self.reconciler.reconcile(spec).await)
    }

    async fn status(&self, environment_id: &str) -> ApiResult<GraphStatus> {
        self.reconciler
            .get_status(environment_id)
            .ok_or_else(|| ApiError::NotFound(format!("environment not found: {}", environment_id)))
    }

    async fn statuses(&self) -> ApiResult<BTreeMap<String, GraphStatus>> { Ok(self.reconciler.get_all_statuses()) }

    async fn gateway_config(&self) -> ApiResult<GatewayConfig> {
        Ok(gateway::routing_table(&self.reconciler.get_all_specs()))
    }
}
