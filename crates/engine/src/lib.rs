//! Graphop reconciliation engine.
//!
//! Given a desired spec for an environment, diff it against what was last
//! reconciled, hand the resulting actions to an [`Executor`], then record the
//! desired spec as converged and project a status from it.
//!
//! State is kept per environment id. Each environment has its own gate so
//! read-diff-apply-write never interleaves for one id, while unrelated
//! environments reconcile in parallel. Records are published through
//! `ArcSwap`, so status readers never block and never see a half-written
//! record.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use arc_swap::{ArcSwap, ArcSwapOption};
use graphop_core::{Action, DesiredGraphSpec, GraphStatus};
use metrics::{counter, histogram};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};

pub mod diff;
mod executor;
pub mod record;
pub mod status;

pub use executor::Executor;
pub use record::{ComponentRecord, EnvironmentRecord};

/// Result of one reconciliation: what was attempted and the status after it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub actions: Vec<Action>,
    pub status: GraphStatus,
}

struct EnvSlot {
    gate: Mutex<()>,
    record: ArcSwapOption<EnvironmentRecord>,
}

impl EnvSlot {
    fn new() -> Self { Self { gate: Mutex::new(()), record: ArcSwapOption::empty() } }
}

pub struct Reconciler {
    slots: ArcSwap<FxHashMap<String, Arc<EnvSlot>>>,
    executor: Option<Arc<dyn Executor>>,
    namespace: String,
}

impl Reconciler {
    /// Engine without an executor: actions are computed and returned only.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self { slots: ArcSwap::from_pointee(FxHashMap::default()), executor: None, namespace: namespace.into() }
    }

    pub fn with_executor(namespace: impl Into<String>, executor: Arc<dyn Executor>) -> Self {
        Self { executor: Some(executor), ..Self::new(namespace) }
    }

    pub fn namespace(&self) -> &str { &self.namespace }

    fn slot(&self, environment_id: &str) -> Arc<EnvSlot> {
        loop {
            if let Some(slot) = self.slots.load().get(environment_id) {
                return Arc::clone(slot);
            }
            // rcu retries on contention; or_insert keeps whichever slot won.
            self.slots.rcu(|cur| {
                let mut next: FxHashMap<String, Arc<EnvSlot>> = (**cur).clone();
                next.entry(environment_id.to_string()).or_insert_with(|| Arc::new(EnvSlot::new()));
                next
            });
        }
    }

    /// Reconcile one environment. Never fails: executor errors are logged and
    /// the record still advances to `spec`, so the next submission re-diffs
    /// against it.
    #[instrument(skip_all, fields(env = %spec.environment_id, build = %spec.build_id))]
    pub async fn reconcile(&self, spec: DesiredGraphSpec) -> ReconcileOutcome {
        let t0 = Instant::now();
        counter!("reconcile_total").increment(1);
        info!(components = spec.components.len(), "reconcile start");

        let slot = self.slot(&spec.environment_id);
        let _gate = slot.gate.lock().await;

        let prior = slot.record.load_full();
        let actions = diff::compute_actions(&spec, prior.as_deref());
        for a in &actions {
            info!(action = %a.action_type, kind = %a.resource_kind, name = %a.resource_name, details = %a.details, "reconcile action");
        }

        match &self.executor {
            Some(executor) if !actions.is_empty() => {
                if let Err(e) = executor.apply(&self.namespace, &spec.environment_id, &actions, &spec).await {
                    counter!("reconcile_executor_failures_total").increment(1);
                    error!(error = %format!("{:#}", e), "executor failed; record advances anyway");
                }
            }
            Some(_) => debug!("no actions; executor not invoked"),
            None => debug!(actions = actions.len(), "no executor configured"),
        }

        let record = EnvironmentRecord::converged(spec);
        let status = record.last_status.clone();
        slot.record.store(Some(Arc::new(record)));

        counter!("reconcile_actions_total").increment(actions.len() as u64);
        histogram!("reconcile_latency_ms").record(t0.elapsed().as_secs_f64() * 1000.0);
        info!(phase = %status.phase, actions = actions.len(), "reconcile complete");
        ReconcileOutcome { actions, status }
    }

    /// Full bookkeeping for one environment, if it was ever reconciled.
    pub fn record(&self, environment_id: &str) -> Option<Arc<EnvironmentRecord>> {
        self.slots.load().get(environment_id).and_then(|s| s.record.load_full())
    }

    pub fn get_status(&self, environment_id: &str) -> Option<GraphStatus> {
        self.record(environment_id).map(|r| r.last_status.clone())
    }

    pub fn get_all_statuses(&self) -> BTreeMap<String, GraphStatus> {
        self.collect(|r| r.last_status.clone())
    }

    pub fn get_all_specs(&self) -> BTreeMap<String, DesiredGraphSpec> {
        self.collect(|r| r.last_spec.clone())
    }

    fn collect<T>(&self, f: impl Fn(&EnvironmentRecord) -> T) -> BTreeMap<String, T> {
        let slots = self.slots.load();
        let mut out = BTreeMap::new();
        for (env, slot) in slots.iter() {
            // A slot exists before its first record is stored.
            if let Some(rec) = slot.record.load_full() {
                out.insert(env.clone(), f(&rec));
            }
        }
        out
    }
}
