use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use anyhow::Result;
use graphop_core::{Action, DesiredGraphSpec};
use graphop_engine::Executor;
use metrics::{counter, histogram};
use serde::Serialize;
use tracing::info;

const DEFAULT_CAPACITY: usize = 256;

/// One executor invocation as seen by [`LogExecutor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedBatch {
    pub namespace: String,
    pub environment_id: String,
    pub build_id: String,
    pub actions: Vec<Action>,
}

/// Dry-run executor: logs every action and keeps a bounded history of
/// batches. Never fails.
pub struct LogExecutor {
    cap: usize,
    inner: Mutex<History>,
}

#[derive(Default)]
struct History {
    batches: VecDeque<AppliedBatch>,
    dropped: u64,
}

impl Default for LogExecutor {
    fn default() -> Self { Self::new() }
}

impl LogExecutor {
    pub fn new() -> Self { Self::with_capacity(DEFAULT_CAPACITY) }

    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.max(1);
        Self { cap, inner: Mutex::new(History { batches: VecDeque::with_capacity(cap.min(DEFAULT_CAPACITY)), dropped: 0 }) }
    }

    /// Batches seen so far, oldest first.
    pub fn applied(&self) -> Vec<AppliedBatch> {
        let h = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        h.batches.iter().cloned().collect()
    }

    /// Batches evicted because the history was full.
    pub fn dropped(&self) -> u64 { self.inner.lock().unwrap_or_else(PoisonError::into_inner).dropped }
}

#[async_trait::async_trait]
impl Executor for LogExecutor {
    async fn apply(&self, namespace: &str, environment_id: &str, actions: &[Action], spec: &DesiredGraphSpec) -> Result<()> {
        let t0 = Instant::now();
        for a in actions {
            info!(env = %environment_id, ns = %namespace, action = %a.action_type, kind = %a.resource_kind, name = %a.resource_name, details = %a.details, "would apply action (log)");
            counter!("executor_actions_total", "executor" => "log").increment(1);
        }
        let batch = AppliedBatch {
            namespace: namespace.to_string(),
            environment_id: environment_id.to_string(),
            build_id: spec.build_id.clone(),
            actions: actions.to_vec(),
        };
        let mut h = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if h.batches.len() >= self.cap {
            h.batches.pop_front();
            h.dropped += 1;
        }
        h.batches.push_back(batch);
        histogram!("executor_apply_ms", "executor" => "log").record(t0.elapsed().as_secs_f64() * 1000.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphop_core::{ActionType, ResourceKind};

    fn spec(build: &str) -> DesiredGraphSpec {
        DesiredGraphSpec { environment_id: "env-1".into(), build_id: build.into(), ..Default::default() }
    }

    #[tokio::test]
    async fn records_batches_in_order() {
        let ex = LogExecutor::new();
        let a = Action::new(ActionType::Create, ResourceKind::Deployment, "deploy-a", "image=artifact:h replicas=1");
        ex.apply("ns", "env-1", &[a.clone()], &spec("b1")).await.unwrap();
        ex.apply("ns", "env-1", &[], &spec("b2")).await.unwrap();
        let got = ex.applied();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].namespace, "ns");
        assert_eq!(got[0].build_id, "b1");
        assert_eq!(got[0].actions, vec![a]);
        assert!(got[1].actions.is_empty());
        assert_eq!(ex.dropped(), 0);
    }

    #[tokio::test]
    async fn bounded_history_drops_oldest() {
        let ex = LogExecutor::with_capacity(2);
        for b in ["b1", "b2", "b3"] {
            ex.apply("ns", "env-1", &[], &spec(b)).await.unwrap();
        }
        let builds: Vec<String> = ex.applied().into_iter().map(|b| b.build_id).collect();
        assert_eq!(builds, vec!["b2", "b3"]);
        assert_eq!(ex.dropped(), 1);
    }
}
