use anyhow::Result;
use graphop_core::{Action, DesiredGraphSpec};

/// Turns an ordered action list into real side effects.
///
/// The engine treats implementations as unreliable: an error is logged and
/// reconciliation carries on. Timeouts, if any, belong to the implementation.
#[async_trait::async_trait]
pub trait Executor: Send + Sync {
    async fn apply(&self, namespace: &str, environment_id: &str, actions: &[Action], spec: &DesiredGraphSpec) -> Result<()>;
}
