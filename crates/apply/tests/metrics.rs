#![forbid(unsafe_code)]

// Installs the process-wide recorder, so this file holds a single test.

use graphop_apply::LogExecutor;
use graphop_core::{Action, ActionType, DesiredGraphSpec, ResourceKind};
use graphop_engine::Executor;
use metrics_exporter_prometheus::PrometheusBuilder;

#[tokio::test]
async fn log_executor_records_counters_and_latency() {
    let handle = PrometheusBuilder::new().install_recorder().unwrap();
    let ex = LogExecutor::new();
    let spec = DesiredGraphSpec { environment_id: "env-1".into(), build_id: "b1".into(), ..Default::default() };
    let actions = [Action::new(ActionType::Create, ResourceKind::ConfigMap, "cm-a", "env_vars=0")];
    ex.apply("ns", "env-1", &actions, &spec).await.unwrap();

    let text = handle.render();
    assert!(text.contains("executor_actions_total{executor=\"log\"}"), "rendered: {}", text);
    assert!(text.contains("executor_apply_ms"), "rendered: {}", text);
}
