use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use graphop_api::{ApiError, GraphApi, InProcApi, ReconcileOutcome};
use graphop_apply::{KubeExecutor, LogExecutor};
use graphop_core::{DesiredGraphSpec, GraphStatus};
use graphop_engine::{Executor, Reconciler};
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

mod source;

#[derive(Parser, Debug)]
#[command(name = "graphopctl", version, about = "Graphop preview-environment reconciler")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace all environments are deployed into
    #[arg(long = "ns", global = true, env = "GRAPHOP_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Where actions go: logged only, or applied to the cluster
    #[arg(long = "executor", value_enum, global = true, env = "GRAPHOP_EXECUTOR", default_value_t = ExecutorKind::Log)]
    executor: ExecutorKind,

    /// cert-manager ClusterIssuer named on TLS ingresses (kube executor)
    #[arg(long = "cluster-issuer", global = true, env = "GRAPHOP_CLUSTER_ISSUER", default_value = graphop_apply::DEFAULT_CLUSTER_ISSUER)]
    cluster_issuer: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum ExecutorKind { Log, Kube }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the actions the given specs would produce; nothing is applied
    Plan {
        #[arg(short = 'f', long = "file", required = true, num_args = 1..)]
        files: Vec<PathBuf>,
        /// Specs treated as already reconciled before planning
        #[arg(long = "against", num_args = 1..)]
        against: Vec<PathBuf>,
    },
    /// Reconcile the given specs once with the selected executor
    Apply {
        #[arg(short = 'f', long = "file", required = true, num_args = 1..)]
        files: Vec<PathBuf>,
    },
    /// Re-read and reconcile the given specs on an interval until Ctrl-C
    Run {
        #[arg(short = 'f', long = "file", required = true, num_args = 1..)]
        files: Vec<PathBuf>,
        /// Seconds between passes
        #[arg(long = "interval", env = "GRAPHOP_POLL_SECS", default_value_t = 30)]
        interval: u64,
    },
    /// Print the gateway routing config the given specs produce
    Routes {
        #[arg(short = 'f', long = "file", required = true, num_args = 1..)]
        files: Vec<PathBuf>,
    },
}

fn init_tracing() {
    let env = std::env::var("GRAPHOP_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("GRAPHOP_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid GRAPHOP_METRICS_ADDR; expected host:port");
        }
    }
}

async fn build_executor(cli: &Cli) -> Result<Arc<dyn Executor>> {
    Ok(match cli.executor {
        ExecutorKind::Log => Arc::new(LogExecutor::new()),
        ExecutorKind::Kube => Arc::new(KubeExecutor::try_default().await?.with_cluster_issuer(cli.cluster_issuer.clone())),
    })
}

/// Reconcile specs grouped by environment: groups run concurrently, specs
/// within a group run one after another in input order so the last one for
/// an environment is what the engine keeps. Outcomes come back in input order.
async fn submit_all(api: &Arc<InProcApi>, specs: Vec<DesiredGraphSpec>) -> Vec<(String, Result<ReconcileOutcome, ApiError>)> {
    let mut groups: Vec<Vec<(usize, DesiredGraphSpec)>> = Vec::new();
    let mut by_env: HashMap<String, usize> = HashMap::new();
    for (i, spec) in specs.into_iter().enumerate() {
        let g = *by_env.entry(spec.environment_id.clone()).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[g].push((i, spec));
    }

    let mut set = JoinSet::new();
    for group in groups {
        let api = Arc::clone(api);
        set.spawn(async move {
            let mut done = Vec::with_capacity(group.len());
            for (i, spec) in group {
                let env = spec.environment_id.clone();
                done.push((i, env, api.reconcile(spec).await));
            }
            done
        });
    }
    let mut out = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(done) => out.extend(done),
            Err(e) => error!(error = %e, "reconcile task failed"),
        }
    }
    out.sort_by_key(|(i, _, _)| *i);
    out.into_iter().map(|(_, env, r)| (env, r)).collect()
}

fn print_outcomes(output: Output, outcomes: &[(String, Result<ReconcileOutcome, ApiError>)]) -> Result<()> {
    match output {
        Output::Human => {
            for (env, r) in outcomes {
                match r {
                    Ok(o) => {
                        println!("{}  phase={}  actions={}", env, o.status.phase, o.actions.len());
                        for a in &o.actions {
                            println!("  {:<7} {:<11} {:<28} {}", a.action_type, a.resource_kind, a.resource_name, a.details);
                        }
                    }
                    Err(e) => println!("{}  rejected: {}", env, e),
                }
            }
        }
        Output::Json => {
            #[derive(serde::Serialize)]
            #[serde(rename_all = "camelCase")]
            struct Row<'a> {
                environment_id: &'a str,
                #[serde(skip_serializing_if = "Option::is_none")]
                outcome: Option<&'a ReconcileOutcome>,
                #[serde(skip_serializing_if = "Option::is_none")]
                error: Option<&'a ApiError>,
            }
            let rows: Vec<Row> = outcomes
                .iter()
                .map(|(env, r)| Row { environment_id: env, outcome: r.as_ref().ok(), error: r.as_ref().err() })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }
    Ok(())
}

fn print_statuses(output: Output, statuses: &std::collections::BTreeMap<String, GraphStatus>) -> Result<()> {
    match output {
        Output::Human => {
            println!("{:<24} {:<10} {:<40} MESSAGE", "ENVIRONMENT", "PHASE", "PREVIEW");
            for (env, st) in statuses {
                let url = if st.preview_url.is_empty() { "-" } else { st.preview_url.as_str() };
                println!("{:<24} {:<10} {:<40} {}", env, st.phase.to_string(), url, st.message);
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(statuses)?),
    }
    Ok(())
}

fn rejected(outcomes: &[(String, Result<ReconcileOutcome, ApiError>)]) -> usize {
    outcomes.iter().filter(|(_, r)| r.is_err()).count()
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Plan { files, against } => {
            info!(files = files.len(), against = against.len(), "plan invoked");
            let api = Arc::new(InProcApi::new(Arc::new(Reconciler::new(cli.namespace.clone()))));
            if !against.is_empty() {
                let prior = submit_all(&api, source::load_all(against)?).await;
                for (env, r) in &prior {
                    if let Err(e) = r {
                        warn!(env = %env, error = %e, "prior spec rejected");
                    }
                }
            }
            let outcomes = submit_all(&api, source::load_all(files)?).await;
            print_outcomes(cli.output, &outcomes)?;
            let n = rejected(&outcomes);
            if n > 0 {
                bail!("{} spec(s) rejected", n);
            }
        }
        Commands::Apply { files } => {
            let specs = source::load_all(files)?;
            info!(specs = specs.len(), executor = ?cli.executor, ns = %cli.namespace, "apply invoked");
            let executor = build_executor(&cli).await?;
            let api = Arc::new(InProcApi::new(Arc::new(Reconciler::with_executor(cli.namespace.clone(), executor))));
            let outcomes = submit_all(&api, specs).await;
            print_outcomes(cli.output, &outcomes)?;
            let n = rejected(&outcomes);
            if n > 0 {
                bail!("{} spec(s) rejected", n);
            }
        }
        Commands::Run { files, interval } => {
            info!(files = files.len(), interval_secs = *interval, executor = ?cli.executor, ns = %cli.namespace, "run invoked");
            let executor = build_executor(&cli).await?;
            let api = Arc::new(InProcApi::new(Arc::new(Reconciler::with_executor(cli.namespace.clone(), executor))));
            let mut tick = tokio::time::interval(Duration::from_secs((*interval).max(1)));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        // A bad file skips this pass; the previous records stay.
                        match source::load_all(files) {
                            Ok(specs) => {
                                let outcomes = submit_all(&api, specs).await;
                                for (env, r) in &outcomes {
                                    match r {
                                        Ok(o) => info!(env = %env, phase = %o.status.phase, actions = o.actions.len(), "pass reconciled"),
                                        Err(e) => warn!(env = %env, error = %e, "spec rejected"),
                                    }
                                }
                            }
                            Err(e) => warn!(error = %format!("{:#}", e), "loading specs failed; skipping pass"),
                        }
                    }
                    _ = signal::ctrl_c() => {
                        info!("interrupted; stopping");
                        break;
                    }
                }
            }
            print_statuses(cli.output, &api.statuses().await?)?;
        }
        Commands::Routes { files } => {
            let api = Arc::new(InProcApi::new(Arc::new(Reconciler::new(cli.namespace.clone()))));
            for (env, r) in submit_all(&api, source::load_all(files)?).await {
                if let Err(e) = r {
                    warn!(env = %env, error = %e, "spec rejected");
                }
            }
            let cfg = api.gateway_config().await?;
            match cli.output {
                Output::Human => {
                    println!("{:<24} {:<36} TIMEOUT", "PREFIX", "UPSTREAM");
                    for r in &cfg.routing.routes {
                        println!("{:<24} {:<36} {}ms", r.path_prefix, r.upstream_url, r.timeout_ms);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&cfg)?),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_and_subcommands() {
        let cli = Cli::try_parse_from(["graphopctl", "-o", "json", "--ns", "previews", "plan", "-f", "a.yaml", "b.yaml", "--against", "old.yaml"]).unwrap();
        assert_eq!(cli.output, Output::Json);
        assert_eq!(cli.namespace, "previews");
        match cli.command {
            Commands::Plan { files, against } => {
                assert_eq!(files.len(), 2);
                assert_eq!(against, vec![PathBuf::from("old.yaml")]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn executor_flag_accepts_kube() {
        let cli = Cli::try_parse_from(["graphopctl", "--executor", "kube", "apply", "-f", "a.yaml"]).unwrap();
        assert_eq!(cli.executor, ExecutorKind::Kube);
        assert!(Cli::try_parse_from(["graphopctl", "apply"]).is_err());
    }

    #[tokio::test]
    async fn plan_against_prior_only_shows_changes() {
        let api = Arc::new(InProcApi::new(Arc::new(Reconciler::new("default"))));
        let prior = source::parse_specs("environmentId: e\nbuildId: b1\ncomponents:\n  - packageName: a\n    artifactHash: h1\n", false).unwrap();
        submit_all(&api, prior).await;
        let next = source::parse_specs("environmentId: e\nbuildId: b2\ncomponents:\n  - packageName: a\n    artifactHash: h2\n", false).unwrap();
        let out = submit_all(&api, next).await;
        let o = out[0].1.as_ref().unwrap();
        let names: Vec<&str> = o.actions.iter().map(|a| a.resource_name.as_str()).collect();
        assert_eq!(names, vec!["deploy-a", "cm-a"]);
        assert_eq!(rejected(&out), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn last_spec_for_an_environment_wins() {
        let text = "- environmentId: e\n  buildId: b1\n  components:\n    - packageName: a\n      artifactHash: h1\n\
                    - environmentId: other\n  buildId: b1\n\
                    - environmentId: e\n  buildId: b2\n  components:\n    - packageName: a\n      artifactHash: h2\n";
        let specs = source::parse_specs(text, false).unwrap();
        for _ in 0..300 {
            let api = Arc::new(InProcApi::new(Arc::new(Reconciler::new("default"))));
            let out = submit_all(&api, specs.clone()).await;
            assert_eq!(out.len(), 3);
            // The second e spec diffs against the first one.
            assert_eq!(out[2].1.as_ref().unwrap().actions.len(), 2);
            let st = api.status("e").await.unwrap();
            assert_eq!(st.message, "Reconciled build b2");
            let stored = api.reconciler().get_all_specs();
            assert_eq!(stored["e"].components[0].artifact_hash, "h2");
        }
    }

    #[tokio::test]
    async fn outcomes_keep_submission_order_and_report_rejections() {
        let api = Arc::new(InProcApi::new(Arc::new(Reconciler::new("default"))));
        let specs = source::parse_specs("- environmentId: z\n  buildId: b\n- environmentId: a\n  buildId: ''\n- environmentId: m\n  buildId: b\n", false).unwrap();
        let out = submit_all(&api, specs).await;
        let envs: Vec<&str> = out.iter().map(|(e, _)| e.as_str()).collect();
        assert_eq!(envs, vec!["z", "a", "m"]);
        assert_eq!(rejected(&out), 1);
    }
}
