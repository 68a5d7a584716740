//! Pod Compliance Agent
//!
//! Periodically lists pods, evaluates compliance rules against each of them
//! and exposes the aggregated results on a Prometheus endpoint.

use agent_lib::{
    exposition::{self, AppState},
    health::{components, HealthRegistry},
    registry::{MetricRegistry, SnapshotCollector, UP},
    AgentExit, AgentMetrics, AgentTasks, CollectionCycleBuilder, KubeWorkloadLister, RuleSet,
    Scheduler, StructuredLogger,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = config::AgentConfig::load()?;
    let scope = config.scope();
    let logger = StructuredLogger::new(&config.instance);
    info!(
        namespace = %scope,
        image_prefix = %config.image_prefix,
        required_label_key = %config.required_label_key,
        "Agent configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register_all(components::ALL).await;

    // Gauges published by the cycle, plus the agent's own metrics
    let metric_registry = Arc::new(MetricRegistry::new());
    metric_registry.describe(UP, "Service healthcheck", &["valid"]);
    let prom_registry = prometheus::Registry::new();
    let agent_metrics = AgentMetrics::new(&prom_registry)?;

    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let cycle = CollectionCycleBuilder::new()
        .lister(Arc::new(KubeWorkloadLister::new(client)))
        .registry(metric_registry.clone())
        .rules(Arc::new(RuleSet::standard(&config.rule_config())))
        .scope(scope.clone())
        .recent_metric(config.recent_metric_name.clone())
        .metrics(agent_metrics)
        .health(health_registry.clone())
        .logger(logger.clone())
        .build()?;

    // Families are all described by now
    prom_registry.register(Box::new(SnapshotCollector::new(metric_registry.clone())?))?;

    // Bind failure is fatal: nothing else is started yet
    let listener = exposition::bind(config.port).await?;
    metric_registry.set(UP, &["true"], 1.0);
    logger.log_startup(AGENT_VERSION, config.port, &scope);

    let scheduler = Scheduler::new(Arc::new(cycle), config.scheduler_config());
    let app_state = Arc::new(AppState::new(health_registry.clone(), prom_registry));
    let mut tasks = AgentTasks::spawn(scheduler, listener, app_state, logger);

    health_registry.set_ready(true).await;
    let exit = tasks.wait(tokio::signal::ctrl_c()).await;
    health_registry.set_ready(false).await;

    // Scheduler first, so the listener outlives any in-flight cycle
    tasks.shutdown(config.shutdown_grace()).await;

    match exit {
        AgentExit::Interrupted => Ok(()),
        AgentExit::Failed(e) => Err(e),
    }
}
