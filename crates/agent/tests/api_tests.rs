//! Integration tests for the metrics and health endpoints

use agent_lib::{
    collector::async_trait,
    exposition::{self, create_router, AppState},
    health::{components, HealthRegistry},
    registry::{MetricRegistry, SnapshotCollector, UP},
    AgentMetrics, AgentTasks, CollectionCycle, CollectionCycleBuilder, ListError, NamespaceScope,
    Scheduler, SchedulerConfig, SchedulerState, StructuredLogger, Workload, WorkloadLister,
    WorkloadPhase,
};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use std::collections::BTreeMap;
use std::time::Duration as StdDuration;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio_test::assert_ok;
use tower::ServiceExt;

/// Lister whose response can be swapped between cycles
struct FakeLister {
    response: Mutex<Result<Vec<Workload>, String>>,
}

impl FakeLister {
    fn new(workloads: Vec<Workload>) -> Self {
        Self {
            response: Mutex::new(Ok(workloads)),
        }
    }

    fn fail_with(&self, message: &str) {
        *self.response.lock().unwrap() = Err(message.to_string());
    }
}

#[async_trait]
impl WorkloadLister for FakeLister {
    async fn list(&self, _scope: &NamespaceScope) -> Result<Vec<Workload>, ListError> {
        self.response
            .lock()
            .unwrap()
            .clone()
            .map_err(ListError::Unavailable)
    }
}

/// Lister that takes a while to answer with no workloads
struct SlowLister {
    delay: StdDuration,
}

#[async_trait]
impl WorkloadLister for SlowLister {
    async fn list(&self, _scope: &NamespaceScope) -> Result<Vec<Workload>, ListError> {
        tokio::time::sleep(self.delay).await;
        Ok(vec![])
    }
}

fn pod(name: &str, image: &str, team: Option<&str>, age: Duration) -> Workload {
    let mut labels = BTreeMap::new();
    if let Some(team) = team {
        labels.insert("team".to_string(), team.to_string());
    }
    Workload {
        name: name.to_string(),
        namespace: "default".to_string(),
        images: vec![image.to_string()],
        labels,
        created_at: Some(Utc::now() - age),
        phase: WorkloadPhase::Running,
    }
}

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    cycle: CollectionCycle,
    lister: Arc<FakeLister>,
}

async fn setup_test_app() -> TestApp {
    let health_registry = HealthRegistry::new();
    health_registry.register_all(components::ALL).await;

    let metric_registry = Arc::new(MetricRegistry::new());
    metric_registry.describe(UP, "Service healthcheck", &["valid"]);
    let prom_registry = prometheus::Registry::new();
    let metrics = AgentMetrics::new(&prom_registry).unwrap();

    let lister = Arc::new(FakeLister::new(vec![
        pod("w1", "org/app:1", Some("x"), Duration::zero()),
        pod("w2", "org/app:2", None, Duration::days(10)),
        pod("w3", "other/app:1", Some("y"), Duration::zero()),
    ]));
    let cycle = CollectionCycleBuilder::new()
        .lister(lister.clone())
        .registry(metric_registry.clone())
        .metrics(metrics)
        .health(health_registry.clone())
        .build()
        .unwrap();

    prom_registry
        .register(Box::new(SnapshotCollector::new(metric_registry.clone()).unwrap()))
        .unwrap();
    metric_registry.set(UP, &["true"], 1.0);

    let state = Arc::new(AppState::new(health_registry, prom_registry));
    TestApp {
        router: create_router(state.clone()),
        state,
        cycle,
        lister,
    }
}

async fn get(router: &Router, uri: &str) -> (StatusCode, String) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn test_metrics_after_cycle() {
    let app = setup_test_app().await;
    assert_ok!(app.cycle.run_once().await);

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().starts_with("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();

    assert!(text.contains("up{valid=\"true\"} 1"));
    assert!(text.contains("pods_recent_count{valid=\"true\"} 2"));
    assert!(text.contains("pods_recent_count{valid=\"false\"} 1"));
    assert!(text.contains("workload_rule_results{rule=\"image_prefix\",valid=\"false\"} 1"));
    assert!(text.contains("workload_rule_results{rule=\"team_label_present\",valid=\"false\"} 1"));
    assert!(text.contains("compliance_agent_workloads_observed 3"));
    assert!(text.contains("compliance_agent_cycle_duration_seconds_count 1"));
}

#[tokio::test]
async fn test_metrics_before_first_cycle() {
    let app = setup_test_app().await;

    let (status, text) = get(&app.router, "/metrics").await;

    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("up{valid=\"true\"} 1"));
    assert!(!text.contains("pods_recent_count{"));
}

#[tokio::test]
async fn test_failed_cycle_serves_stale_metrics() {
    let app = setup_test_app().await;
    assert_ok!(app.cycle.run_once().await);
    let (_, before) = get(&app.router, "/metrics").await;

    app.lister.fail_with("apiserver unreachable");
    assert!(app.cycle.run_once().await.is_err());

    let (status, after) = get(&app.router, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(after.contains("pods_recent_count{valid=\"true\"} 2"));
    assert!(after.contains("pods_recent_count{valid=\"false\"} 1"));
    assert!(after.contains("compliance_agent_cycle_failures_total 1"));
    assert!(before.contains("compliance_agent_cycle_failures_total 0"));
}

#[tokio::test]
async fn test_counts_shrink_when_pods_disappear() {
    let app = setup_test_app().await;
    assert_ok!(app.cycle.run_once().await);

    let remaining = vec![pod("w1", "org/app:1", Some("x"), Duration::zero())];
    *app.lister.response.lock().unwrap() = Ok(remaining);
    assert_ok!(app.cycle.run_once().await);

    let (_, text) = get(&app.router, "/metrics").await;
    assert!(text.contains("pods_recent_count{valid=\"true\"} 1"));
    assert!(text.contains("pods_recent_count{valid=\"false\"} 0"));
}

#[tokio::test]
async fn test_healthz_degraded_after_lister_failure() {
    let app = setup_test_app().await;
    app.lister.fail_with("forbidden");
    assert!(app.cycle.run_once().await.is_err());

    let (status, body) = get(&app.router, "/healthz").await;

    // Degraded still returns 200: stale metrics are served
    assert_eq!(status, StatusCode::OK);
    let health: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health["status"], "degraded");
    assert_eq!(
        health["components"]["workload_lister"]["message"],
        "workload source unavailable: forbidden"
    );
}

#[tokio::test]
async fn test_healthz_recovers_after_successful_cycle() {
    let app = setup_test_app().await;
    app.lister.fail_with("forbidden");
    assert!(app.cycle.run_once().await.is_err());

    *app.lister.response.lock().unwrap() = Ok(vec![]);
    assert_ok!(app.cycle.run_once().await);

    let (status, body) = get(&app.router, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    let health: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let app = setup_test_app().await;
    app.state
        .health_registry
        .set_unhealthy(components::EXPOSITION, "listener closed")
        .await;

    let (status, _) = get(&app.router, "/healthz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_readyz_follows_startup() {
    let app = setup_test_app().await;

    let (status, body) = get(&app.router, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let readiness: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(readiness["ready"], false);

    app.state.health_registry.set_ready(true).await;

    let (status, _) = get(&app.router, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_path_is_404() {
    let app = setup_test_app().await;

    let (status, _) = get(&app.router, "/debug").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_served_over_tcp_with_graceful_shutdown() {
    let app = setup_test_app().await;
    assert_ok!(app.cycle.run_once().await);

    let listener = exposition::bind(0).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(exposition::serve(listener, app.state.clone(), async move {
        let _ = stop_rx.await;
    }));

    let url = format!("http://127.0.0.1:{port}/metrics");
    let text = reqwest::get(&url).await.unwrap().text().await.unwrap();
    assert!(text.contains("pods_recent_count{valid=\"true\"} 2"));

    stop_tx.send(()).unwrap();
    assert_ok!(server.await.unwrap());
}

#[tokio::test]
async fn test_bind_conflict_is_an_error() {
    let first = exposition::bind(0).await.unwrap();
    let port = first.local_addr().unwrap().port();

    let err = exposition::bind(port).await.unwrap_err();

    assert!(err.to_string().contains("Failed to bind metrics listener"));
}

#[tokio::test]
async fn test_listener_stays_open_until_scheduler_stops() {
    let health_registry = HealthRegistry::new();
    let metric_registry = Arc::new(MetricRegistry::new());
    let prom_registry = prometheus::Registry::new();
    let cycle = CollectionCycleBuilder::new()
        .lister(Arc::new(SlowLister {
            delay: StdDuration::from_millis(500),
        }))
        .registry(metric_registry.clone())
        .build()
        .unwrap();
    prom_registry
        .register(Box::new(SnapshotCollector::new(metric_registry).unwrap()))
        .unwrap();

    let scheduler = Scheduler::new(
        Arc::new(cycle),
        SchedulerConfig {
            interval: StdDuration::from_secs(60),
            shutdown_grace: StdDuration::from_secs(5),
        },
    );
    let handle = scheduler.handle();
    let listener = exposition::bind(0).await.unwrap();
    let url = format!("http://127.0.0.1:{}/metrics", listener.local_addr().unwrap().port());
    let state = Arc::new(AppState::new(health_registry, prom_registry));
    let tasks = AgentTasks::spawn(scheduler, listener, state, StructuredLogger::default());

    while handle.state() != SchedulerState::Running {
        tokio::time::sleep(StdDuration::from_millis(5)).await;
    }
    let shutdown = tokio::spawn(tasks.shutdown(StdDuration::from_secs(5)));
    tokio::time::sleep(StdDuration::from_millis(50)).await;

    // Cycle still in flight: the scheduler is draining and scrapes still work
    assert_eq!(handle.state(), SchedulerState::Running);
    let text = reqwest::get(&url).await.unwrap().text().await.unwrap();
    assert!(!text.contains("pods_recent_count{"));

    let report = shutdown.await.unwrap();
    assert!(report.scheduler_stopped && report.server_stopped);
    assert_eq!(handle.state(), SchedulerState::Stopped);
    assert!(reqwest::get(&url).await.is_err());
}
