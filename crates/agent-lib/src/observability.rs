//! Observability infrastructure for the compliance agent
//!
//! Provides:
//! - Prometheus self-metrics (cycle latency, failures, skipped ticks)
//! - Structured JSON logging of evaluation and lifecycle events

use crate::collector::NamespaceScope;
use crate::cycle::CycleReport;
use crate::models::EvaluationResult;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Histogram buckets for cycle duration (in seconds)
const CYCLE_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Agent self-metrics, registered on an explicit registry
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct AgentMetrics {
    cycle_duration_seconds: Histogram,
    cycle_failures: IntCounter,
    ticks_skipped: IntCounter,
    workloads_observed: IntGauge,
}

impl AgentMetrics {
    /// Create the metrics and register them on `registry`
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let metrics = Self::unregistered()?;

        registry.register(Box::new(metrics.cycle_duration_seconds.clone()))?;
        registry.register(Box::new(metrics.cycle_failures.clone()))?;
        registry.register(Box::new(metrics.ticks_skipped.clone()))?;
        registry.register(Box::new(metrics.workloads_observed.clone()))?;

        Ok(metrics)
    }

    /// Metrics that are recorded but not exposed anywhere
    pub fn unregistered() -> prometheus::Result<Self> {
        Ok(Self {
            cycle_duration_seconds: Histogram::with_opts(
                HistogramOpts::new(
                    "compliance_agent_cycle_duration_seconds",
                    "Time spent on one collection cycle",
                )
                .buckets(CYCLE_BUCKETS.to_vec()),
            )?,
            cycle_failures: IntCounter::new(
                "compliance_agent_cycle_failures_total",
                "Collection cycles aborted because workloads could not be listed",
            )?,
            ticks_skipped: IntCounter::new(
                "compliance_agent_ticks_skipped_total",
                "Scheduler ticks dropped because a cycle was still running",
            )?,
            workloads_observed: IntGauge::new(
                "compliance_agent_workloads_observed",
                "Workloads evaluated in the last completed cycle",
            )?,
        })
    }

    pub fn observe_cycle_duration(&self, elapsed: Duration) {
        self.cycle_duration_seconds.observe(elapsed.as_secs_f64());
    }

    pub fn inc_cycle_failures(&self) {
        self.cycle_failures.inc();
    }

    pub fn inc_ticks_skipped(&self) {
        self.ticks_skipped.inc();
    }

    pub fn set_workloads_observed(&self, count: usize) {
        self.workloads_observed.set(count as i64);
    }

    pub fn cycle_failures(&self) -> u64 {
        self.cycle_failures.get()
    }

    pub fn ticks_skipped(&self) -> u64 {
        self.ticks_skipped.get()
    }
}

/// Structured logger for agent events
///
/// Keeps the formatting of evaluation results out of the evaluator itself.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    /// Log one workload's rule outcomes
    pub fn log_evaluation(&self, result: &EvaluationResult) {
        let failed = result.failed_rules();
        if failed.is_empty() {
            debug!(
                event = "workload_evaluated",
                instance = %self.instance,
                workload = %result.workload,
                recent = result.recent,
                "Workload passed all rules"
            );
        } else {
            info!(
                event = "workload_evaluated",
                instance = %self.instance,
                workload = %result.workload,
                recent = result.recent,
                failed_rules = ?failed,
                "Workload failed compliance rules"
            );
        }
    }

    pub fn log_cycle_complete(&self, report: &CycleReport, elapsed: Duration) {
        info!(
            event = "cycle_completed",
            instance = %self.instance,
            observed = report.observed,
            recent = report.recent,
            not_recent = report.not_recent,
            elapsed_ms = elapsed.as_millis() as u64,
            "Collection cycle complete"
        );
    }

    pub fn log_cycle_failure(&self, scope: &NamespaceScope, err: &dyn std::error::Error) {
        error!(
            event = "cycle_failed",
            instance = %self.instance,
            namespace = %scope,
            error = %err,
            "Failed to list workloads, keeping previous metrics"
        );
    }

    pub fn log_startup(&self, version: &str, port: u16, scope: &NamespaceScope) {
        info!(
            event = "agent_started",
            instance = %self.instance,
            agent_version = %version,
            port = port,
            namespace = %scope,
            "Compliance agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Compliance agent shutting down"
        );
    }

    pub fn log_shutdown_timeout(&self, component: &str, grace: Duration) {
        warn!(
            event = "shutdown_timeout",
            instance = %self.instance,
            component = %component,
            grace_secs = grace.as_secs(),
            "Component did not stop within the grace period"
        );
    }
}

impl Default for StructuredLogger {
    fn default() -> Self {
        Self::new("unknown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Encoder, TextEncoder};

    #[test]
    fn test_agent_metrics_registration() {
        let registry = Registry::new();
        let metrics = AgentMetrics::new(&registry).unwrap();

        metrics.observe_cycle_duration(Duration::from_millis(12));
        metrics.inc_cycle_failures();
        metrics.inc_ticks_skipped();
        metrics.inc_ticks_skipped();
        metrics.set_workloads_observed(7);

        assert_eq!(metrics.cycle_failures(), 1);
        assert_eq!(metrics.ticks_skipped(), 2);

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();

        assert!(text.contains("compliance_agent_cycle_duration_seconds_bucket"));
        assert!(text.contains("compliance_agent_ticks_skipped_total 2"));
        assert!(text.contains("compliance_agent_workloads_observed 7"));
    }

    #[test]
    fn test_separate_registries_do_not_conflict() {
        assert!(AgentMetrics::new(&Registry::new()).is_ok());
        assert!(AgentMetrics::new(&Registry::new()).is_ok());
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = AgentMetrics::unregistered().unwrap();
        let clone = metrics.clone();

        clone.inc_cycle_failures();

        assert_eq!(metrics.cycle_failures(), 1);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("agent-0");
        assert_eq!(logger.instance, "agent-0");
        assert_eq!(StructuredLogger::default().instance, "unknown");
    }
}
