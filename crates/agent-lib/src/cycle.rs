//! One fetch-evaluate-aggregate pass
//!
//! A cycle lists workloads, evaluates them at a single instant and publishes
//! the counts to the [`MetricRegistry`] in one atomic replace. A failed
//! listing leaves the registry untouched.

use crate::collector::{ListError, NamespaceScope, WorkloadLister};
use crate::evaluator::Evaluator;
use crate::health::{components, HealthRegistry};
use crate::models::EvaluationResult;
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::registry::{
    is_valid_metric_name, FamilyUpdate, MetricRegistry, PODS_RECENT_COUNT, WORKLOAD_RULE_RESULTS,
};
use crate::rules::{RuleConfig, RuleSet};
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Why a cycle did not publish
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("failed to list workloads in {scope}: {source}")]
    List {
        scope: NamespaceScope,
        #[source]
        source: ListError,
    },
}

/// Pass/fail tally of one rule across a cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleTally {
    pub passed: usize,
    pub failed: usize,
}

/// Summary of a successful cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub evaluated_at: DateTime<Utc>,
    pub observed: usize,
    pub recent: usize,
    pub not_recent: usize,
    /// Keyed by rule name
    pub rule_tallies: BTreeMap<String, RuleTally>,
    pub results: Vec<EvaluationResult>,
}

impl CycleReport {
    fn from_results(evaluated_at: DateTime<Utc>, results: Vec<EvaluationResult>) -> Self {
        let recent = results.iter().filter(|r| r.recent).count();

        let mut rule_tallies: BTreeMap<String, RuleTally> = BTreeMap::new();
        for outcome in results.iter().flat_map(|r| &r.outcomes) {
            let tally = rule_tallies.entry(outcome.rule.clone()).or_default();
            if outcome.passed {
                tally.passed += 1;
            } else {
                tally.failed += 1;
            }
        }

        Self {
            evaluated_at,
            observed: results.len(),
            recent,
            not_recent: results.len() - recent,
            rule_tallies,
            results,
        }
    }

    fn updates(&self, recent_metric: &str) -> Vec<FamilyUpdate> {
        let recency = FamilyUpdate::new(recent_metric)
            .with_series(&["true"], self.recent as f64)
            .with_series(&["false"], self.not_recent as f64);

        let rules = self
            .rule_tallies
            .iter()
            .fold(FamilyUpdate::new(WORKLOAD_RULE_RESULTS), |update, (rule, tally)| {
                update
                    .with_series(&[rule.as_str(), "true"], tally.passed as f64)
                    .with_series(&[rule.as_str(), "false"], tally.failed as f64)
            });

        vec![recency, rules]
    }
}

/// Executes collection cycles against a fixed set of collaborators
pub struct CollectionCycle {
    lister: Arc<dyn WorkloadLister>,
    evaluator: Evaluator,
    registry: Arc<MetricRegistry>,
    scope: NamespaceScope,
    recent_metric: String,
    metrics: AgentMetrics,
    health: Option<HealthRegistry>,
    logger: StructuredLogger,
}

impl CollectionCycle {
    pub fn scope(&self) -> &NamespaceScope {
        &self.scope
    }

    pub fn metrics(&self) -> &AgentMetrics {
        &self.metrics
    }

    /// Run one cycle at the current wall-clock instant
    pub async fn run_once(&self) -> Result<CycleReport, CycleError> {
        self.run_at(Utc::now()).await
    }

    /// Run one cycle with every rule evaluated at `now`
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<CycleReport, CycleError> {
        let start = Instant::now();

        let workloads = match self.lister.list(&self.scope).await {
            Ok(workloads) => workloads,
            Err(source) => {
                self.logger.log_cycle_failure(&self.scope, &source);
                self.metrics.inc_cycle_failures();
                if let Some(health) = &self.health {
                    health
                        .set_degraded(components::WORKLOAD_LISTER, source.to_string())
                        .await;
                }
                return Err(CycleError::List {
                    scope: self.scope.clone(),
                    source,
                });
            }
        };

        let results: Vec<EvaluationResult> = workloads
            .iter()
            .map(|w| self.evaluator.evaluate(w, now))
            .collect();
        for result in &results {
            self.logger.log_evaluation(result);
        }

        let report = CycleReport::from_results(now, results);
        self.registry.replace_all(report.updates(&self.recent_metric));

        let elapsed = start.elapsed();
        self.metrics.observe_cycle_duration(elapsed);
        self.metrics.set_workloads_observed(report.observed);
        if let Some(health) = &self.health {
            health.set_healthy(components::WORKLOAD_LISTER).await;
        }
        self.logger.log_cycle_complete(&report, elapsed);

        Ok(report)
    }
}

/// Builder for [`CollectionCycle`]
pub struct CollectionCycleBuilder {
    lister: Option<Arc<dyn WorkloadLister>>,
    registry: Option<Arc<MetricRegistry>>,
    rules: Option<Arc<RuleSet>>,
    scope: NamespaceScope,
    recent_metric: String,
    metrics: Option<AgentMetrics>,
    health: Option<HealthRegistry>,
    logger: StructuredLogger,
}

impl CollectionCycleBuilder {
    pub fn new() -> Self {
        Self {
            lister: None,
            registry: None,
            rules: None,
            scope: NamespaceScope::All,
            recent_metric: PODS_RECENT_COUNT.to_string(),
            metrics: None,
            health: None,
            logger: StructuredLogger::default(),
        }
    }

    pub fn lister(mut self, lister: Arc<dyn WorkloadLister>) -> Self {
        self.lister = Some(lister);
        self
    }

    pub fn registry(mut self, registry: Arc<MetricRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn rules(mut self, rules: Arc<RuleSet>) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn scope(mut self, scope: NamespaceScope) -> Self {
        self.scope = scope;
        self
    }

    /// Name of the recency gauge (default `pods_recent_count`)
    pub fn recent_metric(mut self, name: impl Into<String>) -> Self {
        self.recent_metric = name.into();
        self
    }

    pub fn metrics(mut self, metrics: AgentMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Build the cycle and describe its gauge families on the registry.
    ///
    /// The recency gauge must not reuse the name of a family the registry
    /// already holds, nor the per-rule family this cycle publishes.
    pub fn build(self) -> Result<CollectionCycle> {
        let lister = self
            .lister
            .ok_or_else(|| anyhow::anyhow!("Workload lister is required"))?;
        let registry = self
            .registry
            .ok_or_else(|| anyhow::anyhow!("Metric registry is required"))?;
        let rules = self
            .rules
            .unwrap_or_else(|| Arc::new(RuleSet::standard(&RuleConfig::default())));
        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => AgentMetrics::unregistered()?,
        };

        if rules.is_empty() {
            bail!("Rule set must contain at least one rule");
        }
        if !is_valid_metric_name(&self.recent_metric) {
            bail!("Invalid recency metric name '{}'", self.recent_metric);
        }
        if self.recent_metric == WORKLOAD_RULE_RESULTS
            || registry.is_described(&self.recent_metric)
        {
            bail!(
                "Recency metric name '{}' collides with an existing gauge family",
                self.recent_metric
            );
        }

        registry.describe(
            &self.recent_metric,
            "Number of pods younger (valid=true) or older (valid=false) than the recency threshold",
            &["valid"],
        );
        registry.describe(
            WORKLOAD_RULE_RESULTS,
            "Number of pods passing (valid=true) or failing (valid=false) each compliance rule",
            &["rule", "valid"],
        );

        Ok(CollectionCycle {
            lister,
            evaluator: Evaluator::new(rules),
            registry,
            scope: self.scope,
            recent_metric: self.recent_metric,
            metrics,
            health: self.health,
            logger: self.logger,
        })
    }
}

impl Default for CollectionCycleBuilder {
    fn default() -> Self {
        Self::new()
    }
}
