//! Core data models for the compliance agent

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle phase of a workload as reported by the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl WorkloadPhase {
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => WorkloadPhase::Pending,
            "Running" => WorkloadPhase::Running,
            "Succeeded" => WorkloadPhase::Succeeded,
            "Failed" => WorkloadPhase::Failed,
            _ => WorkloadPhase::Unknown,
        }
    }
}

/// Read-only snapshot of one scheduled unit, valid for a single cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub name: String,
    pub namespace: String,
    /// Image references of all containers, init containers included
    pub images: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub created_at: Option<DateTime<Utc>>,
    pub phase: WorkloadPhase,
}

impl Workload {
    /// `namespace/name`, or just the name for cluster-scoped snapshots
    pub fn key(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.namespace, self.name)
        }
    }
}

impl From<&Pod> for Workload {
    fn from(pod: &Pod) -> Self {
        let meta = &pod.metadata;

        let images = pod
            .spec
            .as_ref()
            .map(|spec| {
                spec.init_containers
                    .iter()
                    .flatten()
                    .chain(spec.containers.iter())
                    .map(|c| c.image.clone().unwrap_or_default())
                    .collect()
            })
            .unwrap_or_default();

        let phase = pod
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .map(WorkloadPhase::parse)
            .unwrap_or(WorkloadPhase::Unknown);

        Self {
            name: meta.name.clone().unwrap_or_default(),
            namespace: meta.namespace.clone().unwrap_or_default(),
            images,
            labels: meta.labels.clone().unwrap_or_default(),
            created_at: meta.creation_timestamp.as_ref().map(|t| t.0),
            phase,
        }
    }
}

/// Outcome of one rule against one workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub rule: String,
    pub passed: bool,
}

/// Result of running the whole rule set against one workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub workload: String,
    /// Outcomes in rule-set order
    pub outcomes: Vec<RuleOutcome>,
    /// Partition key for the recency gauge
    pub recent: bool,
}

impl EvaluationResult {
    pub fn outcome(&self, rule: &str) -> Option<bool> {
        self.outcomes
            .iter()
            .find(|o| o.rule == rule)
            .map(|o| o.passed)
    }

    pub fn failed_rules(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| !o.passed)
            .map(|o| o.rule.as_str())
            .collect()
    }
}
