//! Core library of the pod compliance agent
//!
//! This crate provides:
//! - Compliance rules and the per-workload evaluator
//! - A concurrency-safe gauge registry with atomic snapshot replacement
//! - Workload listing from the Kubernetes API
//! - The collection cycle and its periodic scheduler
//! - Supervision and ordered shutdown of the scheduler and HTTP server
//! - The metrics/health HTTP endpoint and agent observability

pub mod collector;
pub mod cycle;
pub mod evaluator;
pub mod exposition;
pub mod health;
pub mod lifecycle;
pub mod models;
pub mod observability;
pub mod registry;
pub mod rules;
pub mod scheduler;

pub use collector::{KubeWorkloadLister, ListError, NamespaceScope, WorkloadLister};
pub use cycle::{CollectionCycle, CollectionCycleBuilder, CycleError, CycleReport};
pub use evaluator::Evaluator;
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use lifecycle::{AgentExit, AgentTasks, ShutdownReport};
pub use models::*;
pub use observability::{AgentMetrics, StructuredLogger};
pub use registry::{FamilyUpdate, MetricRegistry, MetricSnapshot, SnapshotCollector};
pub use rules::{Rule, RuleConfig, RuleSet};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerHandle, SchedulerState};
