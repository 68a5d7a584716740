//! Workload collection from the cluster
//!
//! The collection cycle only depends on the [`WorkloadLister`] capability.
//! [`KubeWorkloadLister`] is the production implementation backed by the
//! Kubernetes API; tests supply their own listers.

mod kubernetes;

pub use kubernetes::KubeWorkloadLister;

use crate::models::Workload;
use std::fmt;
use thiserror::Error;

pub use async_trait::async_trait;

/// Which namespaces a lister should look at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceScope {
    /// Every namespace visible to the agent's credentials
    All,
    Namespace(String),
}

impl NamespaceScope {
    /// An empty (or blank) string selects all namespaces
    pub fn parse(namespace: &str) -> Self {
        let namespace = namespace.trim();
        if namespace.is_empty() {
            NamespaceScope::All
        } else {
            NamespaceScope::Namespace(namespace.to_string())
        }
    }
}

impl fmt::Display for NamespaceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamespaceScope::All => f.write_str("<all>"),
            NamespaceScope::Namespace(ns) => f.write_str(ns),
        }
    }
}

/// Failure to obtain the workload list
#[derive(Debug, Error)]
pub enum ListError {
    #[error("kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    #[error("workload source unavailable: {0}")]
    Unavailable(String),
}

/// Capability to enumerate the current workloads
#[async_trait]
pub trait WorkloadLister: Send + Sync {
    async fn list(&self, scope: &NamespaceScope) -> Result<Vec<Workload>, ListError>;
}
