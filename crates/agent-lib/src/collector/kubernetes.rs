//! Kubernetes-backed workload lister

use super::{async_trait, ListError, NamespaceScope, WorkloadLister};
use crate::models::Workload;
use k8s_openapi::api::core::v1::Pod;
use kube::{api::ListParams, Api, Client};
use tracing::debug;

/// Lists pods through the Kubernetes API
#[derive(Clone)]
pub struct KubeWorkloadLister {
    client: Client,
}

impl KubeWorkloadLister {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, scope: &NamespaceScope) -> Api<Pod> {
        match scope {
            NamespaceScope::All => Api::all(self.client.clone()),
            NamespaceScope::Namespace(ns) => Api::namespaced(self.client.clone(), ns),
        }
    }
}

#[async_trait]
impl WorkloadLister for KubeWorkloadLister {
    async fn list(&self, scope: &NamespaceScope) -> Result<Vec<Workload>, ListError> {
        let pods = self.api(scope).list(&ListParams::default()).await?;
        debug!(namespace = %scope, pods = pods.items.len(), "Listed pods");

        Ok(pods.items.iter().map(Workload::from).collect())
    }
}
