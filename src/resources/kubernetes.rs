//! Managed Kubernetes clusters. Convergence depends on `status.state` only.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::ResourceRef;
use crate::client::ApiClient;
use crate::converge::{ConvergeError, Deadline, FetchError, Observer, Poller, ResourceId, Tracked};

pub const CREATE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

pub const STATE_RUNNING: &str = "running";
pub const STATE_PROVISIONING: &str = "provisioning";
pub const STATE_DEGRADED: &str = "degraded";
pub const STATE_ERROR: &str = "error";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterStatus {
    #[serde(default)]
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubernetesCluster {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub status: ClusterStatus,
}

impl Tracked for KubernetesCluster {
    const KIND: &'static str = "kubernetes_cluster";

    fn id(&self) -> ResourceId {
        ResourceId::Named(self.id.clone())
    }

    fn status(&self) -> &str {
        &self.status.state
    }
}

impl From<&KubernetesCluster> for ResourceRef {
    fn from(cluster: &KubernetesCluster) -> Self {
        ResourceRef::KubernetesCluster(cluster.id.clone())
    }
}

#[derive(Deserialize)]
struct ClusterEnvelope {
    kubernetes_cluster: KubernetesCluster,
}

impl ApiClient {
    pub async fn kubernetes_cluster(&self, id: &str) -> Result<KubernetesCluster, FetchError> {
        self.get::<ClusterEnvelope>(&format!("/kubernetes/clusters/{id}"))
            .await
            .map(|e| e.kubernetes_cluster)
    }
}

#[async_trait]
impl Observer<KubernetesCluster> for ApiClient {
    async fn fetch(&self, id: &ResourceId) -> Result<KubernetesCluster, FetchError> {
        self.kubernetes_cluster(&id.to_string()).await
    }
}

/// Wait until `cluster` reports one of `states`.
pub async fn wait_for_cluster<O>(
    poller: &Poller,
    observer: &O,
    cluster: &KubernetesCluster,
    states: &[&str],
    deadline: &Deadline,
) -> Result<KubernetesCluster, ConvergeError>
where
    O: Observer<KubernetesCluster> + ?Sized,
{
    poller
        .converge(observer, &cluster.id(), states, deadline)
        .await
}
