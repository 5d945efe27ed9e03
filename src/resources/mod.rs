//! Resource kinds exercised by the e2e suites.
//!
//! Each kind implements [`Tracked`](crate::converge::Tracked) for its snapshot
//! type and [`Observer`](crate::converge::Observer) on the [`ApiClient`], and
//! exposes a `wait_for_*` helper with its own status vocabulary and deadlines.

pub mod droplet;
pub mod kubernetes;
pub mod load_balancer;

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::client::ApiClient;
use crate::converge::{FetchError, ResourceId};

pub use self::droplet::Droplet;
pub use self::kubernetes::KubernetesCluster;
pub use self::load_balancer::LoadBalancer;

/// A remote resource the harness created and must delete afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceRef {
    Droplet(u64),
    KubernetesCluster(String),
    SshKey(u64),
    Tag(String),
    LoadBalancer(String),
}

impl ResourceRef {
    pub fn kind(&self) -> &'static str {
        match self {
            ResourceRef::Droplet(_) => "droplet",
            ResourceRef::KubernetesCluster(_) => "kubernetes_cluster",
            ResourceRef::SshKey(_) => "ssh_key",
            ResourceRef::Tag(_) => "tag",
            ResourceRef::LoadBalancer(_) => "load_balancer",
        }
    }

    pub fn id(&self) -> ResourceId {
        match self {
            ResourceRef::Droplet(id) | ResourceRef::SshKey(id) => ResourceId::Numeric(*id),
            ResourceRef::KubernetesCluster(id)
            | ResourceRef::Tag(id)
            | ResourceRef::LoadBalancer(id) => ResourceId::Named(id.clone()),
        }
    }

    /// API path that deletes this resource.
    pub fn delete_path(&self) -> String {
        match self {
            ResourceRef::Droplet(id) => format!("/droplets/{id}"),
            ResourceRef::KubernetesCluster(id) => format!("/kubernetes/clusters/{id}"),
            ResourceRef::SshKey(id) => format!("/account/keys/{id}"),
            ResourceRef::Tag(name) => format!("/tags/{name}"),
            ResourceRef::LoadBalancer(id) => format!("/load_balancers/{id}"),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.kind(), self.id())
    }
}

impl ApiClient {
    /// Delete a resource. A 404 means it is already gone and counts as success.
    pub async fn delete_resource(&self, resource: &ResourceRef) -> Result<(), FetchError> {
        match self.delete(&resource.delete_path()).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }

    pub async fn regions(&self) -> Result<Vec<Region>, FetchError> {
        #[derive(Deserialize)]
        struct Envelope {
            regions: Vec<Region>,
        }
        self.get::<Envelope>("/regions").await.map(|e| e.regions)
    }
}

/// A datacenter region and the sizes it offers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub slug: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub available: bool,
    #[serde(default)]
    pub sizes: Vec<String>,
}

/// Pick a random element, `None` when the slice is empty.
pub fn pick<'a, T, R: Rng + ?Sized>(rng: &mut R, items: &'a [T]) -> Option<&'a T> {
    if items.is_empty() {
        return None;
    }
    Some(&items[rng.gen_range(0..items.len())])
}
