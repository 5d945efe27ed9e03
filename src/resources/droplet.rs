//! Droplets (compute instances). The only kind with a visible action list, so
//! convergence also waits for every action to complete.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{pick, Region, ResourceRef};
use crate::client::ApiClient;
use crate::converge::{
    ConvergeError, Deadline, FetchError, Observer, PendingAction, Poller, ResourceId, Tracked,
};

pub const CREATE_TIMEOUT: Duration = Duration::from_secs(2 * 60);
pub const POWER_OFF_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const POWER_ON_TIMEOUT: Duration = Duration::from_secs(5 * 60);

pub const STATUS_NEW: &str = "new";
pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_OFF: &str = "off";

/// Images a random droplet may boot from.
pub const IMAGE_SLUGS: &[&str] = &["ubuntu-22-04-x64"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Droplet {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub size_slug: String,
    #[serde(default)]
    pub region: Option<Region>,
}

impl Tracked for Droplet {
    const KIND: &'static str = "droplet";

    fn id(&self) -> ResourceId {
        ResourceId::Numeric(self.id)
    }

    fn status(&self) -> &str {
        &self.status
    }
}

impl From<&Droplet> for ResourceRef {
    fn from(droplet: &Droplet) -> Self {
        ResourceRef::Droplet(droplet.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropletCreateRequest {
    pub name: String,
    pub region: String,
    pub size: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssh_keys: Vec<String>,
}

/// Build a create request for a random available region, one of its sizes
/// and one of [`IMAGE_SLUGS`]. `None` when no region is available.
pub fn random_create_request<R: Rng + ?Sized>(
    rng: &mut R,
    regions: &[Region],
    name: &str,
) -> Option<DropletCreateRequest> {
    let available: Vec<&Region> = regions
        .iter()
        .filter(|r| r.available && !r.sizes.is_empty())
        .collect();
    let region = *pick(rng, &available)?;
    let size = pick(rng, &region.sizes)?;
    let image = pick(rng, IMAGE_SLUGS)?;

    Some(DropletCreateRequest {
        name: name.to_string(),
        region: region.slug.clone(),
        size: size.clone(),
        image: image.to_string(),
        ssh_keys: Vec::new(),
    })
}

#[derive(Deserialize)]
struct DropletEnvelope {
    droplet: Droplet,
}

#[derive(Deserialize)]
struct ActionsEnvelope {
    actions: Vec<PendingAction>,
}

#[derive(Deserialize)]
struct ActionEnvelope {
    action: PendingAction,
}

fn droplet_id(id: &ResourceId) -> Result<u64, FetchError> {
    match id {
        ResourceId::Numeric(id) => Ok(*id),
        ResourceId::Named(name) => name
            .parse()
            .map_err(|_| FetchError::Decode(format!("droplet ids are numeric, got {name:?}"))),
    }
}

impl ApiClient {
    pub async fn droplet(&self, id: u64) -> Result<Droplet, FetchError> {
        self.get::<DropletEnvelope>(&format!("/droplets/{id}"))
            .await
            .map(|e| e.droplet)
    }

    pub async fn droplet_actions(&self, id: u64) -> Result<Vec<PendingAction>, FetchError> {
        self.get::<ActionsEnvelope>(&format!("/droplets/{id}/actions"))
            .await
            .map(|e| e.actions)
    }

    pub async fn create_droplet(&self, req: &DropletCreateRequest) -> Result<Droplet, FetchError> {
        self.post::<_, DropletEnvelope>("/droplets", req)
            .await
            .map(|e| e.droplet)
    }

    async fn droplet_action(&self, id: u64, kind: &str) -> Result<PendingAction, FetchError> {
        let body = serde_json::json!({ "type": kind });
        self.post::<_, ActionEnvelope>(&format!("/droplets/{id}/actions"), &body)
            .await
            .map(|e| e.action)
    }

    pub async fn power_off(&self, id: u64) -> Result<PendingAction, FetchError> {
        self.droplet_action(id, "power_off").await
    }

    pub async fn power_on(&self, id: u64) -> Result<PendingAction, FetchError> {
        self.droplet_action(id, "power_on").await
    }
}

#[async_trait]
impl Observer<Droplet> for ApiClient {
    async fn fetch(&self, id: &ResourceId) -> Result<Droplet, FetchError> {
        self.droplet(droplet_id(id)?).await
    }

    async fn pending_actions(
        &self,
        droplet: &Droplet,
    ) -> Result<Option<Vec<PendingAction>>, FetchError> {
        self.droplet_actions(droplet.id).await.map(Some)
    }
}

/// Wait until `droplet` reports one of `statuses` with all actions completed.
pub async fn wait_for_droplet<O>(
    poller: &Poller,
    observer: &O,
    droplet: &Droplet,
    statuses: &[&str],
    deadline: &Deadline,
) -> Result<Droplet, ConvergeError>
where
    O: Observer<Droplet> + ?Sized,
{
    poller
        .converge(observer, &droplet.id(), statuses, deadline)
        .await
}
