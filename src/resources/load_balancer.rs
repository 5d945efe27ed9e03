//! Load balancers. Convergence depends on `status` only.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::ResourceRef;
use crate::client::ApiClient;
use crate::converge::{ConvergeError, Deadline, FetchError, Observer, Poller, ResourceId, Tracked};

pub const CREATE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const UPDATE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

pub const STATUS_NEW: &str = "new";
pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_ERRORED: &str = "errored";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingRule {
    pub entry_protocol: String,
    pub entry_port: u16,
    pub target_protocol: String,
    pub target_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub forwarding_rules: Vec<ForwardingRule>,
    #[serde(default)]
    pub droplet_ids: Vec<u64>,
    #[serde(default)]
    pub tag: String,
}

impl Tracked for LoadBalancer {
    const KIND: &'static str = "load_balancer";

    fn id(&self) -> ResourceId {
        ResourceId::Named(self.id.clone())
    }

    fn status(&self) -> &str {
        &self.status
    }
}

impl From<&LoadBalancer> for ResourceRef {
    fn from(lb: &LoadBalancer) -> Self {
        ResourceRef::LoadBalancer(lb.id.clone())
    }
}

#[derive(Deserialize)]
struct LoadBalancerEnvelope {
    load_balancer: LoadBalancer,
}

impl ApiClient {
    pub async fn load_balancer(&self, id: &str) -> Result<LoadBalancer, FetchError> {
        self.get::<LoadBalancerEnvelope>(&format!("/load_balancers/{id}"))
            .await
            .map(|e| e.load_balancer)
    }
}

#[async_trait]
impl Observer<LoadBalancer> for ApiClient {
    async fn fetch(&self, id: &ResourceId) -> Result<LoadBalancer, FetchError> {
        self.load_balancer(&id.to_string()).await
    }
}

/// Wait until `lb` reports one of `statuses`.
pub async fn wait_for_load_balancer<O>(
    poller: &Poller,
    observer: &O,
    lb: &LoadBalancer,
    statuses: &[&str],
    deadline: &Deadline,
) -> Result<LoadBalancer, ConvergeError>
where
    O: Observer<LoadBalancer> + ?Sized,
{
    poller.converge(observer, &lb.id(), statuses, deadline).await
}

#[cfg(test)]
mod tests {
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    use super::*;
    use crate::client::fake;

    fn lb(id: &str) -> LoadBalancer {
        LoadBalancer {
            id: id.to_string(),
            name: String::new(),
            status: STATUS_NEW.to_string(),
            ip: String::new(),
            forwarding_rules: Vec::new(),
            droplet_ids: Vec::new(),
            tag: String::new(),
        }
    }

    #[test]
    fn test_decode_forwarding_rules() {
        let lb: LoadBalancer = serde_json::from_value(json!({
            "id": "lb-1",
            "name": "e2e-lb",
            "status": "active",
            "forwarding_rules": [
                { "entry_protocol": "http", "entry_port": 80, "target_protocol": "http", "target_port": 80 }
            ],
            "droplet_ids": [12]
        }))
        .unwrap();

        assert_eq!(lb.status(), STATUS_ACTIVE);
        assert_eq!(lb.forwarding_rules[0].target_port, 80);
        assert_eq!(lb.droplet_ids, vec![12]);
    }

    #[tokio::test]
    async fn test_errored_load_balancer_times_out() {
        let router = Router::new().route(
            "/v2/load_balancers/lb-1",
            get(|| async { Json(json!({ "load_balancer": { "id": "lb-1", "status": "errored" } })) }),
        );
        let client = fake::serve(router).await;

        let err = wait_for_load_balancer(
            &Poller::new(Duration::from_millis(10)),
            &client,
            &lb("lb-1"),
            &[STATUS_ACTIVE],
            &Deadline::after(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();

        match err {
            ConvergeError::Timeout { kind, last_status, .. } => {
                assert_eq!(kind, "load_balancer");
                assert_eq!(last_status, STATUS_ERRORED);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
