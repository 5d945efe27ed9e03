//! Remote Resource Client: a thin REST client for the cloud control plane.
//!
//! Only the calls the harness needs are implemented: snapshot reads for every
//! tracked resource kind, droplet actions, droplet creation and deletes for
//! cleanup. Every failure is mapped to a [`FetchError`] so the poller can
//! classify it.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ApiConfig;
use crate::converge::FetchError;

/// Environment variable holding the API bearer token.
pub const ACCESS_TOKEN_ENV: &str = "ACCESS_TOKEN";

/// Error body returned by the control plane.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(config: &ApiConfig, token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_sec))
            .user_agent(concat!("cloud-e2e/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    /// Build a client from `ACCESS_TOKEN`, which must be set.
    pub fn from_env(config: &ApiConfig) -> Result<Self> {
        let token = std::env::var(ACCESS_TOKEN_ENV)
            .ok()
            .filter(|t| !t.is_empty())
            .with_context(|| format!("{ACCESS_TOKEN_ENV} must be configured to run E2E tests"))?;
        Self::new(config, token)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v2{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T, FetchError> {
        let resp = req
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        let resp = check_status(resp).await?;
        resp.json::<T>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }

    pub(crate) async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        debug!(path, "GET");
        self.send(self.http.get(self.url(path))).await
    }

    pub(crate) async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, FetchError> {
        debug!(path, "POST");
        self.send(self.http.post(self.url(path)).json(body)).await
    }

    pub(crate) async fn delete(&self, path: &str) -> Result<(), FetchError> {
        debug!(path, "DELETE");
        let resp = self
            .http
            .delete(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        check_status(resp).await.map(|_| ())
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, FetchError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|b| b.message)
        .ok()
        .filter(|m| !m.is_empty())
        .unwrap_or(body);
    Err(FetchError::Status {
        status: status.as_u16(),
        message,
    })
}
