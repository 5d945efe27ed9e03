//! Test-side harness context.
//!
//! A [`TestContext`] carries everything an e2e test needs: the API client, a
//! seeded RNG for picking regions and sizes, the convergence poller, and the
//! bookkeeping that reports per-test results to the dashboard. Several test
//! processes can share one run by exporting the same `TEST_ID`; the dashboard
//! merges their partial reports.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use reqwest::StatusCode;
use tracing::{info, warn};

use crate::client::ApiClient;
use crate::config::E2eConfig;
use crate::converge::Poller;
use crate::resources::ResourceRef;
use crate::results::{RunSubmission, TestRecord};

pub const TEST_ID_ENV: &str = "TEST_ID";
pub const SEED_ENV: &str = "SEED";
pub const SERVER_ADDR_ENV: &str = "E2E_SERVER_ADDR";

/// Inputs for a [`TestContext`], usually read from the environment.
#[derive(Debug, Clone, Default)]
pub struct ContextSettings {
    /// Shared run identifier; a fresh UUID when absent.
    pub run_id: Option<String>,
    /// RNG seed; the current unix time when absent.
    pub seed: Option<u64>,
    /// `host:port` of the result dashboard; reporting is off when absent.
    pub server_addr: Option<String>,
    pub poll_interval: Option<Duration>,
}

impl ContextSettings {
    /// Read `TEST_ID`, `SEED` and `E2E_SERVER_ADDR`. An unparseable seed is an error.
    pub fn from_env(config: &E2eConfig) -> Result<Self> {
        let non_empty = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        let seed = non_empty(SEED_ENV)
            .map(|raw| raw.parse::<u64>().with_context(|| format!("invalid test seed: {raw}")))
            .transpose()?;

        Ok(Self {
            run_id: non_empty(TEST_ID_ENV),
            seed,
            server_addr: non_empty(SERVER_ADDR_ENV),
            poll_interval: Some(config.poll.interval()),
        })
    }
}

/// Outcome of a finished test.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestOutcome {
    pub failed: bool,
    pub skipped: bool,
}

impl TestOutcome {
    pub fn passed() -> Self {
        Self::default()
    }

    pub fn failed() -> Self {
        Self {
            failed: true,
            skipped: false,
        }
    }

    pub fn skipped() -> Self {
        Self {
            failed: false,
            skipped: true,
        }
    }
}

/// Handle for a running test, returned by [`TestContext::start_test`].
#[derive(Debug)]
#[must_use = "pass the guard to TestContext::finish_test"]
pub struct TestGuard {
    name: String,
    started: Instant,
}

impl TestGuard {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Posts run results to the dashboard.
#[derive(Debug, Clone)]
struct Reporter {
    http: reqwest::Client,
    base_url: String,
}

impl Reporter {
    fn new(addr: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build reporter HTTP client")?;
        let base_url = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{addr}")
        };
        Ok(Self { http, base_url })
    }

    async fn post_result(&self, run_id: &str, submission: &RunSubmission) -> Result<()> {
        let resp = self
            .http
            .post(format!("{}/api/results/{run_id}", self.base_url))
            .json(submission)
            .send()
            .await?;
        if resp.status() != StatusCode::ACCEPTED {
            bail!("error posting result: {}", resp.status());
        }
        Ok(())
    }

    async fn post_logs(&self, run_id: &str, logs: Bytes) -> Result<()> {
        let resp = self
            .http
            .post(format!("{}/api/results/{run_id}/logs", self.base_url))
            .body(logs)
            .send()
            .await?;
        if resp.status() != StatusCode::ACCEPTED {
            bail!("error posting logs: {}", resp.status());
        }
        Ok(())
    }
}

pub struct TestContext {
    run_id: String,
    ran_at: DateTime<Utc>,
    seed: u64,
    rng: Mutex<StdRng>,
    tests: Mutex<HashMap<String, TestRecord>>,
    client: ApiClient,
    poller: Poller,
    reporter: Option<Reporter>,
}

impl TestContext {
    pub fn new(settings: ContextSettings, client: ApiClient) -> Result<Self> {
        let seed = settings.seed.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs()
        });
        let reporter = settings.server_addr.as_deref().map(Reporter::new).transpose()?;
        let poller = settings
            .poll_interval
            .filter(|interval| !interval.is_zero())
            .map(Poller::new)
            .unwrap_or_default();

        Ok(Self {
            run_id: settings
                .run_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            ran_at: Utc::now(),
            seed,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            tests: Mutex::new(HashMap::new()),
            client,
            poller,
            reporter,
        })
    }

    /// Build a context from `config` and the environment. Fails without `ACCESS_TOKEN`.
    pub fn from_env(config: &E2eConfig) -> Result<Self> {
        let settings = ContextSettings::from_env(config)?;
        let client = ApiClient::from_env(&config.api)?;
        let ctx = Self::new(settings, client)?;
        info!(run_id = %ctx.run_id, seed = ctx.seed, "initialized test context");
        Ok(ctx)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    /// Run `f` with exclusive access to the seeded RNG.
    pub fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut rng)
    }

    /// Snapshot of the local view of this run.
    pub fn submission(&self) -> RunSubmission {
        let tests = self.tests.lock().unwrap_or_else(|e| e.into_inner());
        RunSubmission {
            id: Some(self.run_id.clone()),
            ran_at: Some(self.ran_at),
            tests: tests.clone(),
        }
    }

    /// Register `name` as running and report it.
    pub async fn start_test(&self, name: &str) -> TestGuard {
        {
            let mut tests = self.tests.lock().unwrap_or_else(|e| e.into_inner());
            tests
                .entry(name.to_string())
                .or_insert_with(|| TestRecord::started(name));
        }
        self.report().await;

        TestGuard {
            name: name.to_string(),
            started: Instant::now(),
        }
    }

    /// Record the outcome and duration of a test and report it.
    pub async fn finish_test(&self, guard: TestGuard, outcome: TestOutcome) {
        let duration = guard.started.elapsed();
        {
            let mut tests = self.tests.lock().unwrap_or_else(|e| e.into_inner());
            let record = tests
                .entry(guard.name.clone())
                .or_insert_with(|| TestRecord::started(guard.name.as_str()));
            record.duration = duration;
            record.running = false;
            record.failed = outcome.failed;
            record.skipped = outcome.skipped;
        }
        info!(
            test = %guard.name,
            failed = outcome.failed,
            skipped = outcome.skipped,
            duration_ms = duration.as_millis() as u64,
            "test finished"
        );
        self.report().await;
    }

    /// Push the current run to the dashboard. Failures are logged and ignored.
    pub async fn report(&self) {
        let Some(reporter) = &self.reporter else {
            return;
        };
        if let Err(e) = reporter.post_result(&self.run_id, &self.submission()).await {
            warn!(run_id = %self.run_id, error = %e, "failed to post result");
        }
    }

    /// Attach raw logs to this run on the dashboard.
    pub async fn upload_logs(&self, logs: impl Into<Bytes>) -> Result<()> {
        match &self.reporter {
            Some(reporter) => reporter.post_logs(&self.run_id, logs.into()).await,
            None => Ok(()),
        }
    }

    /// Delete a resource created by a test. Failures are logged, not raised.
    pub async fn cleanup(&self, resource: impl Into<ResourceRef>) {
        let resource = resource.into();
        info!(resource = %resource, "attempting to cleanup");
        if let Err(e) = self.client.delete_resource(&resource).await {
            warn!(resource = %resource, error = %e, "failed to cleanup");
        }
    }
}
