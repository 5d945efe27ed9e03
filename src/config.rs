//! TOML configuration for the e2e harness and its result dashboard.
//!
//! Every section falls back to compiled-in defaults, so an empty file (or no
//! file at all) yields a working configuration.  The config file path can be
//! given explicitly, via the `E2E_CONFIG` environment variable, or picked up
//! from `./e2e.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::results::Thresholds;

/// Environment variable naming the config file to load.
pub const CONFIG_ENV: &str = "E2E_CONFIG";

/// Config file looked up in the working directory when nothing else is set.
pub const LOCAL_CONFIG_FILE: &str = "e2e.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct E2eConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub results: ResultsConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl E2eConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded e2e configuration");
        Ok(config)
    }

    /// Resolve the configuration, in order:
    /// 1. `explicit`, when given. A load failure here is an error.
    /// 2. The path named by `E2E_CONFIG`.
    /// 3. `./e2e.toml`.
    /// 4. Compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "E2E_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "local config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    /// Reject values that parse but cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.poll.interval_sec == 0 {
            bail!("poll.interval_sec must be at least 1");
        }
        if self.results.capacity == 0 {
            bail!("results.capacity must be at least 1");
        }
        if self.results.max_log_bytes == 0 {
            bail!("results.max_log_bytes must be at least 1");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Result dashboard listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address and port the dashboard listens on.
    pub bind: String,
    /// Time given to in-flight requests after a shutdown signal (seconds).
    pub shutdown_grace_sec: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            shutdown_grace_sec: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Log uploads carry full verbose test output, well past axum's 2 MiB default.
pub const DEFAULT_MAX_LOG_BYTES: usize = 64 * 1024 * 1024;

/// Retention and timeout thresholds for aggregated run results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsConfig {
    /// Maximum number of runs retained; older runs are evicted past this.
    pub capacity: usize,
    /// A single test running longer than this is flagged as timed out (seconds).
    pub test_timeout_sec: u64,
    /// A run whose summed test durations exceed this is flagged as timed out (seconds).
    pub run_timeout_sec: u64,
    /// Largest accepted log upload for a single run (bytes).
    pub max_log_bytes: usize,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            capacity: crate::results::DEFAULT_CAPACITY,
            test_timeout_sec: 10 * 60,
            run_timeout_sec: 30 * 60,
            max_log_bytes: DEFAULT_MAX_LOG_BYTES,
        }
    }
}

impl ResultsConfig {
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            per_test: Duration::from_secs(self.test_timeout_sec),
            per_run: Duration::from_secs(self.run_timeout_sec),
        }
    }
}

// ---------------------------------------------------------------------------
// Poll
// ---------------------------------------------------------------------------

/// Convergence poller cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Seconds between two snapshot fetches of the same resource.
    pub interval_sec: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { interval_sec: 5 }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_sec)
    }
}

// ---------------------------------------------------------------------------
// Api
// ---------------------------------------------------------------------------

/// Remote control plane client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the cloud API (without the `/v2` prefix).
    pub base_url: String,
    /// Per-request timeout (seconds).
    pub request_timeout_sec: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.digitalocean.com".to_string(),
            request_timeout_sec: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Where a loaded config came from; only used for the `check-config` report.
pub fn describe_source(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        return PathBuf::from(env_path);
    }
    PathBuf::from(LOCAL_CONFIG_FILE)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = E2eConfig::default();

        assert_eq!(cfg.server.bind, "127.0.0.1:3000");
        assert_eq!(cfg.server.shutdown_grace_sec, 1);

        assert_eq!(cfg.results.capacity, 25);
        assert_eq!(cfg.results.test_timeout_sec, 600);
        assert_eq!(cfg.results.run_timeout_sec, 1800);
        assert_eq!(cfg.results.max_log_bytes, 64 * 1024 * 1024);
        assert!(cfg.validate().is_ok());

        assert_eq!(cfg.poll.interval(), Duration::from_secs(5));

        assert_eq!(cfg.api.base_url, "https://api.digitalocean.com");
        assert_eq!(cfg.api.request_timeout_sec, 30);

        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.logging.json);
    }

    #[test]
    fn test_parse_example_toml() {
        let toml_str = r#"
[server]
bind = "0.0.0.0:8080"
shutdown_grace_sec = 3

[results]
capacity = 10
test_timeout_sec = 60
run_timeout_sec = 120

[poll]
interval_sec = 2

[api]
base_url = "http://localhost:9000"
request_timeout_sec = 5

[logging]
level = "debug"
json = true
"#;

        let cfg: E2eConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(cfg.server.bind, "0.0.0.0:8080");
        assert_eq!(cfg.server.shutdown_grace_sec, 3);
        assert_eq!(cfg.results.capacity, 10);
        let thresholds = cfg.results.thresholds();
        assert_eq!(thresholds.per_test, Duration::from_secs(60));
        assert_eq!(thresholds.per_run, Duration::from_secs(120));
        assert_eq!(cfg.poll.interval_sec, 2);
        assert_eq!(cfg.api.base_url, "http://localhost:9000");
        assert_eq!(cfg.api.request_timeout_sec, 5);
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.logging.json);
    }

    #[test]
    fn test_zero_poll_interval_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("e2e.toml");
        std::fs::write(&path, "[poll]\ninterval_sec = 0\n").unwrap();

        let err = E2eConfig::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("poll.interval_sec"));
        assert!(E2eConfig::resolve(Some(&path)).is_err());
    }

    #[test]
    fn test_zero_limits_are_rejected() {
        let mut cfg = E2eConfig::default();
        cfg.results.max_log_bytes = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = E2eConfig::default();
        cfg.results.capacity = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
[results]
capacity = 5
"#;

        let cfg: E2eConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(cfg.results.capacity, 5);
        assert_eq!(cfg.results.test_timeout_sec, 600);
        assert_eq!(cfg.server.bind, "127.0.0.1:3000");
        assert_eq!(cfg.poll.interval_sec, 5);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("e2e.toml");
        std::fs::write(
            &path,
            r#"
[server]
bind = "0.0.0.0:9999"
"#,
        )
        .unwrap();

        let cfg = E2eConfig::load(&path).unwrap();
        assert_eq!(cfg.server.bind, "0.0.0.0:9999");

        let resolved = E2eConfig::resolve(Some(&path)).unwrap();
        assert_eq!(resolved.server.bind, "0.0.0.0:9999");
    }

    #[test]
    fn test_explicit_missing_file_errors() {
        let missing = Path::new("/nonexistent/path/e2e.toml");
        assert!(E2eConfig::load(missing).is_err());
        assert!(E2eConfig::resolve(Some(missing)).is_err());
    }

    #[test]
    fn test_malformed_file_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[results]\ncapacity = \"many\"\n").unwrap();

        assert!(E2eConfig::load(&path).is_err());
    }
}
