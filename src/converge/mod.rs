//! Convergence polling for remote resources.
//!
//! Every resource kind the harness touches exposes the same capability: an
//! identifier, an observable status, and (for some kinds) a list of in-flight
//! actions. The [`Poller`] is written once against the [`Tracked`] and
//! [`Observer`] traits and waits until a resource reaches one of a set of
//! target statuses with no action still running.

pub mod poller;
pub mod settle;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::poller::{Deadline, PollState, Poller, DEFAULT_POLL_INTERVAL};
pub use self::settle::{is_settled, ActionStatus, PendingAction};

/// Identifier of a remote resource. Droplets use integers, clusters and load
/// balancers use UUID strings, tags use their name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceId {
    Numeric(u64),
    Named(String),
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceId::Numeric(id) => write!(f, "{id}"),
            ResourceId::Named(id) => f.write_str(id),
        }
    }
}

impl From<u64> for ResourceId {
    fn from(id: u64) -> Self {
        ResourceId::Numeric(id)
    }
}

impl From<String> for ResourceId {
    fn from(id: String) -> Self {
        ResourceId::Named(id)
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        ResourceId::Named(id.to_string())
    }
}

/// Read-only snapshot of a remote resource.
pub trait Tracked: Send + Sync + 'static {
    /// Resource kind used in logs and error messages, e.g. `"droplet"`.
    const KIND: &'static str;

    fn id(&self) -> ResourceId;

    fn status(&self) -> &str;
}

/// Source of fresh snapshots for one resource kind.
#[async_trait]
pub trait Observer<R: Tracked>: Send + Sync {
    /// Fetch the current snapshot of the resource.
    async fn fetch(&self, id: &ResourceId) -> Result<R, FetchError>;

    /// In-flight actions on the resource, or `None` for kinds that do not
    /// expose an action list. `None` always counts as settled.
    async fn pending_actions(&self, _resource: &R) -> Result<Option<Vec<PendingAction>>, FetchError> {
        Ok(None)
    }
}

/// Failure to read remote state.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request never produced a response (connect, TLS, request timeout).
    #[error("transport error: {0}")]
    Transport(String),

    /// The control plane answered with a non-success status.
    #[error("remote returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The response body did not match the expected shape.
    #[error("malformed response: {0}")]
    Decode(String),
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::Status { status: 404, .. })
    }

    /// Whether a later retry of the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport(_) => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Decode(_) => false,
        }
    }
}

/// Terminal failure of a convergence wait.
#[derive(Debug, Error)]
pub enum ConvergeError {
    /// The deadline passed or the wait was cancelled before convergence.
    #[error("{kind} {id} never reached {targets:?} after {waited:?} (last status: {last_status})")]
    Timeout {
        kind: &'static str,
        id: ResourceId,
        targets: Vec<String>,
        last_status: String,
        waited: Duration,
    },

    /// Reading the resource failed.
    #[error("failed to fetch {kind} {id}: {source}")]
    FetchFailed {
        kind: &'static str,
        id: ResourceId,
        #[source]
        source: FetchError,
    },
}

impl ConvergeError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ConvergeError::Timeout { .. })
    }
}
