//! Action settlement: a resource is settled once no action on it is still
//! in flight.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{FetchError, Observer, Tracked};

/// Completion state of a remote action, as reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionStatus {
    InProgress,
    Completed,
    Errored,
    #[serde(other)]
    Unknown,
}

/// A remote record of an operation performed on a resource (power-off, resize, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    pub id: u64,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub status: ActionStatus,
}

/// Settled when every action is `Completed`; an empty list is settled.
///
/// An `Errored` action is treated like one still in progress: it holds
/// convergence back until the caller's deadline expires rather than failing
/// fast.
pub fn is_settled(actions: &[PendingAction]) -> bool {
    actions.iter().all(|a| a.status == ActionStatus::Completed)
}

/// Fetch the action list for `resource` and decide whether it is settled.
pub(crate) async fn check<R, O>(observer: &O, resource: &R) -> Result<bool, FetchError>
where
    R: Tracked,
    O: Observer<R> + ?Sized,
{
    let Some(actions) = observer.pending_actions(resource).await? else {
        return Ok(true);
    };

    for action in actions.iter().filter(|a| a.status == ActionStatus::Errored) {
        debug!(
            kind = R::KIND,
            id = %resource.id(),
            action_id = action.id,
            action = %action.kind,
            "action errored, resource will not settle"
        );
    }

    Ok(is_settled(&actions))
}
