//! The convergence poll loop.
//!
//! Each cycle fetches a fresh snapshot, checks the status against the target
//! set and checks action settlement. Both must hold in the same cycle. Between
//! cycles the loop sleeps until the next tick of a fixed cadence, racing the
//! caller's [`Deadline`]; every remote call is raced against it as well, so
//! cancellation is observed without waiting for the next tick.
//!
//! All timing goes through `tokio::time`, so tests drive the loop on a paused
//! clock.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{settle, ConvergeError, FetchError, Observer, ResourceId, Tracked};

/// Time between two snapshot fetches.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Where a convergence wait currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Waiting for the status to enter the target set.
    Polling,
    /// Status matches; waiting for in-flight actions to finish.
    Settling,
    Converged,
    TimedOut,
    Failed,
}

impl PollState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PollState::Converged | PollState::TimedOut | PollState::Failed)
    }
}

/// Wall-clock bound on a wait, plus a cooperative cancellation signal.
#[derive(Debug, Clone)]
pub struct Deadline {
    at: Instant,
    cancel: CancellationToken,
}

impl Deadline {
    /// Expire `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Also expire when `token` is cancelled (e.g. the owning test is torn down).
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn at(&self) -> Instant {
        self.at
    }

    pub fn is_expired(&self) -> bool {
        self.cancel.is_cancelled() || Instant::now() >= self.at
    }

    /// Resolves once the deadline passes or the token is cancelled.
    pub async fn expired(&self) {
        tokio::select! {
            _ = sleep_until(self.at) => {}
            _ = self.cancel.cancelled() => {}
        }
    }

    /// Run `fut` unless the deadline fires first.
    async fn race<T>(&self, fut: impl Future<Output = T>) -> Option<T> {
        tokio::select! {
            biased;
            _ = self.expired() => None,
            out = fut => Some(out),
        }
    }
}

/// Waits for remote resources to converge.
#[derive(Debug, Clone)]
pub struct Poller {
    interval: Duration,
}

impl Default for Poller {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

/// Mutable bookkeeping of a single wait.
struct Wait<'a> {
    kind: &'static str,
    id: &'a ResourceId,
    targets: &'a [&'a str],
    started: Instant,
    state: PollState,
    last_status: Option<String>,
}

impl Wait<'_> {
    fn transition(&mut self, next: PollState) {
        if self.state != next {
            debug!(
                kind = self.kind,
                id = %self.id,
                from = ?self.state,
                to = ?next,
                "poll state changed"
            );
            self.state = next;
        }
    }

    fn timed_out(&mut self) -> ConvergeError {
        self.transition(PollState::TimedOut);
        let last_status = self
            .last_status
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        let waited = self.started.elapsed();
        warn!(
            kind = self.kind,
            id = %self.id,
            last_status = %last_status,
            waited_sec = waited.as_secs(),
            "resource never converged"
        );
        ConvergeError::Timeout {
            kind: self.kind,
            id: self.id.clone(),
            targets: self.targets.iter().map(|s| s.to_string()).collect(),
            last_status,
            waited,
        }
    }

    fn failed(&mut self, source: FetchError) -> ConvergeError {
        self.transition(PollState::Failed);
        warn!(kind = self.kind, id = %self.id, error = %source, "failed to poll resource");
        ConvergeError::FetchFailed {
            kind: self.kind,
            id: self.id.clone(),
            source,
        }
    }
}

impl Poller {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll `id` through `observer` until its status is one of `targets` and
    /// all of its actions are completed, returning the converged snapshot.
    ///
    /// Any fetch error fails the wait immediately; there is no retry inside
    /// the loop. The deadline (or cancellation) yields `Timeout`, never
    /// earlier than `deadline.at()` unless the token was cancelled.
    pub async fn converge<R, O>(
        &self,
        observer: &O,
        id: &ResourceId,
        targets: &[&str],
        deadline: &Deadline,
    ) -> Result<R, ConvergeError>
    where
        R: Tracked,
        O: Observer<R> + ?Sized,
    {
        let mut wait = Wait {
            kind: R::KIND,
            id,
            targets,
            started: Instant::now(),
            state: PollState::Polling,
            last_status: None,
        };
        info!(kind = R::KIND, id = %id, targets = ?targets, "waiting for resource to converge");

        let mut cycles: u64 = 0;
        loop {
            let cycle_start = Instant::now();
            cycles += 1;

            let resource = match deadline.race(observer.fetch(id)).await {
                None => return Err(wait.timed_out()),
                Some(Err(e)) => return Err(wait.failed(e)),
                Some(Ok(resource)) => resource,
            };
            let status_ok = targets.contains(&resource.status());
            wait.last_status = Some(resource.status().to_string());

            let settled = match deadline.race(settle::check(observer, &resource)).await {
                None => return Err(wait.timed_out()),
                Some(Err(e)) => return Err(wait.failed(e)),
                Some(Ok(settled)) => settled,
            };

            debug!(
                kind = R::KIND,
                id = %id,
                status = resource.status(),
                status_ok,
                settled,
                cycle = cycles,
                "poll cycle"
            );

            if status_ok && settled {
                wait.transition(PollState::Converged);
                info!(
                    kind = R::KIND,
                    id = %id,
                    status = resource.status(),
                    cycles,
                    elapsed_ms = wait.started.elapsed().as_millis() as u64,
                    "resource converged"
                );
                return Ok(resource);
            }
            wait.transition(if status_ok {
                PollState::Settling
            } else {
                PollState::Polling
            });

            let next_tick = cycle_start + self.interval;
            tokio::select! {
                biased;
                _ = deadline.expired() => return Err(wait.timed_out()),
                _ = sleep_until(next_tick) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::converge::{ActionStatus, PendingAction};

    #[derive(Debug, Clone)]
    struct FakeResource {
        id: u64,
        status: String,
    }

    impl Tracked for FakeResource {
        const KIND: &'static str = "fake";

        fn id(&self) -> ResourceId {
            ResourceId::Numeric(self.id)
        }

        fn status(&self) -> &str {
            &self.status
        }
    }

    /// Replays scripted statuses and action lists; the last entry repeats.
    #[derive(Default)]
    struct Script {
        statuses: Mutex<VecDeque<Result<&'static str, u16>>>,
        actions: Option<Mutex<VecDeque<Vec<ActionStatus>>>>,
        fetch_delay: Option<Duration>,
        fetches: AtomicUsize,
    }

    impl Script {
        fn statuses(statuses: &[&'static str]) -> Self {
            Self {
                statuses: Mutex::new(statuses.iter().map(|s| Ok(*s)).collect()),
                ..Self::default()
            }
        }

        fn with_actions(mut self, actions: Vec<Vec<ActionStatus>>) -> Self {
            self.actions = Some(Mutex::new(actions.into_iter().collect()));
            self
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    fn next<T: Clone>(queue: &Mutex<VecDeque<T>>) -> T {
        let mut queue = queue.lock().unwrap();
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap()
        }
    }

    #[async_trait]
    impl Observer<FakeResource> for Script {
        async fn fetch(&self, id: &ResourceId) -> Result<FakeResource, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.fetch_delay {
                tokio::time::sleep(delay).await;
            }
            let ResourceId::Numeric(id) = id else {
                panic!("fake resources use numeric ids");
            };
            match next(&self.statuses) {
                Ok(status) => Ok(FakeResource {
                    id: *id,
                    status: status.to_string(),
                }),
                Err(code) => Err(FetchError::Status {
                    status: code,
                    message: "scripted failure".to_string(),
                }),
            }
        }

        async fn pending_actions(
            &self,
            _resource: &FakeResource,
        ) -> Result<Option<Vec<PendingAction>>, FetchError> {
            Ok(self.actions.as_ref().map(|queue| {
                next(queue)
                    .into_iter()
                    .enumerate()
                    .map(|(i, status)| PendingAction {
                        id: i as u64,
                        kind: "power_off".to_string(),
                        status,
                    })
                    .collect()
            }))
        }
    }

    fn id() -> ResourceId {
        ResourceId::Numeric(1)
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_converged_returns_within_one_interval() {
        let script = Script::statuses(&["active"]).with_actions(vec![vec![]]);
        let start = Instant::now();

        let resource: FakeResource = Poller::default()
            .converge(&script, &id(), &["active"], &Deadline::after(Duration::from_secs(60)))
            .await
            .unwrap();

        assert_eq!(resource.status, "active");
        assert!(start.elapsed() < DEFAULT_POLL_INTERVAL);
        assert_eq!(script.fetches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_change_converges_on_later_cycle() {
        let script = Script::statuses(&["new", "new", "active"]);
        let start = Instant::now();

        let resource: FakeResource = Poller::default()
            .converge(&script, &id(), &["active"], &Deadline::after(Duration::from_secs(60)))
            .await
            .unwrap();

        assert_eq!(resource.status, "active");
        assert_eq!(script.fetches(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_any_target_status_is_accepted() {
        let script = Script::statuses(&["provisioning", "degraded"]);

        let resource: FakeResource = Poller::default()
            .converge(
                &script,
                &id(),
                &["running", "degraded"],
                &Deadline::after(Duration::from_secs(60)),
            )
            .await
            .unwrap();

        assert_eq!(resource.status, "degraded");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_not_early() {
        let script = Script::statuses(&["new"]);
        let start = Instant::now();
        let deadline = Deadline::after(Duration::from_secs(12));

        let err = Poller::default()
            .converge::<FakeResource, _>(&script, &id(), &["active"], &deadline)
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(start.elapsed() >= Duration::from_secs(12));
        assert!(start.elapsed() < Duration::from_secs(12) + DEFAULT_POLL_INTERVAL);
        // Fetches at t=0, 5 and 10.
        assert_eq!(script.fetches(), 3);
        match err {
            ConvergeError::Timeout { last_status, kind, .. } => {
                assert_eq!(last_status, "new");
                assert_eq!(kind, "fake");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_action_gates_convergence() {
        let script = Script::statuses(&["off"]).with_actions(vec![
            vec![ActionStatus::Completed, ActionStatus::InProgress],
            vec![ActionStatus::Completed, ActionStatus::InProgress],
            vec![ActionStatus::Completed, ActionStatus::Completed],
        ]);
        let start = Instant::now();

        let resource: FakeResource = Poller::default()
            .converge(&script, &id(), &["off"], &Deadline::after(Duration::from_secs(60)))
            .await
            .unwrap();

        assert_eq!(resource.status, "off");
        assert_eq!(script.fetches(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_errored_action_surfaces_as_timeout() {
        let script = Script::statuses(&["active"]).with_actions(vec![vec![ActionStatus::Errored]]);

        let err = Poller::default()
            .converge::<FakeResource, _>(
                &script,
                &id(),
                &["active"],
                &Deadline::after(Duration::from_secs(20)),
            )
            .await
            .unwrap_err();

        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_error_fails_immediately() {
        let script = Script {
            statuses: Mutex::new(VecDeque::from([Err(500)])),
            ..Script::default()
        };
        let start = Instant::now();

        let err = Poller::default()
            .converge::<FakeResource, _>(
                &script,
                &id(),
                &["active"],
                &Deadline::after(Duration::from_secs(60)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ConvergeError::FetchFailed { .. }));
        assert_eq!(script.fetches(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_observed_mid_interval() {
        let script = Script::statuses(&["new"]);
        let token = CancellationToken::new();
        let deadline = Deadline::after(Duration::from_secs(600)).with_cancel(token.clone());
        let start = Instant::now();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            token.cancel();
        });

        let err = Poller::default()
            .converge::<FakeResource, _>(&script, &id(), &["active"], &deadline)
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(start.elapsed(), Duration::from_secs(7));
        assert_eq!(script.fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_fetch_is_cut_by_deadline() {
        let script = Script {
            statuses: Mutex::new(VecDeque::from([Ok("active")])),
            fetch_delay: Some(Duration::from_secs(3600)),
            ..Script::default()
        };
        let start = Instant::now();

        let err = Poller::default()
            .converge::<FakeResource, _>(
                &script,
                &id(),
                &["active"],
                &Deadline::after(Duration::from_secs(30)),
            )
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(start.elapsed(), Duration::from_secs(30));
        match err {
            ConvergeError::Timeout { last_status, .. } => assert_eq!(last_status, "unknown"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_interval_sets_cadence() {
        let script = Script::statuses(&["new", "new", "new", "active"]);
        let start = Instant::now();

        let _: FakeResource = Poller::new(Duration::from_secs(1))
            .converge(&script, &id(), &["active"], &Deadline::after(Duration::from_secs(60)))
            .await
            .unwrap();

        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[test]
    fn test_terminal_states() {
        assert!(PollState::Converged.is_terminal());
        assert!(PollState::TimedOut.is_terminal());
        assert!(PollState::Failed.is_terminal());
        assert!(!PollState::Polling.is_terminal());
        assert!(!PollState::Settling.is_terminal());
    }
}
