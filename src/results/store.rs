//! In-memory, bounded store of run results.
//!
//! All reads and writes go through a single `tokio::sync::RwLock` around the
//! whole map. An upsert (insert or merge) and the eviction pass that follows
//! it happen inside one write-lock critical section, so readers never see a
//! half-merged run or a store above capacity.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{ResultError, RunResult, RunSubmission, DEFAULT_CAPACITY};

/// What a submission did to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    /// `true` when the run identifier was new.
    pub created: bool,
    /// Runs dropped by the eviction pass, oldest last.
    pub evicted: Vec<String>,
}

struct StoredRun {
    /// Insertion order; breaks ties between identical receipt timestamps.
    seq: u64,
    run: RunResult,
}

struct StoreInner {
    runs: HashMap<String, StoredRun>,
    next_seq: u64,
}

impl StoreInner {
    /// Newest first.
    fn ordered(&self) -> Vec<&StoredRun> {
        let mut runs: Vec<&StoredRun> = self.runs.values().collect();
        runs.sort_by(|a, b| {
            b.run
                .received_at
                .cmp(&a.run.received_at)
                .then(b.seq.cmp(&a.seq))
        });
        runs
    }
}

/// Process-wide store of aggregated run results.
pub struct ResultStore {
    inner: RwLock<StoreInner>,
    capacity: usize,
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ResultStore {
    /// Create an empty store retaining at most `capacity` runs.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                runs: HashMap::new(),
                next_seq: 0,
            }),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert a new run or merge into an existing one.
    ///
    /// For a known run only the test map is merged, test by test, overwriting
    /// entries with the same name. The run's identity and timestamps are never
    /// touched by later submissions.
    pub async fn submit(
        &self,
        run_id: &str,
        submission: RunSubmission,
    ) -> Result<SubmitOutcome, ResultError> {
        self.submit_at(run_id, submission, Utc::now()).await
    }

    async fn submit_at(
        &self,
        run_id: &str,
        submission: RunSubmission,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome, ResultError> {
        if run_id.trim().is_empty() {
            return Err(ResultError::InvalidPayload("empty run id".to_string()));
        }
        if let Some(body_id) = submission.id.as_deref() {
            if body_id != run_id {
                return Err(ResultError::InvalidPayload(format!(
                    "run id mismatch: path {run_id}, body {body_id}"
                )));
            }
        }

        let mut inner = self.inner.write().await;
        let seq = inner.next_seq;

        let created = match inner.runs.entry(run_id.to_string()) {
            Entry::Occupied(mut existing) => {
                let tests = &mut existing.get_mut().run.tests;
                for (name, test) in submission.tests {
                    tests.insert(name, test);
                }
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(StoredRun {
                    seq,
                    run: RunResult::from_submission(run_id.to_string(), submission, now),
                });
                true
            }
        };
        if created {
            inner.next_seq += 1;
        }

        let evicted = self.evict(&mut inner);

        if created {
            info!(run_id = %run_id, runs = inner.runs.len(), "registered new run");
        } else {
            debug!(run_id = %run_id, "merged run result");
        }
        if !evicted.is_empty() {
            info!(count = evicted.len(), evicted = ?evicted, "evicted old runs");
        }

        Ok(SubmitOutcome { created, evicted })
    }

    /// Drop everything but the newest `capacity` runs, regardless of state.
    fn evict(&self, inner: &mut StoreInner) -> Vec<String> {
        if inner.runs.len() <= self.capacity {
            return Vec::new();
        }

        let evicted: Vec<String> = inner
            .ordered()
            .into_iter()
            .skip(self.capacity)
            .map(|stored| stored.run.id.clone())
            .collect();

        for id in &evicted {
            inner.runs.remove(id);
        }
        evicted
    }

    /// Replace the log blob of a known run. Last write wins.
    pub async fn attach_logs(&self, run_id: &str, logs: Bytes) -> Result<(), ResultError> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .runs
            .get_mut(run_id)
            .ok_or_else(|| ResultError::NotFound(run_id.to_string()))?;

        debug!(run_id = %run_id, bytes = logs.len(), "attached run logs");
        stored.run.logs = Some(logs);
        Ok(())
    }

    /// Snapshot of all retained runs, most recently received first.
    pub async fn list(&self) -> Vec<RunResult> {
        let inner = self.inner.read().await;
        inner
            .ordered()
            .into_iter()
            .map(|stored| stored.run.clone())
            .collect()
    }

    /// Snapshot of a single run.
    pub async fn get(&self, run_id: &str) -> Option<RunResult> {
        let inner = self.inner.read().await;
        inner.runs.get(run_id).map(|stored| stored.run.clone())
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.runs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
