use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Thresholds;

/// One test's execution summary.
///
/// Created as `running` when the test starts, then overwritten in place by the
/// reporting process once the test finishes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TestRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default)]
    pub running: bool,
    /// Elapsed wall-clock time, integer nanoseconds on the wire.
    #[serde(default, with = "duration_nanos")]
    pub duration: Duration,
}

impl TestRecord {
    /// A freshly started test.
    pub fn started(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            running: true,
            ..Self::default()
        }
    }

    /// A finished test with the given outcome.
    pub fn finished(name: impl Into<String>, failed: bool, duration: Duration) -> Self {
        Self {
            name: name.into(),
            failed,
            duration,
            ..Self::default()
        }
    }

    pub fn timed_out(&self, thresholds: &Thresholds) -> bool {
        self.duration > thresholds.per_test
    }
}

/// Body of a result submission: a possibly partial view of one run.
///
/// Each reporting process only knows about the tests it ran itself, so the
/// `tests` map is merged into whatever the store already holds for the run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSubmission {
    /// Must match the run identifier in the request path when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// When the reporting process started the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ran_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tests: HashMap<String, TestRecord>,
}

impl RunSubmission {
    /// Parse a JSON submission body. Each record's name is forced to its map
    /// key so names stay unique within a run.
    pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
        let mut submission: Self = serde_json::from_slice(body)?;
        for (key, test) in submission.tests.iter_mut() {
            if test.name != *key {
                test.name = key.clone();
            }
        }
        Ok(submission)
    }
}

/// Aggregate of one test run, possibly assembled from several submissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    /// Stable for the whole run; never changes after creation.
    pub id: String,
    /// Start time reported by the first submission (or receipt time if absent).
    pub ran_at: DateTime<Utc>,
    /// Set by the store on first receipt; governs listing order and eviction.
    pub received_at: DateTime<Utc>,
    pub tests: HashMap<String, TestRecord>,
    pub logs: Option<Bytes>,
}

impl RunResult {
    /// Build the initial record for a run the store has never seen.
    pub fn from_submission(id: String, submission: RunSubmission, now: DateTime<Utc>) -> Self {
        Self {
            id,
            ran_at: submission.ran_at.unwrap_or(now),
            received_at: now,
            tests: submission.tests,
            logs: None,
        }
    }

    /// Sum of all test durations.
    pub fn duration(&self) -> Duration {
        self.tests.values().map(|t| t.duration).sum()
    }

    pub fn running(&self) -> bool {
        self.tests.values().any(|t| t.running)
    }

    pub fn failed(&self) -> bool {
        self.tests.values().any(|t| t.failed)
    }

    pub fn timed_out(&self, thresholds: &Thresholds) -> bool {
        self.duration() > thresholds.per_run
            || self.tests.values().any(|t| t.timed_out(thresholds))
    }

    /// Tests ordered by name, for stable rendering.
    pub fn sorted_tests(&self) -> Vec<&TestRecord> {
        let mut tests: Vec<&TestRecord> = self.tests.values().collect();
        tests.sort_by(|a, b| a.name.cmp(&b.name));
        tests
    }
}

/// Serialized listing entry with the derived flags precomputed.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub id: String,
    pub ran_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    #[serde(with = "duration_nanos")]
    pub duration: Duration,
    pub failed: bool,
    pub running: bool,
    pub timed_out: bool,
    pub has_logs: bool,
    pub tests: Vec<TestSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestSummary {
    #[serde(flatten)]
    pub record: TestRecord,
    pub timed_out: bool,
}

impl RunSummary {
    pub fn new(run: &RunResult, thresholds: &Thresholds) -> Self {
        Self {
            id: run.id.clone(),
            ran_at: run.ran_at,
            received_at: run.received_at,
            duration: run.duration(),
            failed: run.failed(),
            running: run.running(),
            timed_out: run.timed_out(thresholds),
            has_logs: run.logs.is_some(),
            tests: run
                .sorted_tests()
                .into_iter()
                .map(|t| TestSummary {
                    record: t.clone(),
                    timed_out: t.timed_out(thresholds),
                })
                .collect(),
        }
    }
}

/// `Duration` as an integer count of nanoseconds.
pub mod duration_nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_nanos)
    }
}
