//! Run-result aggregation.
//!
//! Test processes push partial results for a shared run identifier; the
//! [`ResultStore`] merges them by test name and keeps a bounded number of runs
//! for the dashboard.

pub mod model;
pub mod store;

use std::time::Duration;

use thiserror::Error;

pub use self::model::{RunResult, RunSubmission, RunSummary, TestRecord};
pub use self::store::{ResultStore, SubmitOutcome};

/// Number of runs retained before the oldest are evicted.
pub const DEFAULT_CAPACITY: usize = 25;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResultError {
    #[error("invalid result: {0}")]
    InvalidPayload(String),

    #[error("result not found: {0}")]
    NotFound(String),
}

/// Ceilings used for the derived "timed out" flag. They never stop a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub per_test: Duration,
    pub per_run: Duration,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            per_test: Duration::from_secs(10 * 60),
            per_run: Duration::from_secs(30 * 60),
        }
    }
}
