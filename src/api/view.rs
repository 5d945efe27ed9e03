//! HTML dashboard of retained runs.

use std::time::Duration;

use askama::Template;
use chrono::{DateTime, Utc};

use crate::results::{RunResult, Thresholds};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Template)]
#[template(path = "results_index.html")]
pub struct ResultsIndex {
    pub runs: Vec<RunView>,
}

pub struct RunView {
    pub id: String,
    pub ran_at: String,
    pub duration: String,
    pub status: &'static str,
    pub timed_out: bool,
    pub has_logs: bool,
    pub tests: Vec<TestView>,
}

pub struct TestView {
    pub name: String,
    pub status: &'static str,
    pub duration: String,
    pub timed_out: bool,
}

impl ResultsIndex {
    pub fn new(runs: &[RunResult], thresholds: &Thresholds) -> Self {
        Self {
            runs: runs.iter().map(|run| RunView::new(run, thresholds)).collect(),
        }
    }
}

impl RunView {
    fn new(run: &RunResult, thresholds: &Thresholds) -> Self {
        Self {
            id: run.id.clone(),
            ran_at: format_time(&run.ran_at),
            duration: format_duration(run.duration()),
            status: status_label(run.running(), run.failed(), false),
            timed_out: run.timed_out(thresholds),
            has_logs: run.logs.is_some(),
            tests: run
                .sorted_tests()
                .into_iter()
                .map(|t| TestView {
                    name: t.name.clone(),
                    status: status_label(t.running, t.failed, t.skipped),
                    duration: format_duration(t.duration),
                    timed_out: t.timed_out(thresholds),
                })
                .collect(),
        }
    }
}

fn status_label(running: bool, failed: bool, skipped: bool) -> &'static str {
    if running {
        "running"
    } else if failed {
        "failed"
    } else if skipped {
        "skipped"
    } else {
        "passed"
    }
}

pub fn format_time(t: &DateTime<Utc>) -> String {
    t.format(TIME_FORMAT).to_string()
}

/// Round to whole seconds and render as `1h2m3s`, `4m5s` or `6s`.
pub fn format_duration(d: Duration) -> String {
    let total = (d.as_millis() + 500) / 1000;
    let (h, m, s) = (total / 3600, (total / 60) % 60, total % 60);
    if h > 0 {
        format!("{h}h{m}m{s}s")
    } else if m > 0 {
        format!("{m}m{s}s")
    } else {
        format!("{s}s")
    }
}
