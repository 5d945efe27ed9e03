use std::sync::Arc;

use crate::config::DEFAULT_MAX_LOG_BYTES;
use crate::results::{ResultStore, Thresholds};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ResultStore>,
    pub thresholds: Thresholds,
    /// Body limit for log uploads.
    pub max_log_bytes: usize,
}

impl AppState {
    pub fn new(store: ResultStore, thresholds: Thresholds) -> Self {
        Self {
            store: Arc::new(store),
            thresholds,
            max_log_bytes: DEFAULT_MAX_LOG_BYTES,
        }
    }

    pub fn with_max_log_bytes(mut self, max_log_bytes: usize) -> Self {
        self.max_log_bytes = max_log_bytes;
        self
    }
}
