//! In-memory progress snapshots served by `GET /files/progress/{id}`.

use crate::models::progress::{ExportProgress, ProgressRecord};
use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
pub struct ProgressRegistry {
    entries: Arc<DashMap<String, ExportProgress>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new export under `progress_id`, replacing any previous
    /// snapshot with the same id.
    pub fn start(&self, progress_id: &str) {
        self.entries
            .insert(progress_id.to_string(), ExportProgress::started(progress_id));
    }

    pub fn publish(&self, progress_id: &str, record: &ProgressRecord) {
        self.entries
            .entry(progress_id.to_string())
            .or_insert_with(|| ExportProgress::started(progress_id))
            .apply(record);
    }

    pub fn get(&self, progress_id: &str) -> Option<ExportProgress> {
        self.entries.get(progress_id).map(|entry| entry.clone())
    }

    /// Drop finished snapshots not updated within `retention`. Running
    /// exports are always kept.
    pub fn prune(&self, retention: Duration) -> usize {
        let cutoff = Utc::now() - retention;
        let before = self.entries.len();
        self.entries
            .retain(|_, progress| !(progress.is_finished() && progress.updated_at < cutoff));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
