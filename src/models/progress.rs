//! Progress records emitted by bulk exports.
//!
//! The same records are written inline into the download body (one JSON
//! object per line) and folded into [`ExportProgress`] snapshots for the
//! polling endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStage {
    Preparing,
    Processing,
}

/// One inline status line.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressRecord {
    Progress {
        stage: ProgressStage,
        total: u64,
        processed: u64,
        percentage: u8,
    },
    Complete {
        total: u64,
        processed: u64,
        percentage: u8,
    },
    Error {
        message: String,
    },
}

impl ProgressRecord {
    /// Encode as a newline-terminated JSON line.
    pub fn to_line(&self) -> serde_json::Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

/// Rounded share of `processed` over `total`, in percent.
///
/// An export whose documents are all empty has nothing left to do once it
/// starts processing, so a zero total reports 100.
pub fn percentage(processed: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (processed as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExportStatus {
    Running,
    Completed,
    Failed,
}

/// Latest known state of an export, served by `GET /files/progress/{id}`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ExportProgress {
    pub progress_id: String,
    pub status: ExportStatus,
    pub stage: Option<ProgressStage>,
    pub total: u64,
    pub processed: u64,
    pub percentage: u8,
    pub message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ExportProgress {
    pub fn started(progress_id: impl Into<String>) -> Self {
        Self {
            progress_id: progress_id.into(),
            status: ExportStatus::Running,
            stage: None,
            total: 0,
            processed: 0,
            percentage: 0,
            message: None,
            updated_at: Utc::now(),
        }
    }

    /// Fold a record into the snapshot. Error records keep the last known
    /// totals so a poller can see how far the export got.
    pub fn apply(&mut self, record: &ProgressRecord) {
        match record {
            ProgressRecord::Progress {
                stage,
                total,
                processed,
                percentage,
            } => {
                self.status = ExportStatus::Running;
                self.message = None;
                self.stage = Some(*stage);
                self.total = *total;
                self.processed = *processed;
                self.percentage = *percentage;
            }
            ProgressRecord::Complete {
                total,
                processed,
                percentage,
            } => {
                self.status = ExportStatus::Completed;
                self.message = None;
                self.stage = None;
                self.total = *total;
                self.processed = *processed;
                self.percentage = *percentage;
            }
            ProgressRecord::Error { message } => {
                self.status = ExportStatus::Failed;
                self.message = Some(message.clone());
            }
        }
        self.updated_at = Utc::now();
    }

    pub fn is_finished(&self) -> bool {
        self.status != ExportStatus::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_line_is_tagged_json() {
        let record = ProgressRecord::Progress {
            stage: ProgressStage::Preparing,
            total: 42,
            processed: 0,
            percentage: 0,
        };
        let line = record.to_line().unwrap();
        assert_eq!(line.last(), Some(&b'\n'));
        let value: serde_json::Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(value["type"], "progress");
        assert_eq!(value["stage"], "preparing");
        assert_eq!(value["total"], 42);
    }

    #[test]
    fn error_line_carries_message() {
        let line = ProgressRecord::Error {
            message: "superseded by new request".into(),
        }
        .to_line()
        .unwrap();
        let text = String::from_utf8(line).unwrap();
        assert_eq!(
            text,
            "{\"type\":\"error\",\"message\":\"superseded by new request\"}\n"
        );
    }

    #[test]
    fn percentage_rounds_and_handles_empty_total() {
        assert_eq!(percentage(0, 3), 0);
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(3, 3), 100);
        assert_eq!(percentage(0, 0), 100);
    }

    #[test]
    fn snapshot_tracks_terminal_status() {
        let mut snapshot = ExportProgress::started("abc");
        snapshot.apply(&ProgressRecord::Progress {
            stage: ProgressStage::Processing,
            total: 10,
            processed: 5,
            percentage: 50,
        });
        assert!(!snapshot.is_finished());

        snapshot.apply(&ProgressRecord::Error {
            message: "boom".into(),
        });
        assert_eq!(snapshot.status, ExportStatus::Failed);
        assert_eq!(snapshot.processed, 5);
        assert_eq!(snapshot.message.as_deref(), Some("boom"));
    }

    #[test]
    fn reused_id_drops_stale_error_message() {
        let mut snapshot = ExportProgress::started("reused");
        snapshot.apply(&ProgressRecord::Error {
            message: "superseded by new request".into(),
        });
        snapshot.apply(&ProgressRecord::Progress {
            stage: ProgressStage::Processing,
            total: 4,
            processed: 2,
            percentage: 50,
        });
        assert_eq!(snapshot.status, ExportStatus::Running);
        assert_eq!(snapshot.message, None);

        snapshot.apply(&ProgressRecord::Error {
            message: "superseded by new request".into(),
        });
        snapshot.apply(&ProgressRecord::Complete {
            total: 4,
            processed: 4,
            percentage: 100,
        });
        assert_eq!(snapshot.status, ExportStatus::Completed);
        assert_eq!(snapshot.message, None);
    }
}
