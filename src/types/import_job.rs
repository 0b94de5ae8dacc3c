//! Import job types for JetStream-based background processing

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ImportIssue, ImportSummary, SpreadsheetFormat};

// ==========================================================================
// Upload
// ==========================================================================

/// Upload submitted by the web layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    /// Original client-side file name
    pub file_name: String,
    /// Base64 encoded file content
    pub content: String,
}

/// Response once the upload is staged and the job is queued
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJobSubmitResponse {
    pub job_id: Uuid,
    pub file_name: String,
    pub total_rows: u64,
    pub message: String,
}

// ==========================================================================
// Queued job
// ==========================================================================

/// An import job waiting in JetStream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedImportJob {
    pub id: Uuid,
    /// Actor identity stamped onto every inserted record
    pub uploaded_by: String,
    pub submitted_at: DateTime<Utc>,
    /// Staged upload, owned by the job until it finishes
    pub file_path: PathBuf,
    pub file_name: String,
    pub format: SpreadsheetFormat,
    pub total_rows: u64,
}

impl QueuedImportJob {
    pub fn new(
        uploaded_by: impl Into<String>,
        file_path: PathBuf,
        file_name: impl Into<String>,
        format: SpreadsheetFormat,
        total_rows: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            uploaded_by: uploaded_by.into(),
            submitted_at: Utc::now(),
            file_path,
            file_name: file_name.into(),
            format,
            total_rows,
        }
    }
}

// ==========================================================================
// Status updates
// ==========================================================================

/// Lifecycle status of an import job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ImportJobStatus {
    /// Job is waiting in queue
    #[serde(rename_all = "camelCase")]
    Queued { total_rows: u64 },
    /// Job picked up by a worker
    #[serde(rename_all = "camelCase")]
    Processing { total_rows: u64 },
    /// Job finished; row-level problems are listed in `issues`
    #[serde(rename_all = "camelCase")]
    Completed {
        archived_count: u64,
        processed_rows: u64,
        inserted_count: u64,
        skipped_count: u64,
        rejected_count: u64,
        warning_count: u64,
        issues: Vec<ImportIssue>,
        duration_ms: u64,
    },
    /// Job aborted
    #[serde(rename_all = "camelCase")]
    Failed { error: String },
}

impl From<ImportSummary> for ImportJobStatus {
    fn from(summary: ImportSummary) -> Self {
        ImportJobStatus::Completed {
            archived_count: summary.archived_count,
            processed_rows: summary.processed_rows,
            inserted_count: summary.inserted_count,
            skipped_count: summary.skipped_count,
            rejected_count: summary.rejected_count,
            warning_count: summary.warning_count,
            issues: summary.issues,
            duration_ms: summary.duration_ms,
        }
    }
}

/// Status update for an import job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJobStatusUpdate {
    pub job_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub status: ImportJobStatus,
}

impl ImportJobStatusUpdate {
    pub fn new(job_id: Uuid, status: ImportJobStatus) -> Self {
        Self {
            job_id,
            timestamp: Utc::now(),
            status,
        }
    }
}

// ==========================================================================
// Progress channel
// ==========================================================================

/// Snapshot broadcast on the progress channel.
///
/// `progress == 100.0` is the only completion signal consumers should rely on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub progress: f64,
    pub total_rows: u64,
    pub processed_rows: u64,
    pub file_name: String,
}

impl ProgressEvent {
    /// Checkpoint event; percentage rounded to two decimals and capped at 100
    pub fn checkpoint(processed_rows: u64, total_rows: u64, file_name: &str) -> Self {
        Self {
            progress: percentage(processed_rows, total_rows),
            total_rows,
            processed_rows,
            file_name: file_name.to_string(),
        }
    }

    /// Terminal event emitted once a job has finished
    pub fn completed(total_rows: u64, file_name: &str) -> Self {
        Self {
            progress: 100.0,
            total_rows,
            processed_rows: total_rows,
            file_name: file_name.to_string(),
        }
    }

    #[cfg(test)]
    pub fn is_complete(&self) -> bool {
        self.progress >= 100.0
    }
}

fn percentage(processed: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    let pct = (processed as f64 / total as f64) * 100.0;
    ((pct * 100.0).round() / 100.0).min(100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_event_uses_wire_names() {
        let event = ProgressEvent::checkpoint(50, 200, "list.csv");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["progress"], 25.0);
        assert_eq!(json["totalRows"], 200);
        assert_eq!(json["processedRows"], 50);
        assert_eq!(json["fileName"], "list.csv");
    }

    #[test]
    fn test_percentage_rounds_to_two_decimals() {
        let event = ProgressEvent::checkpoint(1, 3, "f.csv");
        assert_eq!(event.progress, 33.33);
        let event = ProgressEvent::checkpoint(2, 3, "f.csv");
        assert_eq!(event.progress, 66.67);
    }

    #[test]
    fn test_percentage_never_exceeds_hundred() {
        let event = ProgressEvent::checkpoint(120, 100, "f.csv");
        assert_eq!(event.progress, 100.0);
    }

    #[test]
    fn test_completed_event_is_complete() {
        let event = ProgressEvent::completed(42, "f.csv");
        assert!(event.is_complete());
        assert_eq!(event.processed_rows, 42);
        assert_eq!(event.total_rows, 42);
    }

    #[test]
    fn test_status_completed_serializes() {
        let summary = ImportSummary {
            processed_rows: 10,
            inserted_count: 9,
            rejected_count: 1,
            ..Default::default()
        };
        let json = serde_json::to_string(&ImportJobStatus::from(summary)).unwrap();
        assert!(json.contains("\"type\":\"completed\""));
        assert!(json.contains("insertedCount"));
        assert!(json.contains("rejectedCount"));
    }

    #[test]
    fn test_queued_job_round_trips_through_json() {
        let job = QueuedImportJob::new(
            "user-1",
            PathBuf::from("/tmp/upload.csv"),
            "list.csv",
            SpreadsheetFormat::Csv,
            12,
        );
        let json = serde_json::to_vec(&job).unwrap();
        let back: QueuedImportJob = serde_json::from_slice(&json).unwrap();
        assert_eq!(back.id, job.id);
        assert_eq!(back.format, SpreadsheetFormat::Csv);
        assert_eq!(back.total_rows, 12);
    }
}
