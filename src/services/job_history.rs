//! Import job history
//!
//! Keeps the most recent import outcomes in memory and mirrors them to a
//! JSON file under the logs directory so they survive worker restarts.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::types::{ImportIssue, ImportSummary, QueuedImportJob};

const MAX_HISTORY_SIZE: usize = 100;
const HISTORY_FILE_NAME: &str = "import-history.json";
/// Issues kept per history entry; the full list went out with the status update
const ISSUES_PER_ENTRY: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportOutcome {
    Completed,
    Failed,
}

/// One finished import
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportHistoryEntry {
    pub id: Uuid,
    pub uploaded_by: String,
    pub file_name: String,
    pub status: ImportOutcome,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub total_rows: u64,
    pub processed_rows: u64,
    pub inserted_count: u64,
    pub rejected_count: u64,
    pub archived_count: u64,
    pub error: Option<String>,
    #[serde(default)]
    pub issues: Vec<ImportIssue>,
}

/// Filter for `lmt.jobs.history`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHistoryRequest {
    pub limit: Option<usize>,
    pub status: Option<ImportOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHistoryResponse {
    pub jobs: Vec<ImportHistoryEntry>,
    pub total: usize,
}

pub struct JobHistoryService {
    history: RwLock<VecDeque<ImportHistoryEntry>>,
    file: Option<PathBuf>,
}

impl JobHistoryService {
    /// History persisted at `file`, preloaded from it when present
    pub fn open(file: PathBuf) -> Self {
        let mut deque = VecDeque::with_capacity(MAX_HISTORY_SIZE);
        if let Some(loaded) = load_from_disk(&file) {
            deque.extend(loaded.into_iter().take(MAX_HISTORY_SIZE));
            info!("Loaded {} import history entries from disk", deque.len());
        }
        Self {
            history: RwLock::new(deque),
            file: Some(file),
        }
    }

    /// History that is never written to disk
    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self {
            history: RwLock::new(VecDeque::with_capacity(MAX_HISTORY_SIZE)),
            file: None,
        }
    }

    pub fn record_completed(&self, job: &QueuedImportJob, summary: &ImportSummary) {
        let completed_at = Utc::now();
        self.add_entry(ImportHistoryEntry {
            id: job.id,
            uploaded_by: job.uploaded_by.clone(),
            file_name: job.file_name.clone(),
            status: ImportOutcome::Completed,
            submitted_at: job.submitted_at,
            completed_at,
            duration_ms: summary.duration_ms,
            total_rows: job.total_rows,
            processed_rows: summary.processed_rows,
            inserted_count: summary.inserted_count,
            rejected_count: summary.rejected_count,
            archived_count: summary.archived_count,
            error: None,
            issues: summary.leading_issues(ISSUES_PER_ENTRY),
        });
    }

    pub fn record_failed(&self, job: &QueuedImportJob, started_at: DateTime<Utc>, error: String) {
        let completed_at = Utc::now();
        self.add_entry(ImportHistoryEntry {
            id: job.id,
            uploaded_by: job.uploaded_by.clone(),
            file_name: job.file_name.clone(),
            status: ImportOutcome::Failed,
            submitted_at: job.submitted_at,
            completed_at,
            duration_ms: (completed_at - started_at).num_milliseconds().max(0) as u64,
            total_rows: job.total_rows,
            processed_rows: 0,
            inserted_count: 0,
            rejected_count: 0,
            archived_count: 0,
            error: Some(error),
            issues: Vec::new(),
        });
    }

    fn add_entry(&self, entry: ImportHistoryEntry) {
        let mut history = self.history.write();
        if history.len() >= MAX_HISTORY_SIZE {
            history.pop_back();
        }
        history.push_front(entry);

        if let Some(file) = &self.file {
            save_to_disk(file, &history);
        }
    }

    /// Most recent entries first
    pub fn get_recent(&self, req: &JobHistoryRequest) -> JobHistoryResponse {
        let history = self.history.read();
        let jobs: Vec<ImportHistoryEntry> = history
            .iter()
            .filter(|j| req.status.map_or(true, |s| j.status == s))
            .take(req.limit.unwrap_or(MAX_HISTORY_SIZE))
            .cloned()
            .collect();

        JobHistoryResponse {
            total: jobs.len(),
            jobs,
        }
    }
}

fn load_from_disk(path: &Path) -> Option<Vec<ImportHistoryEntry>> {
    if !path.exists() {
        return None;
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| warn!("Failed to read import history file: {}", e))
        .ok()?;
    serde_json::from_str(&content)
        .map_err(|e| warn!("Failed to parse import history file: {}", e))
        .ok()
}

fn save_to_disk(path: &Path, history: &VecDeque<ImportHistoryEntry>) {
    if let Some(dir) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!("Failed to create import history directory: {}", e);
            return;
        }
    }
    match serde_json::to_string_pretty(history) {
        Ok(json) => {
            if let Err(e) = std::fs::write(path, json) {
                warn!("Failed to write import history file: {}", e);
            }
        }
        Err(e) => warn!("Failed to serialize import history: {}", e),
    }
}

fn history_file() -> PathBuf {
    let logs_dir = std::env::var("LOGS_DIR").unwrap_or_else(|_| "logs".to_string());
    Path::new(&logs_dir).join(HISTORY_FILE_NAME)
}

/// Process-wide history shared by the import processor and the history handler
pub static JOB_HISTORY: Lazy<JobHistoryService> = Lazy::new(|| JobHistoryService::open(history_file()));

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SpreadsheetFormat;

    fn job(file_name: &str) -> QueuedImportJob {
        QueuedImportJob::new(
            "user-1",
            PathBuf::from("/tmp/x.csv"),
            file_name,
            SpreadsheetFormat::Csv,
            10,
        )
    }

    fn summary() -> ImportSummary {
        let mut summary = ImportSummary {
            processed_rows: 10,
            inserted_count: 8,
            rejected_count: 2,
            archived_count: 40,
            duration_ms: 1200,
            ..ImportSummary::default()
        };
        for row in 1..=30 {
            summary.push_issue(ImportIssue::error(row, "area", "The area field is required.", None));
        }
        summary
    }

    #[test]
    fn test_record_completed_keeps_accounting() {
        let service = JobHistoryService::in_memory();
        let job = job("list.csv");
        service.record_completed(&job, &summary());

        let history = service.get_recent(&JobHistoryRequest::default());
        assert_eq!(history.total, 1);
        let entry = &history.jobs[0];
        assert_eq!(entry.id, job.id);
        assert_eq!(entry.status, ImportOutcome::Completed);
        assert_eq!(entry.inserted_count, 8);
        assert_eq!(entry.archived_count, 40);
        assert_eq!(entry.issues.len(), ISSUES_PER_ENTRY);
    }

    #[test]
    fn test_record_failed_job() {
        let service = JobHistoryService::in_memory();
        service.record_failed(&job("bad.csv"), Utc::now(), "database error".to_string());

        let history = service.get_recent(&JobHistoryRequest::default());
        assert_eq!(history.jobs[0].status, ImportOutcome::Failed);
        assert_eq!(history.jobs[0].error.as_deref(), Some("database error"));
    }

    #[test]
    fn test_history_limit_and_order() {
        let service = JobHistoryService::in_memory();
        for i in 0..150 {
            service.record_completed(&job(&format!("file-{}.csv", i)), &ImportSummary::default());
        }

        let history = service.get_recent(&JobHistoryRequest::default());
        assert_eq!(history.jobs.len(), MAX_HISTORY_SIZE);
        assert_eq!(history.jobs[0].file_name, "file-149.csv");
    }

    #[test]
    fn test_filter_by_status_and_limit() {
        let service = JobHistoryService::in_memory();
        service.record_completed(&job("a.csv"), &ImportSummary::default());
        service.record_failed(&job("b.csv"), Utc::now(), "x".to_string());
        service.record_completed(&job("c.csv"), &ImportSummary::default());

        let completed = service.get_recent(&JobHistoryRequest {
            limit: None,
            status: Some(ImportOutcome::Completed),
        });
        assert_eq!(completed.total, 2);

        let latest = service.get_recent(&JobHistoryRequest {
            limit: Some(1),
            status: None,
        });
        assert_eq!(latest.jobs[0].file_name, "c.csv");
    }

    #[test]
    fn test_history_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("logs").join(HISTORY_FILE_NAME);

        let service = JobHistoryService::open(file.clone());
        service.record_completed(&job("kept.csv"), &summary());
        drop(service);

        let reopened = JobHistoryService::open(file);
        let history = reopened.get_recent(&JobHistoryRequest::default());
        assert_eq!(history.total, 1);
        assert_eq!(history.jobs[0].file_name, "kept.csv");
    }
}
