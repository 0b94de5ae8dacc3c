//! Background import job
//!
//! One job owns one staged upload. The run goes
//! `Queued -> Archiving -> Importing -> Finalizing -> Completed | Failed`;
//! the staged file is removed on every exit path.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::error::ImportError;
use crate::services::chunked_importer::{ChunkedImporter, ImportSettings};
use crate::services::import_translator::ImportTranslator;
use crate::services::memory_guard::MemoryProbe;
use crate::services::progress::{ProgressPublisher, ProgressReporter};
use crate::services::record_store::RecordStore;
use crate::services::spreadsheet_reader::count_data_rows;
use crate::types::{ImportSummary, QueuedImportJob};

/// Stage of a running import, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStage {
    Queued,
    Archiving,
    Importing,
    Finalizing,
    Completed,
    Failed,
}

impl fmt::Display for ImportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImportStage::Queued => "queued",
            ImportStage::Archiving => "archiving",
            ImportStage::Importing => "importing",
            ImportStage::Finalizing => "finalizing",
            ImportStage::Completed => "completed",
            ImportStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Staged upload removed when dropped
pub struct TempUpload {
    path: PathBuf,
}

impl TempUpload {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Disarm the guard and hand the file over to a later owner
    pub fn keep(mut self) -> PathBuf {
        std::mem::take(&mut self.path)
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        if self.path.as_os_str().is_empty() {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed staged upload {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove staged upload {}: {}", self.path.display(), e),
        }
    }
}

/// Runs queued import jobs against a store
#[derive(Clone)]
pub struct ImportJobRunner {
    store: Arc<dyn RecordStore>,
    publisher: Arc<dyn ProgressPublisher>,
    probe: Arc<dyn MemoryProbe>,
    settings: ImportSettings,
}

impl ImportJobRunner {
    pub fn new(
        store: Arc<dyn RecordStore>,
        publisher: Arc<dyn ProgressPublisher>,
        probe: Arc<dyn MemoryProbe>,
        settings: ImportSettings,
    ) -> Self {
        Self {
            store,
            publisher,
            probe,
            settings,
        }
    }

    /// Run one job to completion. Errors are logged and returned so the
    /// queue consumer can settle the message.
    pub async fn handle(&self, job: &QueuedImportJob) -> Result<ImportSummary, ImportError> {
        let upload = TempUpload::new(&job.file_path);
        let started = Instant::now();
        log_stage(job, ImportStage::Queued);

        match self.run(job, upload.path()).await {
            Ok(mut summary) => {
                summary.duration_ms = started.elapsed().as_millis() as u64;
                log_stage(job, ImportStage::Completed);
                Ok(summary)
            }
            Err(e) => {
                log_stage(job, ImportStage::Failed);
                error!("Import job {} ('{}') failed: {:#}", job.id, job.file_name, e);
                Err(e)
            }
        }
    }

    async fn run(&self, job: &QueuedImportJob, path: &Path) -> Result<ImportSummary, ImportError> {
        if job.total_rows == 0 {
            return Err(ImportError::NoData(job.file_name.clone()));
        }

        // Read the whole file once before archival so an unreadable or
        // emptied upload leaves the active generation in place
        let total_rows = count_data_rows(path.to_path_buf(), job.format).await?;
        if total_rows == 0 {
            return Err(ImportError::NoData(job.file_name.clone()));
        }
        if total_rows != job.total_rows {
            warn!(
                "Import job {}: file now has {} data rows, {} were counted at upload",
                job.id, total_rows, job.total_rows
            );
        }

        log_stage(job, ImportStage::Archiving);
        let archived = self.store.archive_active().await?;
        info!("Archived {} previously active records", archived);

        log_stage(job, ImportStage::Importing);
        let importer = ChunkedImporter::new(
            self.store.as_ref(),
            self.publisher.as_ref(),
            self.probe.as_ref(),
            self.settings,
            ImportTranslator::new(job.uploaded_by.clone(), Utc::now()),
        );
        let mut summary = importer
            .run(path, job.format, total_rows, &job.file_name)
            .await?;
        summary.archived_count = archived;

        log_stage(job, ImportStage::Finalizing);
        ProgressReporter::new(self.settings.progress_interval, total_rows, &job.file_name)
            .report_completed(self.publisher.as_ref())
            .await;

        Ok(summary)
    }
}

fn log_stage(job: &QueuedImportJob, stage: ImportStage) {
    info!(job_id = %job.id, file = %job.file_name, "Import job {}", stage);
}
