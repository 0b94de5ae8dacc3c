//! Chunked spreadsheet importer
//!
//! Streams the file in batches, validates and translates each row, inserts
//! the valid ones batch by batch and reports progress against the total
//! row count. Bad rows are recorded and skipped; they never stop later rows.

use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::error::ImportError;
use crate::services::import_translator::ImportTranslator;
use crate::services::memory_guard::{maybe_reclaim, MemoryProbe, Reclaim};
use crate::services::progress::{ProgressPublisher, ProgressReporter};
use crate::services::record_store::RecordStore;
use crate::services::row_validator::{RowOutcome, RowValidator};
use crate::services::spreadsheet_reader::RowStream;
use crate::types::{ImportSummary, NewRecord, SpreadsheetFormat};

/// Largest batch that keeps a multi-row insert under PostgreSQL's
/// 65535 bind parameter limit
pub const MAX_BATCH_SIZE: usize = 2000;

/// Rejections logged at warn before dropping to debug
const LOUD_REJECTIONS: u64 = 10;

/// Tuning knobs for one import run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImportSettings {
    pub batch_size: usize,
    pub progress_interval: u64,
    pub memory_check_interval: u64,
    pub memory_threshold_mb: u64,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            batch_size: 50,
            progress_interval: 50,
            memory_check_interval: 1000,
            memory_threshold_mb: 256,
        }
    }
}

pub struct ChunkedImporter<'a> {
    store: &'a dyn RecordStore,
    publisher: &'a dyn ProgressPublisher,
    probe: &'a dyn MemoryProbe,
    settings: ImportSettings,
    validator: RowValidator,
    translator: ImportTranslator,
}

impl<'a> ChunkedImporter<'a> {
    pub fn new(
        store: &'a dyn RecordStore,
        publisher: &'a dyn ProgressPublisher,
        probe: &'a dyn MemoryProbe,
        settings: ImportSettings,
        translator: ImportTranslator,
    ) -> Self {
        Self {
            store,
            publisher,
            probe,
            settings,
            validator: RowValidator::new(),
            translator,
        }
    }

    /// Import every data row of `path`. Fails fast with `NoData` when
    /// `total_rows` is zero. The terminal 100% event is left to the caller.
    pub async fn run(
        &self,
        path: &Path,
        format: SpreadsheetFormat,
        total_rows: u64,
        file_name: &str,
    ) -> Result<ImportSummary, ImportError> {
        if total_rows == 0 {
            return Err(ImportError::NoData(file_name.to_string()));
        }

        let started = Instant::now();
        let batch_size = self.settings.batch_size.clamp(1, MAX_BATCH_SIZE);
        info!(
            "Importing '{}': {} rows in batches of {}",
            file_name, total_rows, batch_size
        );

        let mut stream = RowStream::spawn(path.to_path_buf(), format, batch_size);
        let mut reporter = ProgressReporter::new(self.settings.progress_interval, total_rows, file_name);
        let mut summary = ImportSummary::default();
        let mut records: Vec<NewRecord> = Vec::with_capacity(batch_size);
        let mut memory_checkpoint = 0;

        while let Some(batch) = stream.next_batch().await {
            let batch = batch?;
            let batch_len = batch.len() as u64;

            for row in &batch {
                let row_number = summary.processed_rows + 1;
                summary.processed_rows = row_number;

                match self.validator.validate(row_number, row) {
                    RowOutcome::Blank => summary.skipped_count += 1,
                    RowOutcome::Rejected(issues) => {
                        summary.rejected_count += 1;
                        log_rejection(summary.rejected_count, row_number, &issues);
                        for issue in issues {
                            summary.push_issue(issue);
                        }
                    }
                    RowOutcome::Valid(warnings) => {
                        for warning in warnings {
                            debug!("Row {}: {}", row_number, warning.message);
                            summary.push_issue(warning);
                        }
                        records.push(self.translator.translate(row));
                    }
                }
            }
            drop(batch);

            if !records.is_empty() {
                summary.inserted_count += self.store.insert_batch(&records).await?;
                records.clear();
            }

            reporter.maybe_report(summary.processed_rows, self.publisher).await;
            debug!(
                "Batch of {} rows done, {}/{} processed",
                batch_len, summary.processed_rows, total_rows
            );

            let (checkpoint, outcome) = maybe_reclaim(
                summary.processed_rows,
                memory_checkpoint,
                self.settings.memory_check_interval,
                self.settings.memory_threshold_mb,
                self.probe,
            );
            memory_checkpoint = checkpoint;
            if let Reclaim::Reclaim { .. } = outcome {
                records.shrink_to_fit();
            }
        }

        stream.finish().await?;

        if summary.processed_rows != total_rows {
            warn!(
                "'{}': processed {} rows but {} were counted at upload",
                file_name, summary.processed_rows, total_rows
            );
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "Imported '{}': {} processed, {} inserted, {} rejected, {} blank, {} warnings in {} ms",
            file_name,
            summary.processed_rows,
            summary.inserted_count,
            summary.rejected_count,
            summary.skipped_count,
            summary.warning_count,
            summary.duration_ms
        );

        Ok(summary)
    }
}

fn log_rejection(rejected_so_far: u64, row_number: u64, issues: &[crate::types::ImportIssue]) {
    let fields: Vec<&str> = issues.iter().map(|i| i.field.as_str()).collect();
    if rejected_so_far <= LOUD_REJECTIONS {
        warn!("Row {} rejected, missing: {}", row_number, fields.join(", "));
    } else {
        debug!("Row {} rejected, missing: {}", row_number, fields.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory_guard::FixedMemoryProbe;
    use crate::services::progress::FakeProgressPublisher;
    use crate::services::record_store::InMemoryRecordStore;
    use crate::types::ImportIssueLevel;
    use chrono::Utc;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str = "store,name,account_status,school,district,client_status,area";

    fn csv_file(rows: &[&str]) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "{}", HEADER).unwrap();
        for row in rows {
            writeln!(file, "{}", row).unwrap();
        }
        file
    }

    fn valid(name: &str) -> String {
        format!("Store A,{},Current,Central ES,District 1,Existing Borrower,North", name)
    }

    fn settings(batch_size: usize, progress_interval: u64) -> ImportSettings {
        ImportSettings {
            batch_size,
            progress_interval,
            ..ImportSettings::default()
        }
    }

    async fn run(
        store: &InMemoryRecordStore,
        publisher: &FakeProgressPublisher,
        file: &NamedTempFile,
        settings: ImportSettings,
        total_rows: u64,
    ) -> Result<ImportSummary, ImportError> {
        let probe = FixedMemoryProbe(Some(64.0));
        let importer = ChunkedImporter::new(
            store,
            publisher,
            &probe,
            settings,
            ImportTranslator::new("tester", Utc::now()),
        );
        importer
            .run(file.path(), SpreadsheetFormat::Csv, total_rows, "list.csv")
            .await
    }

    #[tokio::test]
    async fn test_zero_total_rows_fails_fast() {
        let store = InMemoryRecordStore::new();
        let publisher = FakeProgressPublisher::new();
        let file = csv_file(&[]);

        let err = run(&store, &publisher, &file, settings(50, 50), 0).await.unwrap_err();

        assert!(matches!(err, ImportError::NoData(_)));
        assert_eq!(store.insert_calls(), 0);
        assert!(publisher.events().is_empty());
    }

    #[tokio::test]
    async fn test_bad_row_does_not_block_later_rows() {
        let store = InMemoryRecordStore::new();
        let publisher = FakeProgressPublisher::new();
        let bad = "Store A,Nobody,,Central ES,District 1,Existing Borrower,North";
        let file = csv_file(&[&valid("R1"), bad, &valid("R3"), &valid("R4"), &valid("R5")]);

        let summary = run(&store, &publisher, &file, settings(2, 50), 5).await.unwrap();

        let names: Vec<String> = store.all().into_iter().map(|r| r.record.name).collect();
        assert_eq!(names, vec!["R1", "R3", "R4", "R5"]);
        assert_eq!(summary.processed_rows, 5);
        assert_eq!(summary.inserted_count, 4);
        assert_eq!(summary.rejected_count, 1);
        assert_eq!(summary.issues[0].row_number, 2);
        assert_eq!(summary.issues[0].field, "account_status");
    }

    #[tokio::test]
    async fn test_blank_rows_count_as_processed_but_not_rejected() {
        let store = InMemoryRecordStore::new();
        let publisher = FakeProgressPublisher::new();
        let file = csv_file(&[&valid("A"), ",,,,,,", &valid("B")]);

        let summary = run(&store, &publisher, &file, settings(50, 50), 3).await.unwrap();

        assert_eq!(summary.processed_rows, 3);
        assert_eq!(summary.skipped_count, 1);
        assert_eq!(summary.rejected_count, 0);
        assert!(summary.issues.is_empty());
        assert_eq!(store.all().len(), 2);
    }

    #[tokio::test]
    async fn test_rejection_survives_a_flood_of_warnings() {
        let store = InMemoryRecordStore::new();
        let publisher = FakeProgressPublisher::new();
        let mut rows: Vec<String> = (1..=600)
            .map(|i| format!("Store A,P{},Dormant,Central ES,District 1,Existing Borrower,North", i))
            .collect();
        rows.push("Store A,Last,,Central ES,District 1,Existing Borrower,North".to_string());
        let refs: Vec<&str> = rows.iter().map(String::as_str).collect();
        let file = csv_file(&refs);

        let summary = run(&store, &publisher, &file, settings(100, 1000), 601).await.unwrap();

        assert_eq!(summary.warning_count, 600);
        assert_eq!(summary.rejected_count, 1);
        let rejection = summary
            .issues
            .iter()
            .find(|i| i.level == ImportIssueLevel::Error)
            .expect("rejection kept in the summary");
        assert_eq!(rejection.row_number, 601);
        assert_eq!(rejection.field, "account_status");
        assert_eq!(summary.leading_issues(1)[0].row_number, 601);
    }

    #[tokio::test]
    async fn test_one_insert_per_batch() {
        let store = InMemoryRecordStore::new();
        let publisher = FakeProgressPublisher::new();
        let rows: Vec<String> = (1..=7).map(|i| valid(&format!("P{}", i))).collect();
        let refs: Vec<&str> = rows.iter().map(String::as_str).collect();
        let file = csv_file(&refs);

        run(&store, &publisher, &file, settings(3, 50), 7).await.unwrap();

        assert_eq!(store.insert_calls(), 3);
        assert_eq!(store.all().len(), 7);
    }

    #[tokio::test]
    async fn test_progress_checkpoints_follow_interval() {
        let store = InMemoryRecordStore::new();
        let publisher = FakeProgressPublisher::new();
        let rows: Vec<String> = (1..=5).map(|i| valid(&format!("P{}", i))).collect();
        let refs: Vec<&str> = rows.iter().map(String::as_str).collect();
        let file = csv_file(&refs);

        run(&store, &publisher, &file, settings(1, 2), 5).await.unwrap();

        let processed: Vec<u64> = publisher.events().iter().map(|e| e.processed_rows).collect();
        assert_eq!(processed, vec![2, 4]);
        assert_eq!(publisher.events()[1].progress, 80.0);
    }

    #[tokio::test]
    async fn test_storage_failure_aborts_run() {
        let store = InMemoryRecordStore::failing_on_insert(2);
        let publisher = FakeProgressPublisher::new();
        let file = csv_file(&[&valid("A"), &valid("B"), &valid("C")]);

        let err = run(&store, &publisher, &file, settings(1, 50), 3).await.unwrap_err();

        assert!(matches!(err, ImportError::Storage(_)));
        assert_eq!(store.all().len(), 1);
    }

    #[tokio::test]
    async fn test_memory_pressure_does_not_change_result() {
        let store = InMemoryRecordStore::new();
        let publisher = FakeProgressPublisher::new();
        let probe = FixedMemoryProbe(Some(4096.0));
        let rows: Vec<String> = (1..=6).map(|i| valid(&format!("P{}", i))).collect();
        let refs: Vec<&str> = rows.iter().map(String::as_str).collect();
        let file = csv_file(&refs);
        let settings = ImportSettings {
            batch_size: 2,
            progress_interval: 50,
            memory_check_interval: 2,
            memory_threshold_mb: 256,
        };

        let importer = ChunkedImporter::new(
            &store,
            &publisher,
            &probe,
            settings,
            ImportTranslator::new("tester", Utc::now()),
        );
        let summary = importer
            .run(file.path(), SpreadsheetFormat::Csv, 6, "list.csv")
            .await
            .unwrap();

        assert_eq!(summary.inserted_count, 6);
        assert_eq!(store.all().len(), 6);
    }

    #[test]
    fn test_max_batch_stays_under_bind_limit() {
        use crate::db::queries::record::INSERT_COLUMNS;
        assert!(MAX_BATCH_SIZE * INSERT_COLUMNS < u16::MAX as usize);
    }
}
