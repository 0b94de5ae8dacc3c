//! Import progress reporting
//!
//! `ProgressPublisher` is the port the importer publishes through:
//! `NatsProgressPublisher` in production, `LogProgressPublisher` for
//! command-line imports, `FakeProgressPublisher` in tests.
//!
//! Publishing is fire-and-forget. A failed publish is logged and never
//! fails the import.

use anyhow::Result;
use async_nats::Client;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::types::ProgressEvent;

/// Broadcast subject consumed by the UI progress dialog
pub const PROGRESS_SUBJECT: &str = "lmt.import.progress";

// =============================================================================
// Core trait
// =============================================================================

#[async_trait]
pub trait ProgressPublisher: Send + Sync {
    async fn publish(&self, event: &ProgressEvent) -> Result<()>;
}

// =============================================================================
// NatsProgressPublisher
// =============================================================================

pub struct NatsProgressPublisher {
    client: Client,
    subject: String,
}

impl NatsProgressPublisher {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            subject: PROGRESS_SUBJECT.to_string(),
        }
    }
}

#[async_trait]
impl ProgressPublisher for NatsProgressPublisher {
    async fn publish(&self, event: &ProgressEvent) -> Result<()> {
        let payload = serde_json::to_vec(event)?;
        self.client.publish(self.subject.clone(), payload.into()).await?;
        Ok(())
    }
}

// =============================================================================
// LogProgressPublisher
// =============================================================================

pub struct LogProgressPublisher;

#[async_trait]
impl ProgressPublisher for LogProgressPublisher {
    async fn publish(&self, event: &ProgressEvent) -> Result<()> {
        info!(
            file = %event.file_name,
            "Import progress: {}/{} rows ({}%)",
            event.processed_rows,
            event.total_rows,
            event.progress,
        );
        Ok(())
    }
}

// =============================================================================
// FakeProgressPublisher
// =============================================================================

/// Records every event for assertions in tests
#[cfg(test)]
#[derive(Default)]
pub struct FakeProgressPublisher {
    pub events: parking_lot::Mutex<Vec<ProgressEvent>>,
    fail: bool,
}

#[cfg(test)]
impl FakeProgressPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A publisher whose every publish fails
    pub fn failing() -> Self {
        Self {
            events: parking_lot::Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl ProgressPublisher for FakeProgressPublisher {
    async fn publish(&self, event: &ProgressEvent) -> Result<()> {
        if self.fail {
            anyhow::bail!("progress channel unavailable");
        }
        self.events.lock().push(event.clone());
        Ok(())
    }
}

// =============================================================================
// Checkpoint logic
// =============================================================================

/// Decides when a processed-row count is a progress checkpoint
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    interval: u64,
    total_rows: u64,
    file_name: String,
    last_reported: u64,
}

impl ProgressReporter {
    pub fn new(interval: u64, total_rows: u64, file_name: impl Into<String>) -> Self {
        Self {
            interval: interval.max(1),
            total_rows,
            file_name: file_name.into(),
            last_reported: 0,
        }
    }

    /// Event for `processed` if it reached or crossed a multiple of the
    /// interval since the last checkpoint
    pub fn checkpoint(&mut self, processed: u64) -> Option<ProgressEvent> {
        if processed / self.interval <= self.last_reported / self.interval {
            return None;
        }
        self.last_reported = processed;
        Some(ProgressEvent::checkpoint(processed, self.total_rows, &self.file_name))
    }

    /// Publish a checkpoint event if `processed` is due
    pub async fn maybe_report(&mut self, processed: u64, publisher: &dyn ProgressPublisher) {
        let Some(event) = self.checkpoint(processed) else {
            return;
        };
        info!(
            "Processing row {} of {} ({}%)",
            event.processed_rows, event.total_rows, event.progress
        );
        publish_quietly(publisher, &event).await;
    }

    /// Terminal 100% event, published whether or not the last batch landed
    /// on a checkpoint
    pub async fn report_completed(&self, publisher: &dyn ProgressPublisher) {
        let event = ProgressEvent::completed(self.total_rows, &self.file_name);
        publish_quietly(publisher, &event).await;
    }
}

async fn publish_quietly(publisher: &dyn ProgressPublisher, event: &ProgressEvent) {
    if let Err(e) = publisher.publish(event).await {
        warn!("Failed to publish import progress for '{}': {}", event.file_name, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_fires_on_interval_multiples_only() {
        let mut reporter = ProgressReporter::new(50, 200, "f.csv");
        let fired: Vec<u64> = (1..=200)
            .filter_map(|n| reporter.checkpoint(n))
            .map(|e| e.processed_rows)
            .collect();
        assert_eq!(fired, vec![50, 100, 150, 200]);
    }

    #[test]
    fn test_checkpoint_fires_when_batches_step_over_boundary() {
        let mut reporter = ProgressReporter::new(50, 200, "f.csv");
        assert!(reporter.checkpoint(30).is_none());
        let event = reporter.checkpoint(60).unwrap();
        assert_eq!(event.processed_rows, 60);
        assert_eq!(event.progress, 30.0);
        assert!(reporter.checkpoint(90).is_none());
        assert!(reporter.checkpoint(120).is_some());
    }

    #[test]
    fn test_checkpoint_does_not_repeat_same_count() {
        let mut reporter = ProgressReporter::new(1, 2, "f.csv");
        assert!(reporter.checkpoint(1).is_some());
        assert!(reporter.checkpoint(1).is_none());
        assert!(reporter.checkpoint(2).is_some());
    }

    #[tokio::test]
    async fn test_maybe_report_publishes_checkpoint_events() {
        let publisher = FakeProgressPublisher::new();
        let mut reporter = ProgressReporter::new(2, 4, "list.csv");

        for processed in 1..=4 {
            reporter.maybe_report(processed, &publisher).await;
        }
        reporter.report_completed(&publisher).await;

        let events = publisher.events();
        let progress: Vec<f64> = events.iter().map(|e| e.progress).collect();
        assert_eq!(progress, vec![50.0, 100.0, 100.0]);
        assert!(events.iter().all(|e| e.file_name == "list.csv"));
    }

    #[tokio::test]
    async fn test_completed_event_sent_even_off_boundary() {
        let publisher = FakeProgressPublisher::new();
        let mut reporter = ProgressReporter::new(50, 7, "small.csv");

        reporter.maybe_report(7, &publisher).await;
        reporter.report_completed(&publisher).await;

        let events = publisher.events();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_complete());
        assert_eq!(events[0].processed_rows, 7);
    }

    #[tokio::test]
    async fn test_publish_failure_is_swallowed() {
        let publisher = FakeProgressPublisher::failing();
        let mut reporter = ProgressReporter::new(1, 1, "f.csv");
        reporter.maybe_report(1, &publisher).await;
        reporter.report_completed(&publisher).await;
        assert!(publisher.events().is_empty());
    }
}
