//! Import JetStream processor
//!
//! Queues staged uploads on a work-queue stream and runs them one at a
//! time. The durable consumer allows a single unacknowledged message, so
//! across every worker instance at most one import writes at once.
//!
//! ## Streams
//! - `LMT_IMPORT_JOBS` - spreadsheet import jobs

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_nats::jetstream::{self, AckKind, Context as JsContext};
use async_nats::Client;
use chrono::Utc;
use futures::StreamExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::services::import_job::ImportJobRunner;
use crate::services::job_history::JOB_HISTORY;
use crate::types::{ImportJobStatus, ImportJobStatusUpdate, ImportJobSubmitResponse, QueuedImportJob};

const STREAM_NAME: &str = "LMT_IMPORT_JOBS";
const CONSUMER_NAME: &str = "lmt_import_workers";
const SUBJECT: &str = "lmt.jobs.import";
const STATUS_PREFIX: &str = "lmt.job.import.status";

/// Import job processor with JetStream integration
pub struct ImportProcessor {
    client: Client,
    js: JsContext,
    runner: ImportJobRunner,
    ack_wait: Duration,
}

impl ImportProcessor {
    /// Create the processor, making sure the job stream exists
    pub async fn new(client: Client, runner: ImportJobRunner, ack_wait: Duration) -> Result<Self> {
        let js = jetstream::new(client.clone());

        let stream_config = jetstream::stream::Config {
            name: STREAM_NAME.to_string(),
            subjects: vec![SUBJECT.to_string()],
            max_messages: 1_000,
            retention: jetstream::stream::RetentionPolicy::WorkQueue,
            ..Default::default()
        };
        js.get_or_create_stream(stream_config)
            .await
            .context("Failed to create import job stream")?;
        info!("JetStream import stream '{}' ready", STREAM_NAME);

        Ok(Self {
            client,
            js,
            runner,
            ack_wait,
        })
    }

    /// Enqueue a staged upload
    pub async fn submit_job(&self, job: QueuedImportJob) -> Result<ImportJobSubmitResponse> {
        let payload = serde_json::to_vec(&job)?;
        self.js.publish(SUBJECT, payload.into()).await?.await?;

        info!(
            "Import job {} submitted: '{}' with {} rows",
            job.id, job.file_name, job.total_rows
        );
        self.publish_status(job.id, ImportJobStatus::Queued { total_rows: job.total_rows })
            .await;

        Ok(ImportJobSubmitResponse {
            job_id: job.id,
            file_name: job.file_name,
            total_rows: job.total_rows,
            message: "File uploaded, import is processing in the background".to_string(),
        })
    }

    /// Publish a job status update. Failures are logged only.
    pub async fn publish_status(&self, job_id: Uuid, status: ImportJobStatus) {
        let update = ImportJobStatusUpdate::new(job_id, status);
        let subject = status_subject(job_id);
        let result = match serde_json::to_vec(&update) {
            Ok(payload) => self.client.publish(subject, payload.into()).await.map_err(anyhow::Error::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!("Failed to publish status for import job {}: {}", job_id, e);
        }
    }

    /// Consume and run import jobs until the message stream ends
    pub async fn start_processing(self: Arc<Self>) -> Result<()> {
        let stream = self.js.get_stream(STREAM_NAME).await?;

        let consumer_config = jetstream::consumer::pull::Config {
            durable_name: Some(CONSUMER_NAME.to_string()),
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            ack_wait: self.ack_wait,
            max_ack_pending: 1,
            max_deliver: 1, // A rerun would archive the generation it just imported
            filter_subject: SUBJECT.to_string(),
            ..Default::default()
        };

        let consumer = stream.get_or_create_consumer(CONSUMER_NAME, consumer_config).await?;
        info!("JetStream import consumer '{}' ready", CONSUMER_NAME);

        let mut messages = consumer.messages().await?;

        while let Some(msg) = messages.next().await {
            match msg {
                // Sequential on purpose: one import at a time
                Ok(msg) => {
                    if let Err(e) = self.process_job(msg).await {
                        error!("Failed to process import job: {:#}", e);
                    }
                }
                Err(e) => error!("Error receiving import message: {}", e),
            }
        }

        Ok(())
    }

    async fn process_job(&self, msg: jetstream::Message) -> Result<()> {
        let job: QueuedImportJob = match serde_json::from_slice(&msg.payload) {
            Ok(job) => job,
            Err(e) => {
                terminate(&msg, "malformed").await;
                return Err(e).context("Malformed import job payload");
            }
        };
        let started_at = Utc::now();

        info!("Processing import job {} ({} rows)", job.id, job.total_rows);
        self.publish_status(job.id, ImportJobStatus::Processing { total_rows: job.total_rows })
            .await;

        let run = self.runner.handle(&job);
        tokio::pin!(run);
        // Keep the message in progress so long imports outlive ack_wait
        let mut heartbeat = tokio::time::interval(heartbeat_interval(self.ack_wait));
        heartbeat.tick().await;
        let result = loop {
            tokio::select! {
                result = &mut run => break result,
                _ = heartbeat.tick() => {
                    if let Err(e) = msg.ack_with(AckKind::Progress).await {
                        warn!("Failed to extend ack deadline for import job {}: {:?}", job.id, e);
                    }
                }
            }
        };

        match result {
            Ok(summary) => {
                JOB_HISTORY.record_completed(&job, &summary);
                self.publish_status(job.id, ImportJobStatus::from(summary)).await;

                if let Err(e) = msg.ack().await {
                    error!("Failed to ack import job {}: {:?}", job.id, e);
                }
            }
            Err(e) => {
                let message = format!("{:#}", e);
                JOB_HISTORY.record_failed(&job, started_at, message.clone());
                self.publish_status(job.id, ImportJobStatus::Failed { error: message }).await;

                // The staged file is gone and archival may have committed,
                // so redelivery cannot succeed
                terminate(&msg, &job.id.to_string()).await;
            }
        }

        Ok(())
    }
}

async fn terminate(msg: &jetstream::Message, label: &str) {
    if let Err(e) = msg.ack_with(AckKind::Term).await {
        error!("Failed to terminate import job {}: {:?}", label, e);
    }
}

/// Half the ack deadline, never below one second
fn heartbeat_interval(ack_wait: Duration) -> Duration {
    (ack_wait / 2).max(Duration::from_secs(1))
}

fn status_subject(job_id: Uuid) -> String {
    format!("{}.{}", STATUS_PREFIX, job_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_and_subject_names() {
        assert_eq!(STREAM_NAME, "LMT_IMPORT_JOBS");
        assert_eq!(SUBJECT, "lmt.jobs.import");
    }

    #[test]
    fn test_status_subject_is_per_job() {
        let id = Uuid::new_v4();
        assert_eq!(status_subject(id), format!("lmt.job.import.status.{}", id));
    }

    #[test]
    fn test_heartbeat_fires_well_inside_ack_wait() {
        assert_eq!(heartbeat_interval(Duration::from_secs(1800)), Duration::from_secs(900));
        assert_eq!(heartbeat_interval(Duration::from_secs(1)), Duration::from_secs(1));
        assert_eq!(heartbeat_interval(Duration::ZERO), Duration::from_secs(1));
    }
}
