//! NATS message handlers

pub mod import;
pub mod jobs;
pub mod record;

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subject};
use serde::Serialize;
use sqlx::PgPool;
use tokio::select;
use tracing::{error, info, warn};

use crate::auth::{extract_auth, AuthInfo};
use crate::config::Config;
use crate::services::import_job::ImportJobRunner;
use crate::services::import_processor::ImportProcessor;
use crate::services::memory_guard::ProcMemoryProbe;
use crate::services::progress::NatsProgressPublisher;
use crate::services::record_store::PgRecordStore;
use crate::services::upload::required_payload_bytes;
use crate::types::{ErrorResponse, Request};

/// Serialize and publish a reply; publish failures are only logged
pub(crate) async fn respond<T: Serialize>(client: &Client, reply: Subject, body: &T) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    if let Err(e) = client.publish(reply, payload.into()).await {
        warn!("Failed to publish reply: {}", e);
    }
    Ok(())
}

/// Authenticate the request and apply the role predicate.
/// Replies with an error and returns `None` when access is denied.
pub(crate) async fn authorize<T>(
    client: &Client,
    reply: &Subject,
    request: &Request<T>,
    jwt_secret: &str,
) -> Result<Option<AuthInfo>> {
    let auth = match extract_auth(request, jwt_secret) {
        Ok(auth) => auth,
        Err(e) => {
            let error = ErrorResponse::new(request.id, "UNAUTHORIZED", e.to_string());
            respond(client, reply.clone(), &error).await?;
            return Ok(None);
        }
    };

    if !auth.can_access() {
        warn!("User {} has no role allowed to access LMT lists", auth.user_id);
        let error = ErrorResponse::new(request.id, "FORBIDDEN", "Your role cannot access LMT lists");
        respond(client, reply.clone(), &error).await?;
        return Ok(None);
    }

    Ok(Some(auth))
}

/// Start all message handlers and the import consumer
pub async fn start_handlers(client: Client, pool: PgPool, config: &Config) -> Result<()> {
    info!("Starting message handlers...");
    let config = Arc::new(config.clone());

    // Uploads travel base64 encoded in one core NATS message
    let max_payload = client.server_info().max_payload as u64;
    let needed = required_payload_bytes(config.max_upload_bytes);
    if max_payload < needed {
        warn!(
            "NATS max_payload is {} bytes; uploads near the {} byte limit need max_payload >= {}",
            max_payload, config.max_upload_bytes, needed
        );
    }

    let runner = ImportJobRunner::new(
        Arc::new(PgRecordStore::new(pool.clone())),
        Arc::new(NatsProgressPublisher::new(client.clone())),
        Arc::new(ProcMemoryProbe),
        config.import,
    );
    let processor = Arc::new(ImportProcessor::new(client.clone(), runner, config.import_ack_wait).await?);

    let upload_sub = client.subscribe("lmt.import.upload").await?;
    let current_sub = client.subscribe("lmt.record.current").await?;
    let archived_sub = client.subscribe("lmt.record.archived").await?;
    let history_sub = client.subscribe("lmt.jobs.history").await?;
    info!("Subscribed to NATS subjects");

    let processor_handle = tokio::spawn(Arc::clone(&processor).start_processing());
    let upload_handle = tokio::spawn(import::handle_upload(
        client.clone(),
        upload_sub,
        Arc::clone(&processor),
        Arc::clone(&config),
    ));
    let current_handle = tokio::spawn(record::handle_list(
        client.clone(),
        current_sub,
        pool.clone(),
        Arc::clone(&config),
        false,
    ));
    let archived_handle = tokio::spawn(record::handle_list(
        client.clone(),
        archived_sub,
        pool.clone(),
        Arc::clone(&config),
        true,
    ));
    let history_handle = tokio::spawn(jobs::handle_job_history(
        client.clone(),
        history_sub,
        Arc::clone(&config),
    ));

    info!("All handlers started");

    select! {
        result = processor_handle => {
            error!("Import processor finished: {:?}", result);
        }
        result = upload_handle => {
            error!("Upload handler finished: {:?}", result);
        }
        result = current_handle => {
            error!("Current records handler finished: {:?}", result);
        }
        result = archived_handle => {
            error!("Archived records handler finished: {:?}", result);
        }
        result = history_handle => {
            error!("Job history handler finished: {:?}", result);
        }
    }

    Ok(())
}
