//! Upload handler
//!
//! Validates and stages the uploaded spreadsheet synchronously, then queues
//! the import. The reply only acknowledges the upload; progress and the
//! final accounting arrive on the progress and job status subjects.

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::ImportError;
use crate::handlers::{authorize, respond};
use crate::services::import_job::TempUpload;
use crate::services::import_processor::ImportProcessor;
use crate::services::upload::{decode_content, stage_upload};
use crate::types::{ErrorResponse, QueuedImportJob, Request, SuccessResponse, UploadRequest};

/// Handle lmt.import.upload requests
pub async fn handle_upload(
    client: Client,
    mut subscriber: Subscriber,
    processor: Arc<ImportProcessor>,
    config: Arc<Config>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received import.upload message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<UploadRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse upload request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                respond(&client, reply, &error).await?;
                continue;
            }
        };

        let Some(auth) = authorize(&client, &reply, &request, &config.jwt_secret).await? else {
            continue;
        };

        let UploadRequest { file_name, content } = request.payload;
        let staged = match decode_content(&content) {
            Ok(bytes) => {
                drop(content);
                stage_upload(&config.upload_dir, config.max_upload_bytes, &file_name, &bytes).await
            }
            Err(e) => Err(e),
        };
        let staged = match staged {
            Ok(staged) => staged,
            Err(e) => {
                respond(&client, reply, &import_error_response(request.id, &file_name, &e)).await?;
                continue;
            }
        };

        // Removes the staged file unless the job is queued
        let guard = TempUpload::new(&staged.path);
        let job = QueuedImportJob::new(
            auth.user_id,
            staged.path.clone(),
            staged.file_name,
            staged.format,
            staged.total_rows,
        );

        match processor.submit_job(job).await {
            Ok(response) => {
                guard.keep();
                respond(&client, reply, &SuccessResponse::new(request.id, response)).await?;
            }
            Err(e) => {
                error!("Failed to queue import of '{}': {:#}", file_name, e);
                let error = ErrorResponse::new(request.id, "SUBMIT_ERROR", e.to_string());
                respond(&client, reply, &error).await?;
            }
        }
    }

    Ok(())
}

/// Map a staging failure to the reply sent to the uploader
fn import_error_response(request_id: Uuid, file_name: &str, e: &ImportError) -> ErrorResponse {
    if e.is_validation() {
        warn!("Upload '{}' rejected: {}", file_name, e);
    } else {
        error!("Upload '{}' failed: {:#}", file_name, e);
    }
    ErrorResponse::new(request_id, e.code(), e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_data_maps_to_its_code() {
        let id = Uuid::new_v4();
        let response = import_error_response(id, "empty.csv", &ImportError::NoData("empty.csv".into()));
        assert_eq!(response.id, id);
        assert_eq!(response.error.code, "NO_DATA");
        assert!(response.error.message.contains("no data found"));
    }

    #[test]
    fn test_size_limit_maps_to_its_code() {
        let e = ImportError::FileTooLarge { size: 20, limit: 10 };
        let response = import_error_response(Uuid::nil(), "big.csv", &e);
        assert_eq!(response.error.code, "FILE_TOO_LARGE");
    }

    #[test]
    fn test_upload_request_wire_format() {
        let json = r#"{
            "id": "00000000-0000-0000-0000-000000000001",
            "timestamp": "2025-01-01T00:00:00Z",
            "token": "t",
            "payload": {"fileName": "list.csv", "content": "YQ=="}
        }"#;
        let request: Request<UploadRequest> = serde_json::from_str(json).unwrap();
        assert_eq!(request.payload.file_name, "list.csv");
        assert_eq!(request.payload.content, "YQ==");
    }
}
