//! Import job history handler

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::handlers::{authorize, respond};
use crate::services::job_history::{JobHistoryRequest, JOB_HISTORY};
use crate::types::{ErrorResponse, Request, SuccessResponse};

/// Handle lmt.jobs.history requests
pub async fn handle_job_history(
    client: Client,
    mut subscriber: Subscriber,
    config: Arc<Config>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received jobs.history message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<JobHistoryRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse job history request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                respond(&client, reply, &error).await?;
                continue;
            }
        };

        if authorize(&client, &reply, &request, &config.jwt_secret).await?.is_none() {
            continue;
        }

        let history = JOB_HISTORY.get_recent(&request.payload);
        respond(&client, reply, &SuccessResponse::new(request.id, history)).await?;
    }

    Ok(())
}
