//! Record list handlers

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use sqlx::PgPool;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::db::queries;
use crate::handlers::{authorize, respond};
use crate::types::{ErrorResponse, ListResponse, RecordListRequest, Request, SuccessResponse};

const MAX_PAGE_SIZE: i64 = 1000;

/// Handle lmt.record.current (`archived == false`) and
/// lmt.record.archived (`archived == true`) requests
pub async fn handle_list(
    client: Client,
    mut subscriber: Subscriber,
    pool: PgPool,
    config: Arc<Config>,
    archived: bool,
) -> Result<()> {
    let generation = if archived { "archived" } else { "current" };

    while let Some(msg) = subscriber.next().await {
        debug!("Received record.{} message", generation);

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<RecordListRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                respond(&client, reply, &error).await?;
                continue;
            }
        };

        if authorize(&client, &reply, &request, &config.jwt_secret).await?.is_none() {
            continue;
        }

        let page = clamp_page(request.payload);
        match queries::record::list_records(&pool, archived, &page).await {
            Ok((items, total)) => {
                debug!("Listed {} {} records", items.len(), generation);
                let response = SuccessResponse::new(
                    request.id,
                    ListResponse {
                        items,
                        total,
                        limit: page.limit,
                        offset: page.offset,
                    },
                );
                respond(&client, reply, &response).await?;
            }
            Err(e) => {
                error!("Failed to list {} records: {}", generation, e);
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                respond(&client, reply, &error).await?;
            }
        }
    }

    Ok(())
}

fn clamp_page(mut req: RecordListRequest) -> RecordListRequest {
    req.limit = req.limit.clamp(1, MAX_PAGE_SIZE);
    req.offset = req.offset.max(0);
    req.store = req.store.filter(|s| !s.trim().is_empty());
    req
}
