//! LMT Worker - backend service for the LMT engagement list
//!
//! Connects to NATS, serves record queries and runs spreadsheet imports
//! queued through JetStream.

mod auth;
mod cli;
mod config;
mod db;
mod error;
mod handlers;
mod services;
mod types;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::services::import_job::{ImportJobRunner, TempUpload};
use crate::services::memory_guard::ProcMemoryProbe;
use crate::services::progress::LogProgressPublisher;
use crate::services::record_store::PgRecordStore;
use crate::services::spreadsheet_reader::count_data_rows;
use crate::types::{QueuedImportJob, SpreadsheetFormat};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs directory - use LOGS_DIR env var or default to ./logs
    let logs_dir = std::env::var("LOGS_DIR").unwrap_or_else(|_| "logs".to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "worker.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,lmt_worker=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer()) // stdout
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false)) // file
        .init();

    let config = Config::from_env()?;
    info!("Configuration loaded");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config).await,
        Command::Migrate => {
            let pool = db::create_pool(&config.database_url).await?;
            db::run_migrations(&pool).await
        }
        Command::Import { file, uploaded_by } => import_file(&config, file, uploaded_by).await,
    }
}

async fn serve(config: &Config) -> Result<()> {
    info!("Starting LMT Worker...");

    let pool = db::create_pool(&config.database_url).await?;
    info!("Connected to PostgreSQL");

    db::run_migrations(&pool).await?;

    // Connect to NATS (supports optional NATS_USER/NATS_PASSWORD auth).
    let nats_client = match (std::env::var("NATS_USER"), std::env::var("NATS_PASSWORD")) {
        (Ok(user), Ok(password)) if !user.is_empty() => {
            async_nats::ConnectOptions::new()
                .user_and_password(user, password)
                .connect(&config.nats_url)
                .await?
        }
        _ => async_nats::connect(&config.nats_url).await?,
    };
    info!("Connected to NATS at {}", config.nats_url);

    if let Err(e) = handlers::start_handlers(nats_client, pool, config).await {
        error!("Handler error: {:#}", e);
        return Err(e);
    }

    Ok(())
}

/// Run one import in this process. The file is copied into the upload
/// directory first so the job's cleanup never touches the operator's file.
async fn import_file(config: &Config, file: std::path::PathBuf, uploaded_by: String) -> Result<()> {
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("Import path has no file name")?;
    let format = SpreadsheetFormat::from_file_name(&file_name)
        .with_context(|| format!("'{}' is not a CSV, XLSX or XLS file", file_name))?;

    std::fs::create_dir_all(&config.upload_dir)?;
    let staged = config
        .upload_dir
        .join(format!("{}.{}", uuid::Uuid::new_v4(), format.extension()));
    std::fs::copy(&file, &staged).with_context(|| format!("Failed to read {}", file.display()))?;
    let guard = TempUpload::new(&staged);

    let total_rows = count_data_rows(staged.clone(), format).await?;

    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;

    // The runner owns the staged copy from here on
    let staged = guard.keep();

    let runner = ImportJobRunner::new(
        Arc::new(PgRecordStore::new(pool)),
        Arc::new(LogProgressPublisher),
        Arc::new(ProcMemoryProbe),
        config.import,
    );
    let job = QueuedImportJob::new(uploaded_by, staged, file_name, format, total_rows);
    let summary = runner.handle(&job).await?;

    info!(
        "Import finished: {} archived, {} inserted, {} rejected",
        summary.archived_count, summary.inserted_count, summary.rejected_count
    );
    for issue in summary.leading_issues(20) {
        info!("Row {} [{}]: {}", issue.row_number, issue.field, issue.message);
    }

    Ok(())
}
