//! Database module

pub mod queries;

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info, warn};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Create a database connection pool.
///
/// Import batches check a connection out per insert and return it right
/// after, so a small pool serves both the importer and record reads.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    Ok(pool)
}

/// Run embedded migrations.
///
/// Stored checksums are refreshed first so a migration file checked out
/// with different line endings is not treated as modified.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("Running database migrations...");

    let versions: Vec<i64> = MIGRATOR
        .iter()
        .filter(|m| !m.migration_type.is_down_migration())
        .map(|m| m.version)
        .collect();
    debug!("Embedded migration versions: {:?}", versions);

    if migrations_table_exists(pool).await? {
        sync_checksums(pool).await?;
    }
    MIGRATOR.run(pool).await.context("Failed to apply migrations")?;

    info!("Database migrations complete");
    Ok(())
}

async fn migrations_table_exists(pool: &PgPool) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = '_sqlx_migrations')",
    )
    .fetch_one(pool)
    .await?;

    Ok(exists)
}

async fn sync_checksums(pool: &PgPool) -> Result<()> {
    for migration in MIGRATOR.iter().filter(|m| !m.migration_type.is_down_migration()) {
        let stored: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT checksum FROM _sqlx_migrations WHERE version = $1")
                .bind(migration.version)
                .fetch_optional(pool)
                .await?;

        let Some((stored,)) = stored else {
            continue;
        };
        if stored.as_slice() == &*migration.checksum {
            continue;
        }

        warn!(
            "Migration {} ({}) checksum differs, updating stored value",
            migration.version, migration.description
        );
        sqlx::query("UPDATE _sqlx_migrations SET checksum = $1 WHERE version = $2")
            .bind(&*migration.checksum)
            .bind(migration.version)
            .execute(pool)
            .await?;
    }

    Ok(())
}
