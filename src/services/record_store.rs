//! Storage port used by the import pipeline
//!
//! `PgRecordStore` goes through the pool for every call, so no connection
//! is held between batches. `InMemoryRecordStore` backs the pipeline tests.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::db::queries;
use crate::error::ImportError;
use crate::types::NewRecord;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Flag all active records as archived; returns how many were flipped
    async fn archive_active(&self) -> Result<u64, ImportError>;

    /// Persist one batch atomically; returns how many were inserted
    async fn insert_batch(&self, records: &[NewRecord]) -> Result<u64, ImportError>;
}

#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn archive_active(&self) -> Result<u64, ImportError> {
        Ok(queries::record::archive_active(&self.pool).await?)
    }

    async fn insert_batch(&self, records: &[NewRecord]) -> Result<u64, ImportError> {
        Ok(queries::record::insert_records(&self.pool, records).await?)
    }
}

#[cfg(test)]
pub use fake::{InMemoryRecordStore, StoredRecord};
