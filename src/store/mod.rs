//! Structured entity store.
//!
//! [`EntityStore`] is the contract the repository talks to; [`SqliteStore`]
//! is the shipped implementation.

mod codec;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::audit::AuditRecord;
use crate::catalog::Entity;

pub use codec::{decode_embedding, encode_embedding};
pub use sqlite::SqliteStore;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON column error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value in database: {0}")]
    InvalidDbValue(String),

    #[error("blocking task failed: {0}")]
    Task(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Primary-key addressable entity table with a nullable vector column and an
/// append-only audit log.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Every stored entity, ordered by id.
    async fn load_all(&self) -> Result<Vec<Entity>>;

    /// Insert or fully replace the row keyed by `entity.id`. Returns once the
    /// write is committed.
    async fn upsert(&self, entity: &Entity) -> Result<()>;

    /// Replace embedding, model version and timestamp of one row. Returns the
    /// number of rows changed.
    async fn update_embedding(
        &self,
        id: u64,
        embedding: &[f32],
        model_version: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<usize>;

    /// Rows with an embedding ordered by ascending cosine distance to `query`,
    /// ties by id.
    async fn nearest(&self, query: &[f32], limit: usize) -> Result<Vec<(Entity, f64)>>;

    async fn append_audit(&self, record: &AuditRecord) -> Result<()>;

    fn name(&self) -> &str;
}
