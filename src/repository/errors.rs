use std::time::Duration;

use crate::catalog::{InvalidEntity, SeedError};
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("invalid entity: {0}")]
    InvalidEntity(#[from] InvalidEntity),

    #[error("seed error: {0}")]
    Seed(#[from] SeedError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("store did not answer within {0:?}")]
    StoreTimeout(Duration),

    #[error("top_n must be between 1 and {max}, got {got}")]
    InvalidTopN { got: usize, max: usize },

    #[error("blocking task failed: {0}")]
    Task(String),

    #[error("bulk upsert stopped after {written} entities: {source}")]
    BulkUpsert {
        written: usize,
        source: Box<RepositoryError>,
    },
}

pub type Result<T> = std::result::Result<T, RepositoryError>;
