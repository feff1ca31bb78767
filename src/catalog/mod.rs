//! Catalog data model.
//!
//! - `Entity`: one reference entry with optional embedding
//! - `seed`: typed normalization of seed-file records into entities

pub mod seed;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::semantic::{vector, EMBEDDING_DIMENSIONS};

pub use seed::{load_seed, parse_seed, SeedError, SeedRecord};

/// Base stat block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stats {
    pub hp: u32,
    pub attack: u32,
    pub defense: u32,
    pub special_attack: u32,
    pub special_defense: u32,
    pub speed: u32,
}

/// A catalog entity.
///
/// The cache hands these out as immutable `Arc` snapshots; mutations build a
/// new value and replace the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: u64,
    pub name: String,
    /// Ordered, never empty
    pub types: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genus: Option<String>,
    #[serde(default)]
    pub image_url: String,
    /// 0 when unknown
    #[serde(default)]
    pub generation: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default)]
    pub abilities: Vec<String>,
    #[serde(default)]
    pub stats: Stats,
    /// Unit length, `EMBEDDING_DIMENSIONS` long
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Reasons an entity is refused by the repository.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidEntity {
    #[error("id must be a positive integer")]
    ZeroId,

    #[error("name must not be empty")]
    EmptyName,

    #[error("types must contain at least one entry")]
    NoTypes,

    #[error("embedding has {got} dimensions, expected {expected}")]
    Dimensions { expected: usize, got: usize },

    #[error("embedding has zero norm")]
    ZeroNorm,
}

impl Entity {
    /// Create an entity with the required fields and empty defaults.
    pub fn new(id: u64, name: impl Into<String>, types: Vec<String>) -> Self {
        Self {
            id,
            name: name.into(),
            types,
            description: String::new(),
            genus: None,
            image_url: String::new(),
            generation: 0,
            height: None,
            weight: None,
            abilities: Vec::new(),
            stats: Stats::default(),
            embedding: None,
            model_version: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>, model_version: impl Into<String>) -> Self {
        self.embedding = Some(embedding);
        self.model_version = Some(model_version.into());
        self
    }

    pub fn has_embedding(&self) -> bool {
        self.embedding.is_some()
    }

    /// Check the required fields and conform the embedding.
    pub fn validate(mut self) -> Result<Self, InvalidEntity> {
        if self.id == 0 {
            return Err(InvalidEntity::ZeroId);
        }
        if self.name.trim().is_empty() {
            return Err(InvalidEntity::EmptyName);
        }
        if self.types.is_empty() {
            return Err(InvalidEntity::NoTypes);
        }
        if let Some(embedding) = self.embedding.take() {
            self.embedding = Some(conform_embedding(embedding)?);
        }
        Ok(self)
    }
}

/// Enforce the embedding invariants.
///
/// The length must be `EMBEDDING_DIMENSIONS`. Vectors already unit length
/// within tolerance are returned untouched; others are renormalized.
pub fn conform_embedding(embedding: Vec<f32>) -> Result<Vec<f32>, InvalidEntity> {
    if embedding.len() != EMBEDDING_DIMENSIONS {
        return Err(InvalidEntity::Dimensions {
            expected: EMBEDDING_DIMENSIONS,
            got: embedding.len(),
        });
    }
    if vector::is_unit(&embedding) {
        return Ok(embedding);
    }
    vector::normalize(&embedding).ok_or(InvalidEntity::ZeroNorm)
}
