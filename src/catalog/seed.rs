//! Seed-file ingestion.
//!
//! A seed file is a JSON array of records. `id`, `name` and `types` are
//! required; everything else is optional. Every record passes through
//! [`SeedRecord::into_entity`] before it can reach the cache, and a single bad
//! record rejects the whole file.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::Path;

use chrono::Utc;
use serde::Deserialize;

use super::{Entity, Stats};
use crate::semantic::EmbeddingSynthesizer;

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("seed file is not a JSON array: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed seed record #{index}{}: {reason}", describe_id(.id))]
    MalformedRecord {
        index: usize,
        id: Option<u64>,
        reason: String,
    },
}

fn describe_id(id: &Option<u64>) -> String {
    id.map(|id| format!(" (id {id})")).unwrap_or_default()
}

/// Raw record as found in the seed file.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedRecord {
    pub id: u64,
    pub name: String,
    pub types: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub genus: Option<String>,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub generation: u32,
    #[serde(default)]
    pub height: Option<f64>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub abilities: Vec<String>,
    #[serde(default)]
    pub stats: Stats,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub model_version: Option<String>,
}

impl SeedRecord {
    /// Normalize into the canonical entity shape.
    ///
    /// Records without an embedding get one synthesized from their name.
    pub fn into_entity(self, synthesizer: &EmbeddingSynthesizer) -> Result<Entity, String> {
        let name = self.name.trim().to_string();
        let (embedding, model_version) = match self.embedding {
            Some(embedding) => (embedding, self.model_version),
            None => (
                synthesizer.derive(&name),
                Some(synthesizer.model_version().to_string()),
            ),
        };

        let entity = Entity {
            id: self.id,
            name,
            types: self.types,
            description: self.description,
            genus: self.genus,
            image_url: self.image_url,
            generation: self.generation,
            height: self.height,
            weight: self.weight,
            abilities: self.abilities,
            stats: self.stats,
            embedding: Some(embedding),
            model_version,
            updated_at: Utc::now(),
        };

        entity.validate().map_err(|e| e.to_string())
    }
}

/// Parse seed JSON into entities, failing on the first malformed record.
pub fn parse_seed(json: &str, synthesizer: &EmbeddingSynthesizer) -> Result<Vec<Entity>, SeedError> {
    let raw: Vec<serde_json::Value> = serde_json::from_str(json)?;
    let mut seen = HashSet::with_capacity(raw.len());
    let mut entities = Vec::with_capacity(raw.len());

    for (index, value) in raw.into_iter().enumerate() {
        let id = value.get("id").and_then(serde_json::Value::as_u64);
        let malformed = |reason: String| SeedError::MalformedRecord { index, id, reason };

        let record: SeedRecord = serde_json::from_value(value).map_err(|e| malformed(e.to_string()))?;
        let entity = record.into_entity(synthesizer).map_err(malformed)?;

        if !seen.insert(entity.id) {
            return Err(malformed("duplicate id".to_string()));
        }
        entities.push(entity);
    }

    Ok(entities)
}

/// Load a seed file. Returns `Ok(None)` when the file does not exist.
pub fn load_seed(
    path: &Path,
    synthesizer: &EmbeddingSynthesizer,
) -> Result<Option<Vec<Entity>>, SeedError> {
    let json = match std::fs::read_to_string(path) {
        Ok(json) => json,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let entities = parse_seed(&json, synthesizer)?;
    log::debug!("parsed {} seed records from {}", entities.len(), path.display());
    Ok(Some(entities))
}
