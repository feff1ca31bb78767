//! Deterministic embedding synthesis.
//!
//! Expands a seed string into a unit-length vector by repeatedly hashing an
//! evolving SHA256 buffer:
//! 1. seed = sha256(text)
//! 2. seed = sha256(seed), append every byte as `byte / 255`
//! 3. repeat 2 until enough values exist, truncate
//! 4. L2-normalize
//!
//! The output is bit-reproducible, so golden vectors generated elsewhere with
//! the same hash and mapping can be compared directly.

use sha2::{Digest, Sha256};

use super::EMBEDDING_DIMENSIONS;

/// Model version tag written alongside synthesized embeddings.
pub const SYNTH_MODEL_VERSION: &str = "sha256-synth-v1";

/// Generates stand-in embeddings where no real embedding model is available.
#[derive(Debug, Clone)]
pub struct EmbeddingSynthesizer {
    dimensions: usize,
}

impl Default for EmbeddingSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingSynthesizer {
    pub fn new() -> Self {
        Self {
            dimensions: EMBEDDING_DIMENSIONS,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn model_version(&self) -> &'static str {
        SYNTH_MODEL_VERSION
    }

    /// Derive a vector from `seed_text`.
    pub fn derive(&self, seed_text: &str) -> Vec<f32> {
        let mut seed: [u8; 32] = Sha256::digest(seed_text.as_bytes()).into();
        let mut values: Vec<f64> = Vec::with_capacity(self.dimensions + seed.len());

        while values.len() < self.dimensions {
            seed = Sha256::digest(seed).into();
            values.extend(seed.iter().map(|byte| f64::from(*byte) / 255.0));
        }
        values.truncate(self.dimensions);

        let norm = values.iter().map(|v| v * v).sum::<f64>().sqrt();
        let norm = if norm == 0.0 { 1.0 } else { norm };

        values.into_iter().map(|v| (v / norm) as f32).collect()
    }
}

/// Derive a vector with the default dimensions.
pub fn derive(seed_text: &str) -> Vec<f32> {
    EmbeddingSynthesizer::new().derive(seed_text)
}
