//! Similarity infrastructure for catalog embeddings.
//!
//! # Architecture
//!
//! - `vector`: cosine similarity and normalization shared by every backend
//! - `synth`: deterministic SHA256-based embeddings for data without a model
//! - `matcher`: in-memory brute-force ranking

pub mod matcher;
pub mod synth;
pub mod vector;

pub use matcher::{MatchResult, MissingEmbeddingPolicy, SimilarityMatcher};
pub use synth::{derive, EmbeddingSynthesizer, SYNTH_MODEL_VERSION};

/// Length of every catalog embedding.
pub const EMBEDDING_DIMENSIONS: usize = 512;
