//! Brute-force cosine ranking over an in-memory catalog.

use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::catalog::Entity;
use crate::semantic::vector::cosine_similarity;

/// How candidates without an embedding are scored.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingEmbeddingPolicy {
    /// Leave them out of the ranking (the store path does the same).
    #[default]
    Exclude,
    /// Rank them with similarity 0.
    ZeroScore,
    /// Compare the query with itself, so they score as a perfect match.
    SelfMatch,
}

/// A ranked match, shared read-only with the cache.
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub entity: Arc<Entity>,
    /// Similarity in [0.0, 1.0]
    pub similarity: f32,
    /// 1-based rank
    pub rank: usize,
}

/// Order raw scores and turn them into ranked results.
///
/// Stable sort, so equal scores keep their input order. Scores are clamped to
/// be non-negative after ordering.
pub(crate) fn rank_scored(mut scored: Vec<(Arc<Entity>, f64)>, top_n: usize) -> Vec<MatchResult> {
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(top_n);

    scored
        .into_iter()
        .enumerate()
        .map(|(index, (entity, score))| MatchResult {
            entity,
            similarity: score.max(0.0) as f32,
            rank: index + 1,
        })
        .collect()
}

/// Finds the catalog entities most similar to a query vector.
#[derive(Debug, Clone, Default)]
pub struct SimilarityMatcher {
    catalog: Vec<Arc<Entity>>,
    policy: MissingEmbeddingPolicy,
}

impl SimilarityMatcher {
    pub fn new(policy: MissingEmbeddingPolicy) -> Self {
        Self {
            catalog: Vec::new(),
            policy,
        }
    }

    pub fn with_catalog(policy: MissingEmbeddingPolicy, catalog: Vec<Arc<Entity>>) -> Self {
        Self { catalog, policy }
    }

    /// Replace the working candidate set.
    pub fn set_catalog(&mut self, catalog: Vec<Arc<Entity>>) {
        self.catalog = catalog;
    }

    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }

    /// Rank the catalog against `query` and return at most `top_n` results.
    pub fn find_best_matches(&self, query: &[f32], top_n: usize) -> Vec<MatchResult> {
        // collect keeps catalog order, which the stable sort relies on
        let scored: Vec<(Arc<Entity>, f64)> = self
            .catalog
            .par_iter()
            .filter_map(|entity| {
                let score = match entity.embedding.as_deref() {
                    Some(reference) => cosine_similarity(query, reference),
                    None => match self.policy {
                        MissingEmbeddingPolicy::Exclude => return None,
                        MissingEmbeddingPolicy::ZeroScore => 0.0,
                        MissingEmbeddingPolicy::SelfMatch => cosine_similarity(query, query),
                    },
                };
                Some((entity.clone(), score))
            })
            .collect();

        rank_scored(scored, top_n)
    }

    /// Cosine similarity of two vectors, see [`cosine_similarity`].
    pub fn calculate_similarity(a: &[f32], b: &[f32]) -> f32 {
        cosine_similarity(a, b) as f32
    }
}
