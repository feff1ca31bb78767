//! Hybrid repository over the structured store and the in-memory catalog.
//!
//! Reads hydrate the cache lazily, once. Searches try the store first and
//! fall back to ranking the hydrated catalog in memory. Writes go to the
//! store first and only then replace the cached snapshot.

mod errors;
mod hydration;

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;

use crate::audit::{AnalysisEvent, AuditRecord};
use crate::catalog::{conform_embedding, load_seed, Entity};
use crate::semantic::matcher::rank_scored;
use crate::semantic::{EmbeddingSynthesizer, MatchResult, MissingEmbeddingPolicy, SimilarityMatcher};
use crate::store::{EntityStore, StoreError};

pub use errors::{RepositoryError, Result};
pub use hydration::HydrationState;
use hydration::HydrationTracker;

/// Largest `top_n` accepted by [`HybridRepository::find_similar`].
pub const MAX_TOP_N: usize = 10;

#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    pub seed_path: PathBuf,
    /// Upper bound for every store call
    pub store_timeout: Duration,
    pub missing_embedding_policy: MissingEmbeddingPolicy,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            seed_path: PathBuf::from("seed.json"),
            store_timeout: Duration::from_millis(2000),
            missing_embedding_policy: MissingEmbeddingPolicy::default(),
        }
    }
}

pub struct HybridRepository {
    config: RepositoryConfig,
    store: Option<Arc<dyn EntityStore>>,
    cache: RwLock<HashMap<u64, Arc<Entity>>>,
    hydrated: OnceCell<()>,
    tracker: HydrationTracker,
    synthesizer: EmbeddingSynthesizer,
    /// Held across a store write and its cache replace, so the cache applies
    /// writes in the order the store committed them.
    writes: Mutex<()>,
}

impl HybridRepository {
    /// Without a store the repository runs cache-only.
    pub fn new(config: RepositoryConfig, store: Option<Arc<dyn EntityStore>>) -> Self {
        Self {
            config,
            store,
            cache: RwLock::new(HashMap::new()),
            hydrated: OnceCell::new(),
            tracker: HydrationTracker::default(),
            synthesizer: EmbeddingSynthesizer::new(),
            writes: Mutex::new(()),
        }
    }

    pub fn hydration_state(&self) -> HydrationState {
        self.tracker.state()
    }

    /// Number of completed hydrations, at most 1 per instance.
    pub fn hydrations(&self) -> usize {
        self.tracker.completed()
    }

    /// Full catalog snapshot ordered by id.
    pub async fn get_all(&self) -> Result<Vec<Arc<Entity>>> {
        self.ensure_hydrated().await?;
        Ok(self.snapshot())
    }

    pub async fn get_by_id(&self, id: u64) -> Result<Option<Arc<Entity>>> {
        self.ensure_hydrated().await?;
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        Ok(cache.get(&id).cloned())
    }

    /// Insert or fully replace an entity.
    ///
    /// With a store, the committed store write happens before the cache is
    /// touched; a failed write leaves the cache as it was.
    pub async fn upsert(&self, entity: Entity) -> Result<Arc<Entity>> {
        let entity = entity.validate()?;
        let _write = self.writes.lock().await;

        if let Some(store) = &self.store {
            self.with_timeout(store.upsert(&entity)).await?;
        }

        let entity = Arc::new(entity);
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity.id, entity.clone());
        log::debug!("upserted entity {} ({})", entity.id, entity.name);
        Ok(entity)
    }

    /// Upsert in order, stopping at the first failure.
    pub async fn bulk_upsert(&self, entities: Vec<Entity>) -> Result<usize> {
        let total = entities.len();
        for (written, entity) in entities.into_iter().enumerate() {
            self.upsert(entity)
                .await
                .map_err(|source| RepositoryError::BulkUpsert {
                    written,
                    source: Box::new(source),
                })?;
        }
        log::info!("bulk upserted {total} entities");
        Ok(total)
    }

    /// Replace the embedding and model version of one entity.
    ///
    /// Returns whether anything was updated, in the store or in the cache.
    pub async fn save_embedding(&self, id: u64, embedding: Vec<f32>, model_version: &str) -> Result<bool> {
        let embedding = conform_embedding(embedding)?;
        self.ensure_hydrated().await?;
        let _write = self.writes.lock().await;
        let updated_at = Utc::now();

        let stored = match &self.store {
            Some(store) => {
                self.with_timeout(store.update_embedding(id, &embedding, model_version, updated_at))
                    .await?
                    > 0
            }
            None => false,
        };

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        let cached = match cache.get(&id) {
            Some(current) => {
                let mut next = Entity::clone(current);
                next.embedding = Some(embedding);
                next.model_version = Some(model_version.to_string());
                next.updated_at = updated_at;
                cache.insert(id, Arc::new(next));
                true
            }
            None => false,
        };

        if !stored && !cached {
            log::debug!("save_embedding: no entity with id {id}");
        }
        Ok(stored || cached)
    }

    /// Rank the catalog against `query` and return at most `top_n` matches.
    ///
    /// Store errors, timeouts and empty answers fall back to the in-memory
    /// matcher; they are never returned.
    pub async fn find_similar(&self, query: &[f32], top_n: usize) -> Result<Vec<MatchResult>> {
        if !(1..=MAX_TOP_N).contains(&top_n) {
            return Err(RepositoryError::InvalidTopN {
                got: top_n,
                max: MAX_TOP_N,
            });
        }

        if let Some(results) = self.find_similar_in_store(query, top_n).await {
            return Ok(results);
        }

        self.ensure_hydrated().await?;
        let matcher = SimilarityMatcher::with_catalog(self.config.missing_embedding_policy, self.snapshot());
        Ok(matcher.find_best_matches(query, top_n))
    }

    /// Append an audit record on a detached task.
    ///
    /// Failures are logged and never reach the caller. Must be called from
    /// within a Tokio runtime.
    pub fn record_event(&self, event: AnalysisEvent) -> JoinHandle<()> {
        let store = self.store.clone();
        let timeout = self.config.store_timeout;

        tokio::spawn(async move {
            let Some(store) = store else {
                log::debug!("no store configured, dropping audit event");
                return;
            };

            let record = AuditRecord::from_event(event);
            match tokio::time::timeout(timeout, store.append_audit(&record)).await {
                Ok(Ok(())) => log::debug!("recorded analysis request {}", record.id),
                Ok(Err(err)) => log::warn!("failed to record analysis request {}: {err}", record.id),
                Err(_) => log::warn!(
                    "recording analysis request {} timed out after {timeout:?}",
                    record.id
                ),
            }
        })
    }

    async fn find_similar_in_store(&self, query: &[f32], top_n: usize) -> Option<Vec<MatchResult>> {
        let store = self.store.as_ref()?;

        let rows = match self.with_timeout(store.nearest(query, top_n)).await {
            Ok(rows) if !rows.is_empty() => rows,
            Ok(_) => {
                log::debug!("{} returned no candidates, using in-memory catalog", store.name());
                return None;
            }
            Err(err) => {
                log::warn!("{} search failed, using in-memory catalog: {err}", store.name());
                return None;
            }
        };

        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        let scored = rows
            .into_iter()
            .map(|(entity, distance)| {
                let entity = match cache.get(&entity.id) {
                    Some(cached) if **cached == entity => cached.clone(),
                    _ => Arc::new(entity),
                };
                (entity, 1.0 - distance)
            })
            .collect();

        Some(rank_scored(scored, top_n))
    }

    async fn ensure_hydrated(&self) -> Result<()> {
        self.hydrated.get_or_try_init(|| self.hydrate()).await?;
        Ok(())
    }

    async fn hydrate(&self) -> Result<()> {
        let attempt = self.tracker.begin();

        let entities = match self.load_from_store().await {
            Some(entities) if !entities.is_empty() => entities,
            _ => self.load_from_seed().await?,
        };

        let count = entities.len();
        {
            let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
            // entries upserted before hydration are newer than the source
            for entity in entities {
                cache.entry(entity.id).or_insert_with(|| Arc::new(entity));
            }
        }

        attempt.finish();
        log::info!("hydrated catalog with {count} entities");
        Ok(())
    }

    async fn load_from_store(&self) -> Option<Vec<Entity>> {
        let store = self.store.as_ref()?;

        let rows = match self.with_timeout(store.load_all()).await {
            Ok(rows) => rows,
            Err(err) => {
                log::warn!("loading catalog from {} failed: {err}", store.name());
                return None;
            }
        };

        let mut entities = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id;
            match row.validate() {
                Ok(entity) => entities.push(entity),
                Err(err) => {
                    log::warn!("{} holds an invalid entity {id}: {err}", store.name());
                    return None;
                }
            }
        }
        Some(entities)
    }

    async fn load_from_seed(&self) -> Result<Vec<Entity>> {
        let path = self.config.seed_path.clone();
        let synthesizer = self.synthesizer.clone();

        // file read and parse run on the blocking pool
        tokio::task::spawn_blocking(move || -> Result<Vec<Entity>> {
            match load_seed(&path, &synthesizer)? {
                Some(entities) => Ok(entities),
                None => {
                    log::info!("seed file {} not found, starting with an empty catalog", path.display());
                    Ok(Vec::new())
                }
            }
        })
        .await
        .map_err(|e| RepositoryError::Task(e.to_string()))?
    }

    fn snapshot(&self) -> Vec<Arc<Entity>> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        let mut entities: Vec<_> = cache.values().cloned().collect();
        entities.sort_by_key(|entity| entity.id);
        entities
    }

    async fn with_timeout<T>(
        &self,
        call: impl Future<Output = std::result::Result<T, StoreError>>,
    ) -> Result<T> {
        let limit = self.config.store_timeout;
        tokio::time::timeout(limit, call)
            .await
            .map_err(|_| RepositoryError::StoreTimeout(limit))?
            .map_err(RepositoryError::from)
    }
}
