//! Shared fixtures and `EntityStore` test doubles.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use crate::audit::AuditRecord;
use crate::catalog::Entity;
use crate::repository::{HybridRepository, RepositoryConfig};
use crate::semantic::{derive, MissingEmbeddingPolicy, SYNTH_MODEL_VERSION};
use crate::store::{EntityStore, Result, SqliteStore, StoreError};

pub const STARTERS: &[(u64, &str, &str)] = &[
    (1, "Bulbasaur", "grass"),
    (2, "Ivysaur", "grass"),
    (3, "Venusaur", "grass"),
    (4, "Charmander", "fire"),
    (5, "Charmeleon", "fire"),
    (7, "Squirtle", "water"),
];

pub fn pokemon(id: u64, name: &str, kind: &str) -> Entity {
    Entity::new(id, name, vec![kind.to_string()]).with_embedding(derive(name), SYNTH_MODEL_VERSION)
}

pub fn starters() -> Vec<Entity> {
    STARTERS
        .iter()
        .map(|&(id, name, kind)| pokemon(id, name, kind))
        .collect()
}

/// Seed JSON with only the required fields; embeddings get synthesized.
pub fn starters_seed_json() -> String {
    let records: Vec<_> = STARTERS
        .iter()
        .map(|&(id, name, kind)| serde_json::json!({"id": id, "name": name, "types": [kind]}))
        .collect();
    serde_json::Value::Array(records).to_string()
}

pub fn write_seed(dir: &Path, json: &str) -> PathBuf {
    let path = dir.join("seed.json");
    std::fs::write(&path, json).unwrap();
    path
}

pub fn config(seed_path: PathBuf) -> RepositoryConfig {
    RepositoryConfig {
        seed_path,
        store_timeout: Duration::from_millis(500),
        missing_embedding_policy: MissingEmbeddingPolicy::Exclude,
    }
}

/// Repository over the starters seed file, optionally backed by `store`.
pub fn seeded_repository(store: Option<Arc<dyn EntityStore>>) -> (HybridRepository, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let seed = write_seed(dir.path(), &starters_seed_json());
    (HybridRepository::new(config(seed), store), dir)
}

pub async fn sqlite_with(entities: &[Entity]) -> Arc<SqliteStore> {
    let store = SqliteStore::open_in_memory().unwrap();
    for entity in entities {
        store.upsert(entity).await.unwrap();
    }
    Arc::new(store)
}

/// Fails every call.
#[derive(Default)]
pub struct FailingStore {
    pub calls: AtomicUsize,
}

impl FailingStore {
    fn fail<T>(&self) -> Result<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

#[async_trait]
impl EntityStore for FailingStore {
    async fn load_all(&self) -> Result<Vec<Entity>> {
        self.fail()
    }

    async fn upsert(&self, _entity: &Entity) -> Result<()> {
        self.fail()
    }

    async fn update_embedding(
        &self,
        _id: u64,
        _embedding: &[f32],
        _model_version: &str,
        _updated_at: DateTime<Utc>,
    ) -> Result<usize> {
        self.fail()
    }

    async fn nearest(&self, _query: &[f32], _limit: usize) -> Result<Vec<(Entity, f64)>> {
        self.fail()
    }

    async fn append_audit(&self, _record: &AuditRecord) -> Result<()> {
        self.fail()
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Answers every call only after `delay`.
pub struct SlowStore {
    pub delay: Duration,
}

#[async_trait]
impl EntityStore for SlowStore {
    async fn load_all(&self) -> Result<Vec<Entity>> {
        tokio::time::sleep(self.delay).await;
        Ok(Vec::new())
    }

    async fn upsert(&self, _entity: &Entity) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    async fn update_embedding(
        &self,
        _id: u64,
        _embedding: &[f32],
        _model_version: &str,
        _updated_at: DateTime<Utc>,
    ) -> Result<usize> {
        tokio::time::sleep(self.delay).await;
        Ok(1)
    }

    async fn nearest(&self, _query: &[f32], _limit: usize) -> Result<Vec<(Entity, f64)>> {
        tokio::time::sleep(self.delay).await;
        Ok(Vec::new())
    }

    async fn append_audit(&self, _record: &AuditRecord) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    fn name(&self) -> &str {
        "slow"
    }
}

/// Wraps a `SqliteStore`, holding every upsert until the gate opens and
/// counting (slowed down) catalog loads.
pub struct InstrumentedStore {
    pub inner: SqliteStore,
    pub gate: Option<Notify>,
    pub load_delay: Duration,
    pub loads: AtomicUsize,
}

impl InstrumentedStore {
    pub fn new(inner: SqliteStore) -> Self {
        Self {
            inner,
            gate: None,
            load_delay: Duration::ZERO,
            loads: AtomicUsize::new(0),
        }
    }

    pub fn gated(mut self) -> Self {
        self.gate = Some(Notify::new());
        self
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }
}

#[async_trait]
impl EntityStore for InstrumentedStore {
    async fn load_all(&self) -> Result<Vec<Entity>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.load_delay).await;
        self.inner.load_all().await
    }

    async fn upsert(&self, entity: &Entity) -> Result<()> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.inner.upsert(entity).await
    }

    async fn update_embedding(
        &self,
        id: u64,
        embedding: &[f32],
        model_version: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<usize> {
        self.inner
            .update_embedding(id, embedding, model_version, updated_at)
            .await
    }

    async fn nearest(&self, query: &[f32], limit: usize) -> Result<Vec<(Entity, f64)>> {
        self.inner.nearest(query, limit).await
    }

    async fn append_audit(&self, record: &AuditRecord) -> Result<()> {
        self.inner.append_audit(record).await
    }

    fn name(&self) -> &str {
        "instrumented"
    }
}

/// Commits to `inner` at once but holds the acknowledgement of an embedding
/// update tagged `"slow"` for `lag`.
pub struct LaggingAckStore {
    pub inner: SqliteStore,
    pub lag: Duration,
}

#[async_trait]
impl EntityStore for LaggingAckStore {
    async fn load_all(&self) -> Result<Vec<Entity>> {
        self.inner.load_all().await
    }

    async fn upsert(&self, entity: &Entity) -> Result<()> {
        self.inner.upsert(entity).await
    }

    async fn update_embedding(
        &self,
        id: u64,
        embedding: &[f32],
        model_version: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<usize> {
        let updated = self
            .inner
            .update_embedding(id, embedding, model_version, updated_at)
            .await?;
        if model_version == "slow" {
            tokio::time::sleep(self.lag).await;
        }
        Ok(updated)
    }

    async fn nearest(&self, query: &[f32], limit: usize) -> Result<Vec<(Entity, f64)>> {
        self.inner.nearest(query, limit).await
    }

    async fn append_audit(&self, record: &AuditRecord) -> Result<()> {
        self.inner.append_audit(record).await
    }

    fn name(&self) -> &str {
        "lagging-ack"
    }
}
