//! SQLite-backed [`EntityStore`].
//!
//! List columns are JSON text, embeddings are little-endian f32 blobs and
//! timestamps are RFC 3339 text. Similarity ordering runs inside SQLite via
//! the `cosine_distance(a, b)` scalar function registered on open.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection, Row};

use super::codec::{decode_embedding, encode_embedding};
use super::{EntityStore, Result, StoreError};
use crate::audit::AuditRecord;
use crate::catalog::{Entity, Stats};
use crate::semantic::vector;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS pokemon (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        types TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        genus TEXT,
        image_url TEXT NOT NULL DEFAULT '',
        generation INTEGER NOT NULL DEFAULT 0,
        height REAL,
        weight REAL,
        abilities TEXT NOT NULL DEFAULT '[]',
        stats TEXT NOT NULL DEFAULT '{}',
        embedding BLOB,
        model_version TEXT,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS analysis_requests (
        id TEXT PRIMARY KEY,
        client_address TEXT,
        user_agent TEXT,
        latency_ms INTEGER NOT NULL,
        top_match_id INTEGER NOT NULL,
        top_match_score REAL NOT NULL,
        created_at TEXT NOT NULL
    );
";

const ENTITY_COLUMNS: &str = "id, name, types, description, genus, image_url, generation, \
     height, weight, abilities, stats, embedding, model_version, updated_at";

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        log::debug!("opened sqlite store at {}", path.display());
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        register_functions(&conn)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| StoreError::Unavailable("connection mutex poisoned".to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// Audit rows in insertion order.
    pub async fn audit_records(&self) -> Result<Vec<AuditRecord>> {
        self.run(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, client_address, user_agent, latency_ms, top_match_id, top_match_score, created_at
                 FROM analysis_requests ORDER BY rowid",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, f64>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?;

            let mut records = Vec::new();
            for row in rows {
                let (id, client_address, user_agent, latency_ms, top_match_id, score, created_at) = row?;
                records.push(AuditRecord {
                    id,
                    client_address,
                    user_agent,
                    latency_ms: to_unsigned(latency_ms, "latency_ms")?,
                    top_match_id: to_unsigned(top_match_id, "top_match_id")?,
                    top_match_score: score as f32,
                    created_at: parse_timestamp(&created_at)?,
                });
            }
            Ok(records)
        })
        .await
    }
}

#[async_trait]
impl EntityStore for SqliteStore {
    async fn load_all(&self) -> Result<Vec<Entity>> {
        self.run(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {ENTITY_COLUMNS} FROM pokemon ORDER BY id"))?;
            let rows = stmt.query_map([], EntityRow::from_row)?;

            let mut entities = Vec::new();
            for row in rows {
                entities.push(row?.into_entity()?);
            }
            Ok(entities)
        })
        .await
    }

    async fn upsert(&self, entity: &Entity) -> Result<()> {
        let entity = entity.clone();
        self.run(move |conn| {
            let types = serde_json::to_string(&entity.types)?;
            let abilities = serde_json::to_string(&entity.abilities)?;
            let stats = serde_json::to_string(&entity.stats)?;
            let embedding = entity.embedding.as_deref().map(encode_embedding);

            let tx = conn.transaction()?;
            tx.execute(
                &format!(
                    "INSERT INTO pokemon ({ENTITY_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                     ON CONFLICT(id) DO UPDATE SET
                        name = excluded.name,
                        types = excluded.types,
                        description = excluded.description,
                        genus = excluded.genus,
                        image_url = excluded.image_url,
                        generation = excluded.generation,
                        height = excluded.height,
                        weight = excluded.weight,
                        abilities = excluded.abilities,
                        stats = excluded.stats,
                        embedding = excluded.embedding,
                        model_version = excluded.model_version,
                        updated_at = excluded.updated_at"
                ),
                params![
                    to_signed(entity.id)?,
                    entity.name,
                    types,
                    entity.description,
                    entity.genus,
                    entity.image_url,
                    entity.generation,
                    entity.height,
                    entity.weight,
                    abilities,
                    stats,
                    embedding,
                    entity.model_version,
                    format_timestamp(&entity.updated_at),
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn update_embedding(
        &self,
        id: u64,
        embedding: &[f32],
        model_version: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<usize> {
        let blob = encode_embedding(embedding);
        let model_version = model_version.to_string();
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE pokemon SET embedding = ?1, model_version = ?2, updated_at = ?3 WHERE id = ?4",
                params![blob, model_version, format_timestamp(&updated_at), to_signed(id)?],
            )?;
            Ok(changed)
        })
        .await
    }

    async fn nearest(&self, query: &[f32], limit: usize) -> Result<Vec<(Entity, f64)>> {
        let blob = encode_embedding(query);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTITY_COLUMNS}, cosine_distance(embedding, ?1) AS distance
                 FROM pokemon
                 WHERE embedding IS NOT NULL
                 ORDER BY distance ASC, id ASC
                 LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![blob, limit], |row| {
                Ok((EntityRow::from_row(row)?, row.get::<_, f64>(14)?))
            })?;

            let mut nearest = Vec::new();
            for row in rows {
                let (row, distance) = row?;
                nearest.push((row.into_entity()?, distance));
            }
            Ok(nearest)
        })
        .await
    }

    async fn append_audit(&self, record: &AuditRecord) -> Result<()> {
        let record = record.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO analysis_requests
                    (id, client_address, user_agent, latency_ms, top_match_id, top_match_score, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.id,
                    record.client_address,
                    record.user_agent,
                    to_signed(record.latency_ms)?,
                    to_signed(record.top_match_id)?,
                    f64::from(record.top_match_score),
                    format_timestamp(&record.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

fn register_functions(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "cosine_distance",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let a: Option<Vec<u8>> = ctx.get(0)?;
            let b: Option<Vec<u8>> = ctx.get(1)?;
            let (Some(a), Some(b)) = (a, b) else {
                return Ok(None);
            };
            let a = decode_embedding(&a).map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
            let b = decode_embedding(&b).map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
            Ok(Some(vector::cosine_distance(&a, &b)))
        },
    )?;
    Ok(())
}

/// Raw column values of one `pokemon` row.
struct EntityRow {
    id: i64,
    name: String,
    types: String,
    description: String,
    genus: Option<String>,
    image_url: String,
    generation: u32,
    height: Option<f64>,
    weight: Option<f64>,
    abilities: String,
    stats: String,
    embedding: Option<Vec<u8>>,
    model_version: Option<String>,
    updated_at: String,
}

impl EntityRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            types: row.get(2)?,
            description: row.get(3)?,
            genus: row.get(4)?,
            image_url: row.get(5)?,
            generation: row.get(6)?,
            height: row.get(7)?,
            weight: row.get(8)?,
            abilities: row.get(9)?,
            stats: row.get(10)?,
            embedding: row.get(11)?,
            model_version: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    fn into_entity(self) -> Result<Entity> {
        let stats: Stats = serde_json::from_str(&self.stats)?;
        Ok(Entity {
            id: to_unsigned(self.id, "id")?,
            name: self.name,
            types: serde_json::from_str(&self.types)?,
            description: self.description,
            genus: self.genus,
            image_url: self.image_url,
            generation: self.generation,
            height: self.height,
            weight: self.weight,
            abilities: serde_json::from_str(&self.abilities)?,
            stats,
            embedding: self.embedding.as_deref().map(decode_embedding).transpose()?,
            model_version: self.model_version,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidDbValue(format!("bad timestamp {value:?}: {e}")))
}

fn to_signed(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| StoreError::InvalidDbValue(format!("{value} does not fit in INTEGER")))
}

fn to_unsigned(value: i64, column: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| StoreError::InvalidDbValue(format!("negative {column}: {value}")))
}
