//! Model catalog records and lookups.
//!
//! The catalog is owned by the admin surface; from the chat pipeline's point
//! of view it is read-only and is consulted fresh on every request through
//! the [`ModelCatalog`] trait.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::task::spawn_blocking;

use crate::db::DbPool;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    pub id: String,
    /// Identifier the UI used before catalog rows got stable primary keys.
    pub legacy_id: Option<String>,
    /// Name the hosting provider expects in completion requests.
    pub name: String,
    pub display_name: String,
    pub provider: String,
    pub description: Option<String>,
    pub status: String,
}

/// Read-only lookup contract consumed by the resolver.
#[async_trait]
pub trait ModelCatalog: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<ModelRecord>>;
    async fn find_by_legacy_id(&self, id: &str) -> Result<Option<ModelRecord>>;
}

/// Catalog backed by the SQLite `models` table.
#[derive(Clone)]
pub struct SqliteCatalog {
    pool: DbPool,
}

impl SqliteCatalog {
    pub fn new(pool: DbPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }
}

#[async_trait]
impl ModelCatalog for SqliteCatalog {
    async fn find_by_id(&self, id: &str) -> Result<Option<ModelRecord>> {
        let pool = self.pool.clone();
        let id = id.to_string();
        spawn_blocking(move || {
            let conn = pool.get()?;
            get_model(&conn, &id)
        })
        .await
        .map_err(|err| anyhow!(err.to_string()))?
    }

    async fn find_by_legacy_id(&self, id: &str) -> Result<Option<ModelRecord>> {
        let pool = self.pool.clone();
        let id = id.to_string();
        spawn_blocking(move || {
            let conn = pool.get()?;
            get_model_by_legacy_id(&conn, &id)
        })
        .await
        .map_err(|err| anyhow!(err.to_string()))?
    }
}

const MODEL_COLUMNS: &str =
    "id, legacy_id, name, display_name, provider, description, status";

fn model_from_row(row: &Row) -> rusqlite::Result<ModelRecord> {
    Ok(ModelRecord {
        id: row.get(0)?,
        legacy_id: row.get(1)?,
        name: row.get(2)?,
        display_name: row.get(3)?,
        provider: row.get(4)?,
        description: row.get(5)?,
        status: row.get(6)?,
    })
}

pub fn get_model(conn: &Connection, id: &str) -> Result<Option<ModelRecord>> {
    let record = conn
        .query_row(
            &format!("SELECT {MODEL_COLUMNS} FROM models WHERE id = ?1"),
            params![id],
            model_from_row,
        )
        .optional()?;
    Ok(record)
}

pub fn get_model_by_legacy_id(conn: &Connection, legacy_id: &str) -> Result<Option<ModelRecord>> {
    let record = conn
        .query_row(
            &format!("SELECT {MODEL_COLUMNS} FROM models WHERE legacy_id = ?1"),
            params![legacy_id],
            model_from_row,
        )
        .optional()?;
    Ok(record)
}

/// Models surfaced to the picker UI.
pub fn list_active_models(conn: &Connection) -> Result<Vec<ModelRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MODEL_COLUMNS} FROM models WHERE status = 'active' ORDER BY display_name"
    ))?;
    let rows = stmt.query_map([], model_from_row)?;

    let mut models = Vec::new();
    for row in rows {
        models.push(row?);
    }
    Ok(models)
}

struct ModelSeed {
    id: &'static str,
    legacy_id: Option<&'static str>,
    name: &'static str,
    display: &'static str,
    provider: &'static str,
    description: &'static str,
}

const MODEL_SEEDS: &[ModelSeed] = &[
    ModelSeed {
        id: "llama-3-3-70b",
        legacy_id: Some("llama3-70b"),
        name: "llama-3.3-70b-versatile",
        display: "Llama 3.3 70B",
        provider: "Groq",
        description: "Versatile general-purpose model with strong reasoning.",
    },
    ModelSeed {
        id: "llama-3-1-8b",
        legacy_id: Some("llama3-8b"),
        name: "llama-3.1-8b-instant",
        display: "Llama 3.1 8B",
        provider: "Groq",
        description: "Low-latency model for quick comparisons.",
    },
    ModelSeed {
        id: "mixtral-8x7b",
        legacy_id: None,
        name: "mixtral-8x7b-32768",
        display: "Mixtral 8x7B",
        provider: "Groq",
        description: "Mixture-of-experts model with a long context window.",
    },
    ModelSeed {
        id: "gemma2-9b",
        legacy_id: None,
        name: "gemma2-9b-it",
        display: "Gemma 2 9B",
        provider: "Groq",
        description: "Compact instruction-tuned model.",
    },
];

/// Upsert the default catalog so a fresh install has something to compare.
pub fn seed_defaults(conn: &Connection) -> Result<()> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    for seed in MODEL_SEEDS {
        conn.execute(
            "INSERT INTO models (id, legacy_id, name, display_name, provider, description, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'active', ?7, ?7)
             ON CONFLICT(id) DO UPDATE SET
                 legacy_id = excluded.legacy_id,
                 name = excluded.name,
                 display_name = excluded.display_name,
                 provider = excluded.provider,
                 description = excluded.description,
                 updated_at = excluded.updated_at",
            params![
                seed.id,
                seed.legacy_id,
                seed.name,
                seed.display,
                seed.provider,
                seed.description,
                now,
            ],
        )?;
    }
    Ok(())
}
