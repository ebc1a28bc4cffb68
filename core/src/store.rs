//! Chat session and message persistence.
//!
//! The store hides the SQLite plumbing from the request handlers: every
//! public method hops to a blocking thread, grabs a pooled connection, and
//! runs plain SQL. The user turn and the assistant turn of one exchange are
//! written as independent calls, not a transaction.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::task::spawn_blocking;
use uuid::Uuid;

use crate::db::DbPool;
use crate::turn::ConversationTurn;

#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub selected_models: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    pub id: String,
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub model_responses: Option<serde_json::Value>,
    pub created_at: i64,
}

#[derive(Clone)]
pub struct ConversationStore {
    pool: DbPool,
}

impl ConversationStore {
    pub fn new(pool: DbPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }

    pub async fn create_session(
        &self,
        user_id: &str,
        title: &str,
        selected_models: &[String],
    ) -> Result<SessionRecord> {
        let pool = self.pool.clone();
        let user_id = user_id.to_string();
        let title = title.to_string();
        let selected_models = selected_models.to_vec();
        spawn_blocking(move || {
            let conn = pool.get()?;
            insert_session(&conn, &user_id, &title, &selected_models)
        })
        .await
        .map_err(|err| anyhow!(err.to_string()))?
    }

    /// Sessions for one user, most recently updated first.
    pub async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionRecord>> {
        let pool = self.pool.clone();
        let user_id = user_id.to_string();
        spawn_blocking(move || {
            let conn = pool.get()?;
            select_sessions(&conn, &user_id)
        })
        .await
        .map_err(|err| anyhow!(err.to_string()))?
    }

    /// A single session, scoped to its owner.
    pub async fn get_session(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<Option<SessionRecord>> {
        let pool = self.pool.clone();
        let session_id = session_id.to_string();
        let user_id = user_id.to_string();
        spawn_blocking(move || {
            let conn = pool.get()?;
            select_session(&conn, &session_id, &user_id)
        })
        .await
        .map_err(|err| anyhow!(err.to_string()))?
    }

    pub async fn rename_session(&self, session_id: &str, title: &str) -> Result<()> {
        let pool = self.pool.clone();
        let session_id = session_id.to_string();
        let title = title.to_string();
        spawn_blocking(move || {
            let conn = pool.get()?;
            let now = OffsetDateTime::now_utc().unix_timestamp();
            conn.execute(
                "UPDATE sessions SET title = ?1, updated_at = ?2 WHERE id = ?3",
                params![title, now, session_id],
            )?;
            Ok(())
        })
        .await
        .map_err(|err| anyhow!(err.to_string()))?
    }

    /// Remove a session together with its messages.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        let pool = self.pool.clone();
        let session_id = session_id.to_string();
        spawn_blocking(move || {
            let conn = pool.get()?;
            conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
            conn.execute(
                "DELETE FROM messages WHERE session_id = ?1",
                params![session_id],
            )?;
            Ok(())
        })
        .await
        .map_err(|err| anyhow!(err.to_string()))?
    }

    pub async fn list_messages(&self, session_id: &str) -> Result<Vec<MessageRecord>> {
        let pool = self.pool.clone();
        let session_id = session_id.to_string();
        spawn_blocking(move || {
            let conn = pool.get()?;
            select_messages(&conn, &session_id)
        })
        .await
        .map_err(|err| anyhow!(err.to_string()))?
    }

    pub async fn append_turn(
        &self,
        session_id: &str,
        turn: ConversationTurn,
    ) -> Result<MessageRecord> {
        let pool = self.pool.clone();
        let session_id = session_id.to_string();
        spawn_blocking(move || {
            let conn = pool.get()?;
            insert_turn(&conn, &session_id, &turn)
        })
        .await
        .map_err(|err| anyhow!(err.to_string()))?
    }

    /// Bump the session's `updated_at` so it sorts to the top of the list.
    pub async fn touch_session(&self, session_id: &str) -> Result<()> {
        let pool = self.pool.clone();
        let session_id = session_id.to_string();
        spawn_blocking(move || {
            let conn = pool.get()?;
            let now = OffsetDateTime::now_utc().unix_timestamp();
            conn.execute(
                "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
                params![now, session_id],
            )?;
            Ok(())
        })
        .await
        .map_err(|err| anyhow!(err.to_string()))?
    }
}

fn session_from_row(row: &Row) -> rusqlite::Result<SessionRecord> {
    let models_json: String = row.get(3)?;
    let selected_models: Vec<String> = serde_json::from_str(&models_json).unwrap_or_default();
    Ok(SessionRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        selected_models,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn message_from_row(row: &Row) -> rusqlite::Result<MessageRecord> {
    let responses_json: Option<String> = row.get(4)?;
    let model_responses = responses_json.and_then(|raw| serde_json::from_str(&raw).ok());
    Ok(MessageRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        model_responses,
        created_at: row.get(5)?,
    })
}

pub fn insert_session(
    conn: &Connection,
    user_id: &str,
    title: &str,
    selected_models: &[String],
) -> Result<SessionRecord> {
    let id = Uuid::new_v4().to_string();
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let models_json = serde_json::to_string(selected_models)?;
    conn.execute(
        "INSERT INTO sessions (id, user_id, title, selected_models_json, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![id, user_id, title, models_json, now],
    )?;
    Ok(SessionRecord {
        id,
        user_id: user_id.to_string(),
        title: title.to_string(),
        selected_models: selected_models.to_vec(),
        created_at: now,
        updated_at: now,
    })
}

fn select_sessions(conn: &Connection, user_id: &str) -> Result<Vec<SessionRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, title, selected_models_json, created_at, updated_at
         FROM sessions WHERE user_id = ?1 ORDER BY updated_at DESC",
    )?;
    let rows = stmt.query_map(params![user_id], session_from_row)?;

    let mut sessions = Vec::new();
    for row in rows {
        sessions.push(row?);
    }
    Ok(sessions)
}

fn select_session(
    conn: &Connection,
    session_id: &str,
    user_id: &str,
) -> Result<Option<SessionRecord>> {
    let record = conn
        .query_row(
            "SELECT id, user_id, title, selected_models_json, created_at, updated_at
             FROM sessions WHERE id = ?1 AND user_id = ?2",
            params![session_id, user_id],
            session_from_row,
        )
        .optional()?;
    Ok(record)
}

fn select_messages(conn: &Connection, session_id: &str) -> Result<Vec<MessageRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, session_id, role, content, model_responses_json, created_at
         FROM messages WHERE session_id = ?1 ORDER BY created_at ASC, rowid ASC",
    )?;
    let rows = stmt.query_map(params![session_id], message_from_row)?;

    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

pub fn insert_turn(
    conn: &Connection,
    session_id: &str,
    turn: &ConversationTurn,
) -> Result<MessageRecord> {
    let id = Uuid::new_v4().to_string();
    let responses_json = turn
        .model_responses
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    conn.execute(
        "INSERT INTO messages (id, session_id, role, content, model_responses_json, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id,
            session_id,
            turn.role.as_str(),
            turn.content,
            responses_json,
            turn.timestamp,
        ],
    )?;
    Ok(MessageRecord {
        id,
        session_id: session_id.to_string(),
        role: turn.role.as_str().to_string(),
        content: turn.content.clone(),
        model_responses: turn
            .model_responses
            .as_ref()
            .map(|map| serde_json::to_value(map))
            .transpose()?,
        created_at: turn.timestamp,
    })
}
