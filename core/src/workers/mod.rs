//! Synchronous background jobs run off the request path.

use anyhow::Result;
use rusqlite::Connection;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::accounts;
use crate::logging::log_event;

pub fn enqueue_job(conn: &Connection, kind: &str, payload: serde_json::Value) -> rusqlite::Result<String> {
    let id = Uuid::new_v4().to_string();
    let now = OffsetDateTime::now_utc().unix_timestamp();
    conn.execute(
        "INSERT INTO jobs (id, kind, state, payload, created_at, updated_at) VALUES (?1, ?2, 'queued', ?3, ?4, ?5)",
        (id.as_str(), kind, payload.to_string(), now, now),
    )?;
    Ok(id)
}

/// Downgrade lapsed `pro` subscriptions. Scheduled by the deployment's cron;
/// chat requests between expiry and this sweep still see the old tier.
pub fn run_subscription_sweep(conn: &Connection) -> Result<usize> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let downgraded = accounts::downgrade_expired(conn, now)?;
    if downgraded > 0 {
        let _ = log_event(
            conn,
            "info",
            Some("SUB-0100"),
            "accounts.sweep",
            "expired subscriptions downgraded",
            None,
            Some(serde_json::json!({ "count": downgraded })),
        );
    }
    Ok(downgraded)
}
