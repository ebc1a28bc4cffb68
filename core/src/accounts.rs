//! Subscription tiers and the out-of-band expiry sweep.
//!
//! The tier stored on the user row is the source of truth for the per-turn
//! model limit. Expired `pro` rows are only flipped back to `free` by the
//! sweep in [`crate::workers`], so a caller whose subscription lapsed
//! moments ago may still see the higher limit until the sweep runs.

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subscription {
    Free,
    Pro,
}

impl Subscription {
    /// Maximum number of models a caller may fan out to in one turn.
    pub fn model_limit(&self) -> usize {
        match self {
            Self::Free => 5,
            Self::Pro => 10,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
        }
    }

    /// Unknown values fall back to `free` rather than failing the request.
    pub fn parse(value: &str) -> Self {
        match value {
            "pro" => Self::Pro,
            _ => Self::Free,
        }
    }
}

impl Default for Subscription {
    fn default() -> Self {
        Self::Free
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub subscription: Subscription,
    pub subscription_end: Option<i64>,
    pub role: String,
    pub banned: bool,
    pub created_at: i64,
}

pub fn load_user(conn: &Connection, user_id: &str) -> Result<Option<UserRecord>> {
    let record = conn
        .query_row(
            "SELECT id, email, name, subscription, subscription_end, role, banned, created_at
             FROM users WHERE id = ?1",
            params![user_id],
            |row| {
                let subscription: String = row.get(3)?;
                Ok(UserRecord {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    name: row.get(2)?,
                    subscription: Subscription::parse(&subscription),
                    subscription_end: row.get(4)?,
                    role: row.get(5)?,
                    banned: row.get::<_, i64>(6)? != 0,
                    created_at: row.get(7)?,
                })
            },
        )
        .optional()?;
    Ok(record)
}

/// Flip `pro` users whose subscription ended before `now` back to `free`.
/// Returns how many rows were downgraded.
pub fn downgrade_expired(conn: &Connection, now: i64) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE users SET subscription = 'free'
         WHERE subscription = 'pro' AND subscription_end IS NOT NULL AND subscription_end < ?1",
        params![now],
    )?;
    Ok(changed)
}
