//! Global system settings and provider credential storage.
//!
//! Settings live as a single JSON value in `app_settings` and are read
//! fresh on every chat request, so flipping maintenance mode takes effect
//! immediately without any in-process mutable state.

use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD as B64_ENGINE;
use base64::Engine;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

const SETTINGS_KEY: &str = "system.global";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemSettings {
    pub site_name: String,
    pub support_email: String,
    pub maintenance_mode: bool,
    pub registration_enabled: bool,
    pub default_model: String,
    pub temperature: f32,
    pub system_prompt: String,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            site_name: "Panel".to_string(),
            support_email: "support@panel.chat".to_string(),
            maintenance_mode: false,
            registration_enabled: true,
            default_model: "llama-3.3-70b-versatile".to_string(),
            temperature: 0.7,
            system_prompt: "You are Panel, a helpful assistant that answers accurately and concisely.".to_string(),
        }
    }
}

/// Read the persisted settings, falling back to defaults when none exist.
pub fn load_settings(conn: &Connection) -> Result<SystemSettings> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM app_settings WHERE key = ?1",
            params![SETTINGS_KEY],
            |row| row.get(0),
        )
        .optional()?;

    match value {
        Some(raw) => Ok(serde_json::from_str(&raw)?),
        None => Ok(SystemSettings::default()),
    }
}

pub fn update_settings(conn: &Connection, settings: &SystemSettings) -> Result<()> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let payload = serde_json::to_string(settings)?;
    conn.execute(
        "INSERT INTO app_settings (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![SETTINGS_KEY, payload, now],
    )?;
    Ok(())
}

/// Store a provider API key, or remove it when the submitted key is blank.
pub fn store_provider_credential(conn: &Connection, provider: &str, api_key: &str) -> Result<()> {
    let trimmed = api_key.trim();
    if trimmed.is_empty() {
        conn.execute(
            "DELETE FROM provider_credentials WHERE provider = ?1",
            params![provider],
        )?;
        return Ok(());
    }

    let encoded = B64_ENGINE.encode(trimmed.as_bytes());
    let now = OffsetDateTime::now_utc().unix_timestamp();
    conn.execute(
        "INSERT INTO provider_credentials (provider, secret, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?3)
         ON CONFLICT(provider) DO UPDATE SET secret = excluded.secret, updated_at = excluded.updated_at",
        params![provider, encoded, now],
    )?;
    Ok(())
}

pub fn load_provider_credential(conn: &Connection, provider: &str) -> Result<Option<String>> {
    let secret: Option<String> = conn
        .query_row(
            "SELECT secret FROM provider_credentials WHERE provider = ?1",
            params![provider],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(s) = secret {
        let decoded = B64_ENGINE
            .decode(s.as_bytes())
            .map_err(|_| anyhow!("Failed to decode stored credential"))?;
        let value = String::from_utf8(decoded)
            .map_err(|_| anyhow!("Stored credential was not valid UTF-8"))?;
        Ok(Some(value))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection as SqliteConnection;

    fn settings_conn() -> SqliteConnection {
        let conn = SqliteConnection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE app_settings (key TEXT PRIMARY KEY, value TEXT NOT NULL, updated_at INTEGER NOT NULL);
             CREATE TABLE provider_credentials (provider TEXT PRIMARY KEY, secret TEXT NOT NULL, created_at INTEGER NOT NULL, updated_at INTEGER NOT NULL);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn missing_row_yields_defaults() {
        let conn = settings_conn();
        let settings = load_settings(&conn).unwrap();
        assert!(!settings.maintenance_mode);
        assert!(settings.registration_enabled);
        assert_eq!(settings.site_name, "Panel");
    }

    #[test]
    fn settings_round_trip() {
        let conn = settings_conn();
        let mut settings = SystemSettings::default();
        settings.maintenance_mode = true;
        settings.temperature = 0.3;
        update_settings(&conn, &settings).unwrap();

        let loaded = load_settings(&conn).unwrap();
        assert!(loaded.maintenance_mode);
        assert!((loaded.temperature - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn credential_store_encodes_and_blank_deletes() {
        let conn = settings_conn();
        store_provider_credential(&conn, "groq", "sk-test-123").unwrap();
        assert_eq!(
            load_provider_credential(&conn, "groq").unwrap().as_deref(),
            Some("sk-test-123")
        );

        store_provider_credential(&conn, "groq", "   ").unwrap();
        assert!(load_provider_credential(&conn, "groq").unwrap().is_none());
    }
}
