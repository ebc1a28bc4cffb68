//! Completion provider contract and the hosted OpenAI-compatible client.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rusqlite::Connection;
use serde_json::Value;

use crate::settings;

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub model: String,
}

/// One completion call per model per request; retries are the caller's
/// problem and deliberately not implemented here.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, message: &str, model_name: &str) -> Result<Completion>;
}

/// Client for any OpenAI-compatible chat-completions endpoint.
pub struct HostedCompletionClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HostedCompletionClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(45))
            .user_agent("Panel-Core/0.1 (+https://github.com/panel-chat)")
            .build()
            .context("failed to construct HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key,
        })
    }

    /// Build the client with the key stored for `provider`, if any. Absent
    /// or blank credentials produce an unauthenticated client.
    pub fn from_stored_credential(
        conn: &Connection,
        provider: &str,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let api_key = settings::load_provider_credential(conn, provider)?;
        Self::new(base_url, api_key)
    }
}

#[async_trait]
impl CompletionProvider for HostedCompletionClient {
    async fn complete(&self, message: &str, model_name: &str) -> Result<Completion> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut request = self.client.post(url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let payload = serde_json::json!({
            "model": model_name,
            "messages": [{"role": "user", "content": message}],
            "temperature": 0.7,
            "max_tokens": 2000,
        });

        let response = request
            .json(&payload)
            .send()
            .await?
            .error_for_status()
            .map_err(|err| anyhow!("completion request for {model_name} failed: {err}"))?;
        let body: Value = response.json().await?;

        let content = body
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|msg| msg.get("content"))
            .and_then(|val| val.as_str())
            .unwrap_or_default()
            .to_string();

        Ok(Completion {
            content,
            model: model_name.to_string(),
        })
    }
}
