//! Version 1 of the request-handler surface.
//!
//! Handlers are intentionally thin wrappers that validate input, execute
//! work on background threads where needed, and return JSON-friendly
//! payloads to the web layer. Authentication happens upstream; handlers
//! receive an already-verified [`Caller`] or `None`.

use std::sync::Arc;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::task::spawn_blocking;

use crate::accounts::{self, Subscription};
use crate::catalog::{self, ModelCatalog, ModelRecord, SqliteCatalog};
use crate::db::DbPool;
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::errors::PanelError;
use crate::logging::log_event;
use crate::provider::CompletionProvider;
use crate::settings::{self, SystemSettings};
use crate::store::{ConversationStore, MessageRecord, SessionRecord};
use crate::turn::{self, ConversationTurn};

/// Authenticated caller descriptor supplied by the external auth layer.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: String,
    pub subscription: Subscription,
}

/// Shared state injected into each handler.
#[derive(Clone)]
pub struct ApiState {
    pub db: DbPool,
    pub store: Arc<ConversationStore>,
    pub chat: Arc<ChatService>,
}

impl ApiState {
    pub fn new(db: DbPool, provider: Arc<dyn CompletionProvider>) -> Self {
        let catalog: Arc<dyn ModelCatalog> = SqliteCatalog::new(db.clone());
        let store = ConversationStore::new(db.clone());
        let chat = ChatService::new(db.clone(), catalog, provider, store.clone());
        Self { db, store, chat }
    }
}

/// Runs the chat pipeline for one inbound message: persist the user turn,
/// fan out, assemble, persist the assistant turn when anything succeeded.
pub struct ChatService {
    db: DbPool,
    dispatcher: Dispatcher,
    store: Arc<ConversationStore>,
}

impl ChatService {
    pub fn new(
        db: DbPool,
        catalog: Arc<dyn ModelCatalog>,
        provider: Arc<dyn CompletionProvider>,
        store: Arc<ConversationStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            db,
            dispatcher: Dispatcher::new(catalog, provider),
            store,
        })
    }

    pub async fn run(
        &self,
        message: &str,
        model_ids: &[String],
        session_id: Option<&str>,
    ) -> Vec<DispatchOutcome> {
        // The user turn is written before dispatch so history shows it even
        // when every model fails. Degraded persistence never fails the call.
        if let Some(session_id) = session_id {
            let user_turn = ConversationTurn::user(message);
            if let Err(err) = self.store.append_turn(session_id, user_turn).await {
                log::warn!("failed to persist user turn for session {session_id}: {err:#}");
            }
        }

        let outcomes = self.dispatcher.dispatch(message, model_ids).await;
        let assembled = turn::assemble(outcomes);

        if let Some(session_id) = session_id {
            if let Some(assistant_turn) = assembled.assistant_turn {
                match self.store.append_turn(session_id, assistant_turn).await {
                    Ok(_) => {
                        if let Err(err) = self.store.touch_session(session_id).await {
                            log::warn!("failed to touch session {session_id}: {err:#}");
                        }
                    }
                    Err(err) => {
                        log::warn!(
                            "failed to persist assistant turn for session {session_id}: {err:#}"
                        );
                    }
                }
            }
        }

        self.log_batch(model_ids.len(), &assembled.responses);
        assembled.responses
    }

    fn log_batch(&self, requested: usize, outcomes: &[DispatchOutcome]) {
        let pool = self.db.clone();
        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        tokio::spawn(async move {
            if let Ok(conn) = pool.get() {
                let _ = log_event(
                    &conn,
                    if succeeded == requested { "info" } else { "warn" },
                    Some("CHT-0200"),
                    "chat.dispatch",
                    "chat fan-out settled",
                    None,
                    Some(serde_json::json!({
                        "requested": requested,
                        "succeeded": succeeded,
                    })),
                );
            }
        });
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    pub model_ids: Vec<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub responses: Vec<DispatchOutcome>,
}

/// Handle one inbound chat message end to end.
pub async fn chat(
    state: &ApiState,
    caller: Option<&Caller>,
    input: ChatRequest,
) -> Result<ChatResponse, PanelError> {
    // Configuration gate, fetched fresh on every call.
    let system = load_system_settings(&state.db).await?;
    if system.maintenance_mode {
        return Err(PanelError::Maintenance);
    }

    let caller = caller.ok_or(PanelError::Unauthorized)?;

    if input.message.trim().is_empty() || input.model_ids.is_empty() {
        return Err(PanelError::MissingInput);
    }

    let limit = caller.subscription.model_limit();
    if input.model_ids.len() > limit {
        return Err(PanelError::ModelLimitExceeded {
            requested: input.model_ids.len(),
            limit,
        });
    }

    let responses = state
        .chat
        .run(&input.message, &input.model_ids, input.session_id.as_deref())
        .await;
    Ok(ChatResponse { responses })
}

/// Look a user up and build the caller descriptor the handlers expect.
pub async fn resolve_caller(state: &ApiState, user_id: &str) -> Result<Option<Caller>, PanelError> {
    let pool = state.db.clone();
    let user_id = user_id.to_string();
    let user = spawn_blocking(move || {
        let conn = pool.get()?;
        accounts::load_user(&conn, &user_id)
    })
    .await
    .map_err(|err| anyhow!(err.to_string()))??;

    Ok(user.map(|u| Caller {
        user_id: u.id,
        subscription: u.subscription,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionInput {
    pub title: String,
    #[serde(default)]
    pub selected_models: Vec<String>,
}

pub async fn create_session(
    state: &ApiState,
    caller: Option<&Caller>,
    input: CreateSessionInput,
) -> Result<SessionRecord, PanelError> {
    let caller = caller.ok_or(PanelError::Unauthorized)?;
    let record = state
        .store
        .create_session(&caller.user_id, &input.title, &input.selected_models)
        .await?;
    Ok(record)
}

pub async fn list_sessions(
    state: &ApiState,
    caller: Option<&Caller>,
) -> Result<Vec<SessionRecord>, PanelError> {
    let caller = caller.ok_or(PanelError::Unauthorized)?;
    Ok(state.store.list_sessions(&caller.user_id).await?)
}

pub async fn get_session(
    state: &ApiState,
    caller: Option<&Caller>,
    session_id: &str,
) -> Result<SessionRecord, PanelError> {
    let caller = caller.ok_or(PanelError::Unauthorized)?;
    state
        .store
        .get_session(session_id, &caller.user_id)
        .await?
        .ok_or(PanelError::SessionNotFound)
}

pub async fn list_session_messages(
    state: &ApiState,
    caller: Option<&Caller>,
    session_id: &str,
) -> Result<Vec<MessageRecord>, PanelError> {
    let caller = caller.ok_or(PanelError::Unauthorized)?;
    // Scope the lookup to the owner before reading history.
    state
        .store
        .get_session(session_id, &caller.user_id)
        .await?
        .ok_or(PanelError::SessionNotFound)?;
    Ok(state.store.list_messages(session_id).await?)
}

pub async fn rename_session(
    state: &ApiState,
    caller: Option<&Caller>,
    session_id: &str,
    title: &str,
) -> Result<(), PanelError> {
    let caller = caller.ok_or(PanelError::Unauthorized)?;
    state
        .store
        .get_session(session_id, &caller.user_id)
        .await?
        .ok_or(PanelError::SessionNotFound)?;
    state.store.rename_session(session_id, title).await?;
    Ok(())
}

pub async fn delete_session(
    state: &ApiState,
    caller: Option<&Caller>,
    session_id: &str,
) -> Result<(), PanelError> {
    let caller = caller.ok_or(PanelError::Unauthorized)?;
    state
        .store
        .get_session(session_id, &caller.user_id)
        .await?
        .ok_or(PanelError::SessionNotFound)?;
    state.store.delete_session(session_id).await?;
    Ok(())
}

/// Active catalog entries for the model picker.
pub async fn list_models(state: &ApiState) -> Result<Vec<ModelRecord>, PanelError> {
    let pool = state.db.clone();
    let models = spawn_blocking(move || {
        let conn = pool.get()?;
        catalog::list_active_models(&conn)
    })
    .await
    .map_err(|err| anyhow!(err.to_string()))??;
    Ok(models)
}

pub async fn get_system_settings(state: &ApiState) -> Result<SystemSettings, PanelError> {
    Ok(load_system_settings(&state.db).await?)
}

pub async fn update_system_settings(
    state: &ApiState,
    input: SystemSettings,
) -> Result<SystemSettings, PanelError> {
    let pool = state.db.clone();
    let updated = spawn_blocking(move || {
        let conn = pool.get()?;
        settings::update_settings(&conn, &input)?;
        let _ = log_event(
            &conn,
            "info",
            Some("SYS-0001"),
            "system.settings",
            "system settings updated",
            None,
            None,
        );
        settings::load_settings(&conn)
    })
    .await
    .map_err(|err| anyhow!(err.to_string()))??;
    Ok(updated)
}

/// Store (or clear, when blank) the completion provider's API key.
pub async fn set_provider_credential(
    state: &ApiState,
    provider: &str,
    api_key: &str,
) -> Result<(), PanelError> {
    let pool = state.db.clone();
    let provider = provider.to_string();
    let api_key = api_key.to_string();
    spawn_blocking(move || {
        let conn = pool.get()?;
        settings::store_provider_credential(&conn, &provider, &api_key)
    })
    .await
    .map_err(|err| anyhow!(err.to_string()))??;
    Ok(())
}

/// Simple health-check endpoint for UI components.
pub fn ping() -> serde_json::Value {
    serde_json::json!({
        "ok": true,
        "ts": OffsetDateTime::now_utc().unix_timestamp(),
    })
}

/// Inspect the SQLite catalog to confirm the database is reachable.
pub fn db_status(state: &ApiState) -> Result<serde_json::Value, PanelError> {
    let conn = state.db.get().map_err(|e| anyhow!(e.to_string()))?;
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='table'")
        .map_err(|e| anyhow!(e.to_string()))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| anyhow!(e.to_string()))?;
    let mut names = Vec::new();
    for r in rows {
        names.push(r.map_err(|e| anyhow!(e.to_string()))?);
    }
    Ok(serde_json::json!({ "ok": true, "tables": names }))
}

async fn load_system_settings(db: &DbPool) -> anyhow::Result<SystemSettings> {
    let pool = db.clone();
    spawn_blocking(move || {
        let conn = pool.get()?;
        settings::load_settings(&conn)
    })
    .await
    .map_err(|err| anyhow!(err.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use crate::provider::Completion;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use rusqlite::params;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    /// Per-model scripted provider that counts every completion call.
    struct ScriptedProvider {
        calls: AtomicUsize,
        replies: HashMap<String, Result<String, String>>,
    }

    impl ScriptedProvider {
        fn new(replies: &[(&str, Result<&str, &str>)]) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                replies: replies
                    .iter()
                    .map(|(model, reply)| {
                        (
                            model.to_string(),
                            reply.map(str::to_string).map_err(str::to_string),
                        )
                    })
                    .collect(),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        async fn complete(&self, _message: &str, model_name: &str) -> Result<Completion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.replies.get(model_name) {
                Some(Ok(content)) => Ok(Completion {
                    content: content.clone(),
                    model: model_name.to_string(),
                }),
                Some(Err(message)) => Err(anyhow!("{message}")),
                None => Err(anyhow!("no script for {model_name}")),
            }
        }
    }

    fn test_state(provider: Arc<ScriptedProvider>) -> ApiState {
        let dir = std::env::temp_dir().join(format!("panel-test-{}", Uuid::new_v4()));
        let db = init_db(dir).unwrap();
        ApiState::new(db, provider)
    }

    /// Replace the seeded catalog with the models a test cares about.
    fn install_models(state: &ApiState, models: &[(&str, &str, &str)]) {
        let conn = state.db.get().unwrap();
        conn.execute("DELETE FROM models", []).unwrap();
        for (id, name, display) in models {
            conn.execute(
                "INSERT INTO models (id, legacy_id, name, display_name, provider, description, status, created_at, updated_at)
                 VALUES (?1, NULL, ?2, ?3, 'Test', NULL, 'active', 0, 0)",
                params![id, name, display],
            )
            .unwrap();
        }
    }

    fn free_caller() -> Caller {
        Caller {
            user_id: "u1".to_string(),
            subscription: Subscription::Free,
        }
    }

    fn request(message: &str, model_ids: &[&str], session_id: Option<&str>) -> ChatRequest {
        ChatRequest {
            message: message.to_string(),
            model_ids: model_ids.iter().map(|s| s.to_string()).collect(),
            session_id: session_id.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn mixed_batch_returns_both_and_persists_only_successes() {
        let provider = ScriptedProvider::new(&[(
            "test-model-1",
            Ok("Gravity pulls mass together."),
        )]);
        let state = test_state(provider.clone());
        install_models(&state, &[("m1", "test-model-1", "Test Model One")]);

        let caller = free_caller();
        let session = create_session(
            &state,
            Some(&caller),
            CreateSessionInput {
                title: "Physics".to_string(),
                selected_models: vec!["m1".to_string(), "m2".to_string()],
            },
        )
        .await
        .unwrap();

        let response = chat(
            &state,
            Some(&caller),
            request("Summarize gravity", &["m1", "m2"], Some(&session.id)),
        )
        .await
        .unwrap();

        assert_eq!(response.responses.len(), 2);
        assert_eq!(response.responses[0].model_id(), "m1");
        assert_eq!(
            response.responses[0].content(),
            Some("Gravity pulls mass together.")
        );
        assert_eq!(response.responses[1].model_id(), "m2");
        assert_eq!(response.responses[1].error(), Some("Model m2 not found"));

        // History round-trip: user turn first, then the assistant turn
        // carrying only the successful model with zeroed counters.
        let messages = list_session_messages(&state, Some(&caller), &session.id)
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[0].content, "Summarize gravity");

        let stored = messages[1].model_responses.as_ref().unwrap();
        assert_eq!(
            stored["m1"]["content"],
            serde_json::json!("Gravity pulls mass together.")
        );
        assert_eq!(stored["m1"]["likes"], serde_json::json!(0));
        assert_eq!(stored["m1"]["dislikes"], serde_json::json!(0));
        assert!(stored.get("m2").is_none());
    }

    #[tokio::test]
    async fn all_failed_batch_skips_the_assistant_turn() {
        let provider = ScriptedProvider::new(&[("test-model-1", Err("upstream error"))]);
        let state = test_state(provider.clone());
        install_models(&state, &[("m1", "test-model-1", "Test Model One")]);

        let caller = free_caller();
        let session = create_session(
            &state,
            Some(&caller),
            CreateSessionInput {
                title: "Chat".to_string(),
                selected_models: vec![],
            },
        )
        .await
        .unwrap();

        let response = chat(
            &state,
            Some(&caller),
            request("hello", &["m1", "ghost"], Some(&session.id)),
        )
        .await
        .unwrap();
        assert_eq!(response.responses.len(), 2);
        assert!(response.responses.iter().all(|o| !o.is_success()));

        let messages = list_session_messages(&state, Some(&caller), &session.id)
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "user");
    }

    #[tokio::test]
    async fn degraded_persistence_still_returns_every_response() {
        let provider = ScriptedProvider::new(&[("test-model-1", Ok("answer"))]);
        let state = test_state(provider.clone());
        install_models(&state, &[("m1", "test-model-1", "Test Model One")]);

        let caller = free_caller();
        let session = create_session(
            &state,
            Some(&caller),
            CreateSessionInput {
                title: "Chat".to_string(),
                selected_models: vec![],
            },
        )
        .await
        .unwrap();

        // History writes start failing mid-flight; the comparison the
        // caller asked for must come back anyway.
        state
            .db
            .get()
            .unwrap()
            .execute("DROP TABLE messages", [])
            .unwrap();

        let response = chat(
            &state,
            Some(&caller),
            request("hello", &["m1", "ghost"], Some(&session.id)),
        )
        .await
        .unwrap();

        assert_eq!(response.responses.len(), 2);
        assert_eq!(response.responses[0].model_id(), "m1");
        assert_eq!(response.responses[0].content(), Some("answer"));
        assert_eq!(response.responses[1].model_id(), "ghost");
        assert_eq!(response.responses[1].error(), Some("Model ghost not found"));
    }

    #[tokio::test]
    async fn over_limit_request_is_rejected_before_any_dispatch() {
        let provider = ScriptedProvider::new(&[]);
        let state = test_state(provider.clone());

        let six: Vec<&str> = vec!["a", "b", "c", "d", "e", "f"];
        let err = chat(&state, Some(&free_caller()), request("hello", &six, None))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PanelError::ModelLimitExceeded {
                requested: 6,
                limit: 5
            }
        ));
        assert_eq!(provider.calls(), 0);

        // A pro caller may fan the same request out.
        let pro = Caller {
            user_id: "u2".to_string(),
            subscription: Subscription::Pro,
        };
        let response = chat(&state, Some(&pro), request("hello", &six, None))
            .await
            .unwrap();
        assert_eq!(response.responses.len(), 6);
    }

    #[tokio::test]
    async fn maintenance_mode_rejects_before_auth_and_dispatch() {
        let provider = ScriptedProvider::new(&[]);
        let state = test_state(provider.clone());
        {
            let conn = state.db.get().unwrap();
            let mut system = settings::load_settings(&conn).unwrap();
            system.maintenance_mode = true;
            settings::update_settings(&conn, &system).unwrap();
        }

        let err = chat(&state, Some(&free_caller()), request("hello", &["m1"], None))
            .await
            .unwrap_err();
        assert!(matches!(err, PanelError::Maintenance));
        assert_eq!(err.status(), 503);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn empty_input_and_missing_caller_are_request_level_errors() {
        let provider = ScriptedProvider::new(&[]);
        let state = test_state(provider.clone());

        let err = chat(&state, None, request("hello", &["m1"], None))
            .await
            .unwrap_err();
        assert!(matches!(err, PanelError::Unauthorized));

        let err = chat(&state, Some(&free_caller()), request("   ", &["m1"], None))
            .await
            .unwrap_err();
        assert!(matches!(err, PanelError::MissingInput));

        let err = chat(&state, Some(&free_caller()), request("hello", &[], None))
            .await
            .unwrap_err();
        assert!(matches!(err, PanelError::MissingInput));

        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn legacy_model_id_resolves_and_answers_under_the_requested_id() {
        let provider = ScriptedProvider::new(&[("test-model-1", Ok("answer"))]);
        let state = test_state(provider.clone());
        {
            let conn = state.db.get().unwrap();
            conn.execute("DELETE FROM models", []).unwrap();
            conn.execute(
                "INSERT INTO models (id, legacy_id, name, display_name, provider, description, status, created_at, updated_at)
                 VALUES ('m1', 'old-m1', 'test-model-1', 'Test Model One', 'Test', NULL, 'active', 0, 0)",
                [],
            )
            .unwrap();
        }

        let response = chat(
            &state,
            Some(&free_caller()),
            request("hello", &["old-m1"], None),
        )
        .await
        .unwrap();
        assert_eq!(response.responses[0].model_id(), "old-m1");
        assert!(response.responses[0].is_success());
    }

    #[tokio::test]
    async fn session_crud_is_scoped_to_the_owner() {
        let provider = ScriptedProvider::new(&[]);
        let state = test_state(provider);

        let owner = free_caller();
        let other = Caller {
            user_id: "someone-else".to_string(),
            subscription: Subscription::Free,
        };

        let session = create_session(
            &state,
            Some(&owner),
            CreateSessionInput {
                title: "Mine".to_string(),
                selected_models: vec![],
            },
        )
        .await
        .unwrap();

        assert_eq!(list_sessions(&state, Some(&owner)).await.unwrap().len(), 1);
        assert!(list_sessions(&state, Some(&other)).await.unwrap().is_empty());

        let err = get_session(&state, Some(&other), &session.id)
            .await
            .unwrap_err();
        assert!(matches!(err, PanelError::SessionNotFound));

        rename_session(&state, Some(&owner), &session.id, "Renamed")
            .await
            .unwrap();
        let fetched = get_session(&state, Some(&owner), &session.id)
            .await
            .unwrap();
        assert_eq!(fetched.title, "Renamed");

        delete_session(&state, Some(&owner), &session.id)
            .await
            .unwrap();
        assert!(list_sessions(&state, Some(&owner)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn resolve_caller_reads_the_stored_subscription() {
        let provider = ScriptedProvider::new(&[]);
        let state = test_state(provider);
        {
            let conn = state.db.get().unwrap();
            conn.execute(
                "INSERT INTO users (id, email, name, subscription, subscription_end, role, banned, created_at)
                 VALUES ('u1', 'u1@example.com', NULL, 'pro', NULL, 'user', 0, 0)",
                [],
            )
            .unwrap();
        }

        let caller = resolve_caller(&state, "u1").await.unwrap().unwrap();
        assert_eq!(caller.subscription, Subscription::Pro);
        assert!(resolve_caller(&state, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn seeded_models_are_listed_for_the_picker() {
        let provider = ScriptedProvider::new(&[]);
        let state = test_state(provider);

        let models = list_models(&state).await.unwrap();
        assert!(!models.is_empty());
        assert!(models.iter().all(|m| m.status == "active"));
    }
}
