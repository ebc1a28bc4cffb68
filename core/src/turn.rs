//! Folds dispatch outcomes into storable conversation turns.
//!
//! A turn is immutable once assembled; the per-model like/dislike counters
//! start at zero here and are only ever changed by the reaction endpoint,
//! which lives outside this crate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::dispatch::DispatchOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    pub content: String,
    pub timestamp: i64,
    pub likes: i64,
    pub dislikes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_responses: Option<BTreeMap<String, ModelResponse>>,
    pub timestamp: i64,
}

impl ConversationTurn {
    pub fn user(content: &str) -> Self {
        Self {
            role: Role::User,
            content: content.to_string(),
            model_responses: None,
            timestamp: OffsetDateTime::now_utc().unix_timestamp(),
        }
    }
}

/// Result of folding a settled batch: the assistant turn exists only when
/// at least one model answered, and `responses` keeps the request order for
/// the client to render successes and failures side by side.
pub struct AssembledTurn {
    pub assistant_turn: Option<ConversationTurn>,
    pub responses: Vec<DispatchOutcome>,
}

pub fn assemble(outcomes: Vec<DispatchOutcome>) -> AssembledTurn {
    let now = OffsetDateTime::now_utc().unix_timestamp();

    let mut responses_by_model = BTreeMap::new();
    let mut contents = Vec::new();
    for outcome in &outcomes {
        if let DispatchOutcome::Success {
            model_id, content, ..
        } = outcome
        {
            responses_by_model.insert(
                model_id.clone(),
                ModelResponse {
                    content: content.clone(),
                    timestamp: now,
                    likes: 0,
                    dislikes: 0,
                },
            );
            contents.push(content.as_str());
        }
    }

    let assistant_turn = if responses_by_model.is_empty() {
        None
    } else {
        Some(ConversationTurn {
            role: Role::Assistant,
            // Denormalized convenience copy; model_responses is the source
            // of truth per model.
            content: contents.join("\n\n"),
            model_responses: Some(responses_by_model),
            timestamp: now,
        })
    };

    AssembledTurn {
        assistant_turn,
        responses: outcomes,
    }
}
