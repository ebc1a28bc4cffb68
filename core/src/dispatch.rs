//! Concurrent fan-out of one user message to N models.
//!
//! Every branch settles on its own: a slow or broken provider produces a
//! `Failure` outcome for its model and nothing else. The batch itself never
//! errors, and the returned outcomes keep the caller's model order no
//! matter which provider answered first.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;

use crate::catalog::ModelCatalog;
use crate::provider::CompletionProvider;
use crate::resolver::resolve_model;

/// Exactly one outcome per requested model id, in request order. The
/// untagged representation matches the wire shape the UI renders:
/// `{modelId, modelName, content}` or `{modelId, error}`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum DispatchOutcome {
    Success {
        #[serde(rename = "modelId")]
        model_id: String,
        #[serde(rename = "modelName")]
        model_name: String,
        content: String,
    },
    Failure {
        #[serde(rename = "modelId")]
        model_id: String,
        error: String,
    },
}

impl DispatchOutcome {
    pub fn model_id(&self) -> &str {
        match self {
            Self::Success { model_id, .. } | Self::Failure { model_id, .. } => model_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            Self::Success { content, .. } => Some(content),
            Self::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error, .. } => Some(error),
        }
    }
}

pub struct Dispatcher {
    catalog: Arc<dyn ModelCatalog>,
    provider: Arc<dyn CompletionProvider>,
}

impl Dispatcher {
    pub fn new(catalog: Arc<dyn ModelCatalog>, provider: Arc<dyn CompletionProvider>) -> Self {
        Self { catalog, provider }
    }

    /// Run one branch per model id and wait for all of them to settle.
    pub async fn dispatch(&self, message: &str, model_ids: &[String]) -> Vec<DispatchOutcome> {
        let branches = model_ids
            .iter()
            .map(|model_id| self.run_branch(message, model_id));
        join_all(branches).await
    }

    async fn run_branch(&self, message: &str, model_id: &str) -> DispatchOutcome {
        let model = match resolve_model(self.catalog.as_ref(), model_id).await {
            Ok(model) => model,
            Err(err) => {
                return DispatchOutcome::Failure {
                    model_id: model_id.to_string(),
                    error: err.to_string(),
                }
            }
        };

        match self.provider.complete(message, &model.name).await {
            // Echo the requested id, not the record's, so outcome i always
            // matches input id i even when a legacy id was used.
            Ok(completion) => DispatchOutcome::Success {
                model_id: model_id.to_string(),
                model_name: model.display_name,
                content: completion.content,
            },
            Err(err) => DispatchOutcome::Failure {
                model_id: model_id.to_string(),
                error: err.to_string(),
            },
        }
    }
}
