use thiserror::Error;

/// Request-level errors. Each variant rejects the whole call before any
/// model is dispatched; per-model failures travel inside
/// [`crate::dispatch::DispatchOutcome`] instead.
#[derive(Debug, Error)]
pub enum PanelError {
    #[error("The system is currently undergoing maintenance. AI models are temporarily unavailable.")]
    Maintenance,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Message and model IDs are required")]
    MissingInput,
    #[error("Free users can use up to 5 models. Pro users can use up to 10. Please upgrade or reduce your selection.")]
    ModelLimitExceeded { requested: usize, limit: usize },
    #[error("Session not found")]
    SessionNotFound,
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl PanelError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Maintenance => "SYS-0503",
            Self::Unauthorized => "AUT-0401",
            Self::MissingInput => "CHT-0400",
            Self::ModelLimitExceeded { .. } => "CHT-0403",
            Self::SessionNotFound => "SES-0404",
            Self::Internal(_) => "GEN-0500",
        }
    }

    pub fn explain(&self) -> &'static str {
        match self {
            Self::Maintenance => "An administrator enabled maintenance mode; chat is paused.",
            Self::Unauthorized => "The request did not carry an authenticated caller.",
            Self::MissingInput => "Either the message was empty or no models were selected.",
            Self::ModelLimitExceeded { .. } => {
                "More models were requested than the caller's tier allows."
            }
            Self::SessionNotFound => "No chat session exists for the requested ID.",
            Self::Internal(_) => "An unspecified error occurred.",
        }
    }

    /// HTTP status the external web layer should map this error to.
    pub fn status(&self) -> u16 {
        match self {
            Self::Maintenance => 503,
            Self::Unauthorized => 401,
            Self::MissingInput => 400,
            Self::ModelLimitExceeded { .. } => 403,
            Self::SessionNotFound => 404,
            Self::Internal(_) => 500,
        }
    }
}
