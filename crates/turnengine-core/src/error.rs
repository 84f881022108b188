use thiserror::Error;

/// Error taxonomy shared across the engine (spec §7).
///
/// Every crate's local error type converts into this one at the boundary
/// where the orchestrator or gateway needs a single type to reason about
/// retry/escalation policy.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("tool error ({tool}): {message}")]
    Tool { tool: String, message: String },

    #[error("hook error ({hook}): {message}")]
    Hook { hook: String, message: String },

    #[error("could not parse tool call: {0}")]
    Parse(String),

    #[error("turn cancelled")]
    Cancelled,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Short error code string, e.g. for wire responses or log correlation.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "VALIDATION_ERROR",
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::Unauthorized(_) => "UNAUTHORIZED",
            EngineError::Llm(_) => "LLM_ERROR",
            EngineError::Tool { .. } => "TOOL_ERROR",
            EngineError::Hook { .. } => "HOOK_ERROR",
            EngineError::Parse(_) => "PARSE_ERROR",
            EngineError::Cancelled => "CANCELLED",
            EngineError::Storage(_) => "STORAGE_ERROR",
            EngineError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the turn orchestrator should consider this retryable (§4.6).
    pub fn retryable(&self) -> bool {
        matches!(self, EngineError::Llm(_) | EngineError::Hook { .. })
    }

    /// HTTP status the gateway maps this to (§7 propagation column).
    pub fn http_status(&self) -> u16 {
        match self {
            EngineError::Validation(_) | EngineError::Parse(_) => 400,
            EngineError::Unauthorized(_) => 403,
            EngineError::NotFound(_) => 404,
            EngineError::Cancelled => 499,
            EngineError::Llm(_) | EngineError::Tool { .. } | EngineError::Hook { .. } | EngineError::Storage(_) | EngineError::Internal(_) => 500,
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Parse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
