use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// One message in a chat-completion request, in the adapter-agnostic shape
/// C4 assembles (§4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Function-calling tool schema, as passed through `ChatOptions::tools`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    None,
    Named(String),
}

/// Options recognized at the adapter layer (§4.10): `tools`, `tool_choice`,
/// plus arbitrary passthrough for vendor-specific knobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatOptions {
    pub model: String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default)]
    pub passthrough: std::collections::HashMap<String, Value>,
}

/// A parsed tool call from the model, regardless of whether it arrived via
/// native function-calling or a `<tool>` text region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Final token usage, attached to the turn's `llm` step at stream end
/// (§4.10).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub model: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub stop_reason: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

/// Whether the caller should keep reading the delta stream or stop early
/// (e.g. because the turn was cancelled) — the `control` return of
/// `onDelta` in §4.10.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaControl {
    Continue,
    Break,
}

/// One normalized streaming delta, already classified by shape so C1's
/// `Contents` aggregator can dispatch without knowing the vendor wire
/// format.
#[derive(Debug, Clone)]
pub enum StreamDelta {
    Text(String),
    ToolCallStart { id: String, name: String },
    ToolCallArgs { delta: String },
    Done(Usage),
    Error(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(String),
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("provider unavailable")]
    Unavailable,
    #[error("cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Http(e.to_string())
    }
}
