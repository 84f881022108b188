use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Script entry points a hook-bearing assistant may define (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookName {
    Create,
    Stream,
    Next,
    Done,
    Fail,
    Retry,
    /// Invoked on the nested-call path before a delegated assistant's own
    /// `Create` hook (§4.9).
    Init,
}

impl HookName {
    pub fn fn_name(self) -> &'static str {
        match self {
            HookName::Create => "on_create",
            HookName::Stream => "on_stream",
            HookName::Next => "on_next",
            HookName::Done => "on_done",
            HookName::Fail => "on_fail",
            HookName::Retry => "on_retry",
            HookName::Init => "on_init",
        }
    }

    /// Short hooks run under a fixed deadline regardless of the turn's own
    /// cancellation (§4.6).
    pub fn is_short(self) -> bool {
        matches!(self, HookName::Stream | HookName::Fail | HookName::Retry)
    }
}

/// Outcome of the `Create` hook (§4.5 CREATE_HOOK transition).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CreateOutcome {
    Proceed,
    ReplaceInput { input: Vec<Value> },
    Delegate { assistant_id: String, messages: Vec<Value> },
    HotSwap { assistant_id: String },
    Next { action: String, payload: Value },
}

impl Default for CreateOutcome {
    fn default() -> Self {
        CreateOutcome::Proceed
    }
}

/// Outcome of the `Stream` hook, run per delta (§4.5 LLM state).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamOutcome {
    /// Forward the (possibly rewritten) delta text to the client.
    Proceed { text: String },
    /// Aggregate for storage but do not forward to the client.
    Silent { text: String },
    Next { action: String, payload: Value },
}

/// Outcome of the `Next`/`Done` hook, run when the LLM stream finishes
/// (§4.5 NEXT_HOOK).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NextOutcome {
    Exit,
    NextAssistant { assistant_id: String, input: Value, options: Value },
    NextProcess { name: String, args: Value },
    Output { data: Value },
}

impl Default for NextOutcome {
    fn default() -> Self {
        NextOutcome::Exit
    }
}

/// Outcome of the `Fail` hook: a script-raised error is always routed
/// through `Fail` to decide the user-visible message and whether to retry
/// (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailOutcome {
    pub message: String,
    #[serde(default)]
    pub retry: bool,
}

/// Outcome of the `Retry` hook: it may further rewrite the retry prompt
/// built from the retry template (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryOutcome {
    pub prompt: String,
}
