use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// The fixed set of client surfaces a turn may originate from (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    Agent,
    Web,
    Android,
    Ios,
    Jssdk,
    Macos,
    Windows,
    Linux,
}

impl ClientType {
    /// Parse a client type string, falling back to `Web` (with a warning) for
    /// anything outside the fixed set (§4.2).
    pub fn parse_or_default(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "agent" => ClientType::Agent,
            "web" => ClientType::Web,
            "android" => ClientType::Android,
            "ios" => ClientType::Ios,
            "jssdk" => ClientType::Jssdk,
            "macos" => ClientType::Macos,
            "windows" => ClientType::Windows,
            "linux" => ClientType::Linux,
            other => {
                warn!(value = other, "invalid client_type, defaulting to web");
                ClientType::Web
            }
        }
    }
}

impl Default for ClientType {
    fn default() -> Self {
        ClientType::Web
    }
}

/// A per-turn, thread-safe key-value space shared between hooks and the
/// orchestrator (§3 "shared space"). Cheap to clone (it's an `Arc<DashMap>`);
/// `snapshot()` deep-copies it for a step's `space_snapshot`.
#[derive(Debug, Clone, Default)]
pub struct SharedSpace(Arc<DashMap<String, serde_json::Value>>);

impl SharedSpace {
    pub fn new() -> Self {
        Self(Arc::new(DashMap::new()))
    }

    pub fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.0.get(key).map(|v| v.clone())
    }

    pub fn del(&self, key: &str) {
        self.0.remove(key);
    }

    pub fn clear(&self) {
        self.0.clear();
    }

    /// Deep copy of the current contents, for a step's `space_snapshot`.
    pub fn snapshot(&self) -> HashMap<String, serde_json::Value> {
        self.0.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
    }

    /// Rebuild a `SharedSpace` from a snapshot (used on resume, §4.8).
    pub fn from_snapshot(snapshot: HashMap<String, serde_json::Value>) -> Self {
        let map = DashMap::new();
        for (k, v) in snapshot {
            map.insert(k, v);
        }
        Self(Arc::new(map))
    }
}

/// Per-turn identity, cancellation, and shared-space handle (C2).
///
/// Constructed once when an HTTP turn begins (`TurnContext::new`) and
/// released (`release()`) when the turn completes, successfully or not.
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub session_id: String,
    pub chat_id: String,
    pub assistant_id: String,
    /// This turn's own position in the delegation stack.
    pub stack_id: String,
    pub stack_parent_id: Option<String>,
    pub stack_depth: u32,
    /// When true, frames are aggregated into history but not forwarded to
    /// the caller's SSE sink (delegation sub-calls default to this).
    pub silent: bool,
    pub history_visible: bool,
    pub client_type: ClientType,
    pub locale: String,
    pub theme: Option<String>,
    pub retry: bool,
    pub retry_times: u32,
    pub vision: bool,
    pub search: bool,
    pub rag: bool,
    pub shared_space: SharedSpace,
    pub args: Vec<serde_json::Value>,
    cancel: CancellationToken,
}

impl TurnContext {
    /// Construct a fresh top-level turn context from the HTTP request.
    pub fn new(session_id: impl Into<String>, chat_id: impl Into<String>, payload: &serde_json::Value) -> Self {
        let client_type = payload
            .get("client_type")
            .and_then(|v| v.as_str())
            .map(ClientType::parse_or_default)
            .unwrap_or_default();

        Self {
            session_id: session_id.into(),
            chat_id: chat_id.into(),
            assistant_id: payload
                .get("assistant_id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            stack_id: uuid::Uuid::now_v7().to_string(),
            stack_parent_id: None,
            stack_depth: 0,
            silent: false,
            history_visible: true,
            client_type,
            locale: payload
                .get("locale")
                .and_then(|v| v.as_str())
                .unwrap_or("en")
                .to_string(),
            theme: payload.get("theme").and_then(|v| v.as_str()).map(str::to_string),
            retry: false,
            retry_times: 0,
            vision: payload.get("vision").and_then(|v| v.as_bool()).unwrap_or(false),
            search: payload.get("search").and_then(|v| v.as_bool()).unwrap_or(false),
            rag: payload.get("rag").and_then(|v| v.as_bool()).unwrap_or(false),
            shared_space: SharedSpace::new(),
            args: payload
                .get("args")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Derive a child context for a delegated sub-call (C9).
    ///
    /// The child gets a fresh `chat_id`/`stack_id`, `silent=true` unless
    /// overridden by the caller, a shared-space seeded from this context's
    /// snapshot, and its own retry state (the counter does not leak across
    /// the boundary).
    pub fn delegate(&self, assistant_id: impl Into<String>, silent: bool) -> Self {
        Self {
            session_id: self.session_id.clone(),
            chat_id: format!("call_{}", uuid::Uuid::now_v7()),
            assistant_id: assistant_id.into(),
            stack_id: uuid::Uuid::now_v7().to_string(),
            stack_parent_id: Some(self.stack_id.clone()),
            stack_depth: self.stack_depth + 1,
            silent,
            history_visible: self.history_visible,
            client_type: self.client_type,
            locale: self.locale.clone(),
            theme: self.theme.clone(),
            retry: false,
            retry_times: 0,
            vision: self.vision,
            search: self.search,
            rag: self.rag,
            shared_space: SharedSpace::from_snapshot(self.shared_space.snapshot()),
            args: Vec::new(),
            cancel: self.cancel.child_token(),
        }
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Serialize to a string-keyed map for the hook script bridge (`$CTX.*`
    /// substitution and the script's `ctx` object), §4.2.
    pub fn to_map(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("session_id".into(), self.session_id.clone().into());
        map.insert("chat_id".into(), self.chat_id.clone().into());
        map.insert("assistant_id".into(), self.assistant_id.clone().into());
        map.insert("stack_id".into(), self.stack_id.clone().into());
        map.insert("stack_depth".into(), self.stack_depth.into());
        map.insert("silent".into(), self.silent.into());
        map.insert("locale".into(), self.locale.clone().into());
        map.insert("retry_times".into(), self.retry_times.into());
        map.insert("vision".into(), self.vision.into());
        map
    }

    /// Release this turn: clear the shared space and propagate cancellation
    /// to any still-running children (§4.2).
    pub fn release(&self) {
        self.shared_space.clear();
    }
}

/// The fixed `$SYS.<K>` table (§3). Evaluated eagerly at prompt-assembly
/// time against a single instant so all placeholders in one prompt are
/// mutually consistent.
pub fn sys_table(now: chrono::DateTime<chrono::Utc>) -> HashMap<&'static str, String> {
    let mut m = HashMap::new();
    m.insert("TIME", now.format("%H:%M:%S").to_string());
    m.insert("DATE", now.format("%Y-%m-%d").to_string());
    m.insert("DATETIME", now.to_rfc3339());
    m.insert("TIMEZONE", "UTC".to_string());
    m.insert("WEEKDAY", now.format("%A").to_string());
    m.insert("YEAR", now.format("%Y").to_string());
    m.insert("MONTH", now.format("%m").to_string());
    m.insert("DAY", now.format("%d").to_string());
    m.insert("HOUR", now.format("%H").to_string());
    m.insert("MINUTE", now.format("%M").to_string());
    m.insert("SECOND", now.format("%S").to_string());
    m.insert("UNIX", now.timestamp().to_string());
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_client_type_defaults_to_web() {
        assert_eq!(ClientType::parse_or_default("toaster"), ClientType::Web);
        assert_eq!(ClientType::parse_or_default("iOS"), ClientType::Ios);
    }

    #[test]
    fn shared_space_snapshot_roundtrips() {
        let space = SharedSpace::new();
        space.set("a", serde_json::json!(1));
        let snap = space.snapshot();
        let restored = SharedSpace::from_snapshot(snap);
        assert_eq!(restored.get("a"), Some(serde_json::json!(1)));
    }

    #[test]
    fn delegate_derives_stack_fields() {
        let parent = TurnContext::new("s1", "c1", &serde_json::json!({"assistant_id": "root"}));
        let child = parent.delegate("helper", true);
        assert_eq!(child.stack_depth, parent.stack_depth + 1);
        assert_eq!(child.stack_parent_id.as_deref(), Some(parent.stack_id.as_str()));
        assert!(child.silent);
        assert_ne!(child.chat_id, parent.chat_id);
    }

    #[test]
    fn sys_table_has_fixed_keys() {
        let now = chrono::Utc::now();
        let table = sys_table(now);
        for k in ["TIME", "DATE", "DATETIME", "TIMEZONE", "WEEKDAY", "YEAR", "MONTH", "DAY", "HOUR", "MINUTE", "SECOND", "UNIX"] {
            assert!(table.contains_key(k), "missing $SYS.{k}");
        }
    }
}
