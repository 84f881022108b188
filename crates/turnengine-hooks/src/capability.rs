use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use handlebars::Handlebars;
use serde_json::Value;
use turnengine_core::{EngineError, Result, SharedSpace};
use turnengine_protocol::{Contents, FrameSink, MessageFrame};

/// What a nested `MakeCall` ultimately returns (§4.9): a final aggregated
/// output, or an error. The orchestrator is the only crate that knows how
/// to actually run a sub-turn; hooks depend only on this trait.
#[async_trait]
pub trait Delegator: Send + Sync {
    async fn make_call(&self, assistant_id: &str, input: Value, options: Value) -> Result<Value>;
}

/// The restricted capability object exposed to hook scripts (§4.6).
///
/// Cloning is cheap: every field is a handle (`Arc`/channel) shared with
/// the turn that created it.
#[derive(Clone)]
pub struct Capability {
    shared_space: SharedSpace,
    sink: Arc<dyn FrameSink>,
    assets_root: Option<PathBuf>,
    delegator: Option<Arc<dyn Delegator>>,
    templates: Arc<Handlebars<'static>>,
    /// Shared with the turn's own `Contents` aggregator, so `Send(message,
    /// true)` can fold the frame into stored history (§4.6), not just the
    /// live SSE stream.
    history: Option<Arc<Mutex<Contents>>>,
}

impl Capability {
    pub fn new(
        shared_space: SharedSpace,
        sink: Arc<dyn FrameSink>,
        assets_root: Option<PathBuf>,
        delegator: Option<Arc<dyn Delegator>>,
        history: Option<Arc<Mutex<Contents>>>,
    ) -> Self {
        Self {
            shared_space,
            sink,
            assets_root,
            delegator,
            templates: Arc::new(Handlebars::new()),
            history,
        }
    }

    /// `Send(message, saveHistory?=true)` — write an SSE frame; when
    /// `save_history` also fold it into the shared `Contents` aggregator so
    /// it survives into stored history (§4.6).
    pub fn send(&self, message: Value, save_history: bool) -> MessageFrame {
        let text = message.get("text").and_then(|v| v.as_str()).map(str::to_string);
        let frame = MessageFrame { text, done: Some(false), ..Default::default() };
        self.sink.send(frame.clone());
        if save_history {
            if let Some(history) = &self.history {
                history.lock().unwrap().push_frame(&frame);
            }
        }
        frame
    }

    /// `Assets(name, data?)` — render an assistant-local Handlebars
    /// template with `data`.
    pub fn assets(&self, name: &str, data: &Value) -> Result<String> {
        let root = self
            .assets_root
            .as_ref()
            .ok_or_else(|| EngineError::Hook { hook: "Assets".into(), message: "no asset directory configured".into() })?;
        let path = root.join(name);
        let template = std::fs::read_to_string(&path)
            .map_err(|e| EngineError::NotFound(format!("asset template {name}: {e}")))?;
        self.templates
            .render_template(&template, data)
            .map_err(|e| EngineError::Hook { hook: "Assets".into(), message: e.to_string() })
    }

    /// `Replace(template, data)` — Mustache-like string substitution, used
    /// for the retry-prompt template and ad-hoc script strings.
    pub fn replace(&self, template: &str, data: &Value) -> Result<String> {
        self.templates
            .render_template(template, data)
            .map_err(|e| EngineError::Hook { hook: "Replace".into(), message: e.to_string() })
    }

    /// `MakeCall(assistant_id, input, options?)` — nested assistant
    /// execution (§4.9). Blocks the calling (script-execution) thread on
    /// the async sub-turn; callers run hook scripts inside
    /// `spawn_blocking` precisely so this is safe.
    pub fn make_call(&self, assistant_id: &str, input: Value, options: Value) -> Result<Value> {
        let delegator = self
            .delegator
            .clone()
            .ok_or_else(|| EngineError::Hook { hook: "MakeCall".into(), message: "delegation is not available in this context".into() })?;
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(delegator.make_call(assistant_id, input, options))
        })
    }

    /// `MakePlan(id)` — out of scope here (external collaborator); returns
    /// an opaque handle the script can pass along but not introspect.
    pub fn make_plan(&self, id: &str) -> Value {
        serde_json::json!({ "plan_id": id, "kind": "external" })
    }

    pub fn space_set(&self, key: &str, value: Value) {
        self.shared_space.set(key.to_string(), value);
    }

    pub fn space_get(&self, key: &str) -> Value {
        self.shared_space.get(key).unwrap_or(Value::Null)
    }

    pub fn space_del(&self, key: &str) {
        self.shared_space.del(key);
    }

    pub fn space_clear(&self) {
        self.shared_space.clear();
    }
}
