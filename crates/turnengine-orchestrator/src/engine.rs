use std::sync::Arc;

use dashmap::DashMap;
use turnengine_assistant::{AssistantRegistry, Prompt};
use turnengine_core::EngineConfig;
use turnengine_hooks::HookHost;
use turnengine_llm::LlmAdapter;
use turnengine_store::Store;
use turnengine_tools::ToolRegistry;

/// The engine handle threaded explicitly through request scope, replacing
/// the teacher's global singletons (§9 design note). One `Engine` is
/// constructed at startup and shared (via `Arc`) across every HTTP turn.
pub struct Engine {
    pub config: EngineConfig,
    pub registry: Arc<AssistantRegistry>,
    pub hooks: Arc<HookHost>,
    pub tools: ToolRegistry,
    pub store: Arc<dyn Store>,
    /// Loaded once at startup from `<assistants_root>/agent/prompts`,
    /// merged ahead of every assistant's own prompts unless it opted out
    /// (`disable_global_prompts`), §4.4.
    pub global_prompts: Vec<Prompt>,
    connectors: DashMap<String, Arc<dyn LlmAdapter>>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        registry: Arc<AssistantRegistry>,
        hooks: Arc<HookHost>,
        tools: ToolRegistry,
        store: Arc<dyn Store>,
        global_prompts: Vec<Prompt>,
    ) -> Self {
        Self { config, registry, hooks, tools, store, global_prompts, connectors: DashMap::new() }
    }

    pub fn register_connector(&self, id: impl Into<String>, adapter: Arc<dyn LlmAdapter>) {
        self.connectors.insert(id.into(), adapter);
    }

    pub fn connector(&self, id: &str) -> Option<Arc<dyn LlmAdapter>> {
        self.connectors.get(id).map(|e| e.clone())
    }

    /// Registered connector ids, for `GET /utility/connectors`.
    pub fn connector_names(&self) -> Vec<String> {
        self.connectors.iter().map(|e| e.key().clone()).collect()
    }
}
