use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use turnengine_assistant::{AssistantRegistry, FsAssistantSource};
use turnengine_core::{EngineConfig, Result};
use turnengine_hooks::HookHost;
use turnengine_orchestrator::Engine;
use turnengine_store::{SqliteAssistantStore, SqliteStore};
use turnengine_tools::ToolRegistry;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Central shared state, handed to every axum handler as `Arc<AppState>`,
/// grounded on the teacher's `AppState` (`skynet-gateway::app`) but
/// collapsed to one `Engine` handle (§9 design note) instead of the
/// teacher's many global-singleton subsystems.
pub struct AppState {
    pub config: EngineConfig,
    pub engine: Arc<Engine>,
    /// One cancellation token per in-flight top-level turn, keyed by
    /// `request_id`, so ctrl-c shutdown and a future `/stop`-style endpoint
    /// can cancel everything still streaming.
    pub active_turns: DashMap<String, CancellationToken>,
}

impl AppState {
    pub fn build(config: EngineConfig) -> Result<Self> {
        let assistants_root = config.assistants.root.clone();
        let assistants_db = format!("{}.assistants.sqlite3", config.database.path);
        let assistant_store = Arc::new(SqliteAssistantStore::open(&assistants_db)?);
        let fs_source = if Path::new(&assistants_root).is_dir() { Some(FsAssistantSource::new(assistants_root.clone())) } else { None };
        let registry = Arc::new(AssistantRegistry::new(config.assistants.cache_capacity, assistant_store, fs_source));

        let hooks = Arc::new(HookHost::new());
        let tools = ToolRegistry::new();
        let store: Arc<dyn turnengine_store::Store> = Arc::new(SqliteStore::open(&config.database.path)?);
        let global_prompts = turnengine_assistant::load_global_prompts(Path::new(&assistants_root)).unwrap_or_default();

        let engine = Arc::new(Engine::new(config.clone(), registry, hooks, tools, store, global_prompts));
        register_connectors(&engine);

        Ok(Self { config, engine, active_turns: DashMap::new() })
    }

    pub fn track_turn(&self, request_id: String, cancel: CancellationToken) {
        self.active_turns.insert(request_id, cancel);
    }

    pub fn release_turn(&self, request_id: &str) {
        self.active_turns.remove(request_id);
    }
}

/// Register LLM connectors from environment variables. Concrete provider
/// wiring is outside this crate's scope (the adapter trait boundary is what
/// matters); this is just enough to make the reference OpenAI-compatible
/// adapter usable in a real deployment.
fn register_connectors(engine: &Engine) {
    if let Ok(api_key) = std::env::var("TURNENGINE_OPENAI_API_KEY") {
        let base_url = std::env::var("TURNENGINE_OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        engine.register_connector("openai", Arc::new(turnengine_llm::OpenAiAdapter::new("openai", base_url, api_key)));
    }
}
