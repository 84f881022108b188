//! Integration coverage for `resume_chat` (§4.8), exercised end to end
//! through a real `SqliteStore` rather than the in-process helpers private
//! to `turn.rs`'s own unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use turnengine_assistant::store::{AssistantStore, MemoryAssistantStore};
use turnengine_assistant::{AssistantRegistry, RawAssistant};
use turnengine_core::TurnContext;
use turnengine_hooks::HookHost;
use turnengine_llm::{ChatMessage, ChatOptions, DeltaControl, LlmAdapter, ProviderError, Usage};
use turnengine_orchestrator::{resume_chat, Engine};
use turnengine_protocol::{ChannelSink, FrameSink};
use turnengine_store::{SqliteStore, StepRecord, StepStatus, StepType};
use turnengine_tools::ToolRegistry;

struct ScriptedAdapter {
    replies: Vec<&'static str>,
    calls: AtomicUsize,
}

impl ScriptedAdapter {
    fn new(replies: Vec<&'static str>) -> Self {
        Self { replies, calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl LlmAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        "mock"
    }

    async fn chat(
        &self,
        _cancel: &CancellationToken,
        _messages: &[ChatMessage],
        _options: &ChatOptions,
        on_delta: &mut (dyn FnMut(&[u8]) -> DeltaControl + Send),
    ) -> Result<Usage, ProviderError> {
        let idx = self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.replies.get(idx).or_else(|| self.replies.last()).copied().unwrap_or("");
        on_delta(reply.as_bytes());
        Ok(Usage { model: "mock".to_string(), tokens_in: 1, tokens_out: 1, stop_reason: "stop".to_string(), tool_calls: Vec::new() })
    }
}

async fn build_engine() -> Arc<Engine> {
    let config = turnengine_core::EngineConfig::default();
    let assistant_store = Arc::new(MemoryAssistantStore::new());
    assistant_store
        .upsert(RawAssistant {
            assistant_id: "bot1".to_string(),
            name: "Bot".to_string(),
            connector: "mock".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    let registry = Arc::new(AssistantRegistry::new(16, assistant_store, None));
    let hooks = Arc::new(HookHost::new());
    let store: Arc<dyn turnengine_store::Store> = Arc::new(SqliteStore::in_memory().unwrap());
    Arc::new(Engine::new(config, registry, hooks, ToolRegistry::new(), store, Vec::new()))
}

fn interrupted_llm_step(chat_id: &str, request_id: &str) -> StepRecord {
    StepRecord {
        step_id: uuid::Uuid::new_v4().to_string(),
        chat_id: chat_id.to_string(),
        request_id: request_id.to_string(),
        assistant_id: "bot1".to_string(),
        stack_id: "root".to_string(),
        stack_parent_id: None,
        stack_depth: 0,
        kind: StepType::Llm,
        status: StepStatus::Interrupted,
        input: serde_json::json!({ "text": "what was I saying" }),
        output: serde_json::Value::Null,
        space_snapshot: Default::default(),
        error: None,
        sequence: 1,
        metadata: Default::default(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[tokio::test]
async fn resume_reenters_a_turn_and_marks_ancestors_completed() {
    let engine = build_engine().await;
    engine.register_connector("mock", Arc::new(ScriptedAdapter::new(vec!["picking back up"])));

    engine.store.ensure_chat("chat1", "session-1", "bot1").await.unwrap();
    engine.store.commit_turn("chat1", vec![], vec![interrupted_llm_step("chat1", "req1")]).await.unwrap();

    let ctx = TurnContext::new("session-1", "chat1", &serde_json::json!({ "assistant_id": "bot1" }));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sink: Arc<dyn FrameSink> = Arc::new(ChannelSink(tx));

    let output = resume_chat(engine.clone(), ctx, sink).await.unwrap().expect("a plan to resume");
    assert_eq!(output.content, "picking back up");

    let mut saw_done = false;
    while let Ok(frame) = rx.try_recv() {
        if frame.done == Some(true) {
            saw_done = true;
        }
    }
    assert!(saw_done);

    // Resuming again should find nothing left to resume: the ancestor step
    // was marked completed and the new turn's own steps all finished.
    let ctx2 = TurnContext::new("session-1", "chat1", &serde_json::json!({ "assistant_id": "bot1" }));
    let (tx2, _rx2) = mpsc::unbounded_channel();
    let sink2: Arc<dyn FrameSink> = Arc::new(ChannelSink(tx2));
    assert!(resume_chat(engine, ctx2, sink2).await.unwrap().is_none());
}

#[tokio::test]
async fn resume_with_nothing_interrupted_returns_none() {
    let engine = build_engine().await;
    engine.store.ensure_chat("chat1", "session-1", "bot1").await.unwrap();

    let ctx = TurnContext::new("session-1", "chat1", &serde_json::json!({ "assistant_id": "bot1" }));
    let (tx, _rx) = mpsc::unbounded_channel();
    let sink: Arc<dyn FrameSink> = Arc::new(ChannelSink(tx));

    assert!(resume_chat(engine, ctx, sink).await.unwrap().is_none());
}
