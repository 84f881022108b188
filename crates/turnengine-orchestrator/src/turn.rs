use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use turnengine_assistant::{Assistant, HistoryEntry, ImageAttachment, PromptRole, assemble};
use turnengine_core::{EngineError, Result, TurnContext};
use turnengine_hooks::{Capability, CreateOutcome, Delegator, NextOutcome, RetryPolicy, run_with_retry};
use turnengine_llm::{ChatMessage, ChatOptions, LlmAdapter, Role, ToolDefinition, Usage};
use turnengine_protocol::{Contents, FrameSink, MessageFrame, NullSink};
use turnengine_store::{ExitReason, MessageRecord, StepRecord, StepStatus, StepType, TurnBuffer, TurnWriteGuard};
use turnengine_tools::{dispatch, parse_tool_body};

use crate::convert::to_chat_message;
use crate::delegate::TurnDelegator;
use crate::engine::Engine;
use crate::llm_step::run_llm_turn;

/// The user-authored side of one turn's input (§4.2 "current user turn").
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub user_text: String,
    pub images: Vec<ImageAttachment>,
}

/// What a completed (or delegated) turn produced.
#[derive(Debug, Clone, Default)]
pub struct TurnOutput {
    pub content: String,
    pub usage: Usage,
}

/// Run one full turn: PREPARE -> CREATE_HOOK -> LLM -> (TOOL*)? -> NEXT_HOOK
/// -> EXIT (§4.5), with write-2 guaranteed via [`TurnWriteGuard`] regardless
/// of how the turn ends.
pub async fn run_turn(engine: Arc<Engine>, ctx: TurnContext, input: TurnInput, sink: Arc<dyn FrameSink>) -> Result<TurnOutput> {
    run_turn_with_budget(engine, ctx, input, sink, 1).await
}

/// `hotswap_budget` bounds how many times a `Create` hook may restart
/// PREPARE with a different assistant (§4.5: "restart PREPARE once").
async fn run_turn_with_budget(
    engine: Arc<Engine>,
    ctx: TurnContext,
    input: TurnInput,
    sink: Arc<dyn FrameSink>,
    hotswap_budget: u8,
) -> Result<TurnOutput> {
    let assistant = engine.registry.get(&ctx.assistant_id).await?;
    engine.store.ensure_chat(&ctx.chat_id, &ctx.session_id, &assistant.id).await?;

    let request_id = uuid::Uuid::now_v7().to_string();
    let buffer = Arc::new(TurnBuffer::new());
    let mut guard = TurnWriteGuard::new(engine.store.clone(), ctx.chat_id.clone(), buffer.clone());

    let outcome = run_turn_body(&engine, &ctx, &input, &sink, &assistant, &request_id, &buffer, hotswap_budget).await;

    let reason = match &outcome {
        Ok(_) => ExitReason::Completed,
        Err(EngineError::Cancelled) => ExitReason::Cancelled,
        Err(_) => ExitReason::Failed,
    };
    guard.finish(reason).await;
    ctx.release();

    outcome
}

#[allow(clippy::too_many_arguments)]
async fn run_turn_body(
    engine: &Arc<Engine>,
    ctx: &TurnContext,
    input: &TurnInput,
    sink: &Arc<dyn FrameSink>,
    assistant: &Arc<Assistant>,
    request_id: &str,
    buffer: &Arc<TurnBuffer>,
    hotswap_budget: u8,
) -> Result<TurnOutput> {
    if ctx.is_cancelled() {
        return Err(EngineError::Cancelled);
    }

    // History must be read before write-1 so the just-appended user turn is
    // not double-counted (assemble() appends `input.user_text` itself).
    let history_records = engine.store.history(&ctx.chat_id).await?;
    let history: Vec<HistoryEntry> = history_records.iter().filter_map(history_entry_from_record).collect();

    let mut sequence = 1i64;
    engine
        .store
        .append_user_message(&ctx.chat_id, request_id, serde_json::json!({ "text": input.user_text }))
        .await?;
    buffer.push_step(step_record(
        ctx,
        request_id,
        assistant,
        StepType::Input,
        StepStatus::Completed,
        serde_json::json!({ "text": input.user_text }),
        Value::Null,
        sequence,
        None,
    ));
    sequence += 1;

    let assembled = assemble(assistant, &engine.global_prompts, ctx, &history, &input.user_text, &input.images);
    let mut messages: Vec<ChatMessage> = assembled.iter().map(to_chat_message).collect();

    let compiled = match &assistant.script {
        Some(source) => Some(engine.hooks.compile(source)?),
        None => None,
    };

    let assets_dir = PathBuf::from(&engine.config.assistants.root).join(&assistant.id).join("assets");
    let delegator: Arc<dyn Delegator> = Arc::new(TurnDelegator { engine: engine.clone(), parent: ctx.clone() });
    let contents = Arc::new(Mutex::new(Contents::new()));
    let cap = Capability::new(ctx.shared_space.clone(), sink.clone(), Some(assets_dir), Some(delegator), Some(contents.clone()));
    let ctx_map = serde_json::to_value(ctx.to_map()).unwrap_or(Value::Null);

    // CREATE_HOOK
    if let Some(compiled) = &compiled {
        let create_step_id = uuid::Uuid::now_v7().to_string();
        buffer.push_step(step_record(
            ctx,
            request_id,
            assistant,
            StepType::HookCreate,
            StepStatus::Running,
            serde_json::json!({ "message_count": messages.len() }),
            Value::Null,
            sequence,
            Some(create_step_id.clone()),
        ));
        sequence += 1;

        let messages_json: Vec<Value> = messages.iter().map(|m| serde_json::to_value(m).unwrap_or(Value::Null)).collect();
        let options_json = serde_json::to_value(&assistant.options).unwrap_or(Value::Null);
        let create_outcome = engine
            .hooks
            .call_create(compiled, cap.clone(), ctx_map.clone(), Value::Array(messages_json), options_json)
            .await?;
        buffer.update_step_status(&create_step_id, StepStatus::Completed);

        match create_outcome {
            CreateOutcome::Proceed => {}
            CreateOutcome::ReplaceInput { input: replacement } => {
                messages = replacement.into_iter().filter_map(|v| serde_json::from_value(v).ok()).collect();
            }
            CreateOutcome::Delegate { assistant_id, messages: delegate_messages } => {
                let child_ctx = ctx.delegate(assistant_id, true);
                let user_text = delegate_messages
                    .iter()
                    .rev()
                    .find_map(|m| m.get("content").and_then(|c| c.as_str()).map(str::to_string))
                    .unwrap_or_default();
                let child_input = TurnInput { user_text, images: Vec::new() };
                let output =
                    Box::pin(run_turn_with_budget(engine.clone(), child_ctx, child_input, Arc::new(NullSink), hotswap_budget)).await?;
                if !ctx.silent {
                    sink.send(MessageFrame::done_with_text(output.content.clone()));
                }
                return Ok(output);
            }
            CreateOutcome::HotSwap { assistant_id } => {
                if hotswap_budget == 0 {
                    return Err(EngineError::Validation("hot swap budget exhausted".to_string()));
                }
                let mut swapped_ctx = ctx.clone();
                swapped_ctx.assistant_id = assistant_id;
                return Box::pin(run_turn_with_budget(
                    engine.clone(),
                    swapped_ctx,
                    input.clone(),
                    sink.clone(),
                    hotswap_budget - 1,
                ))
                .await;
            }
            CreateOutcome::Next { action, payload } => {
                if action == "exit" {
                    if !ctx.silent {
                        sink.send(MessageFrame::done());
                    }
                    return Ok(TurnOutput::default());
                }
                sink.send(MessageFrame { props: Some(serde_json::json!({ "action": action, "payload": payload })), ..Default::default() });
            }
        }
    }

    // LLM (+ TOOL loop)
    let adapter: Arc<dyn LlmAdapter> = engine
        .connector(&assistant.connector)
        .ok_or_else(|| EngineError::Validation(format!("no connector registered for '{}'", assistant.connector)))?;

    let options = ChatOptions {
        model: assistant.connector.clone(),
        tools: assistant
            .tool_set
            .as_ref()
            .map(|tool_set| {
                tool_set
                    .tools
                    .iter()
                    .map(|t| ToolDefinition { name: t.name.clone(), description: t.description.clone(), parameters: t.parameters.clone() })
                    .collect()
            })
            .unwrap_or_default(),
        ..Default::default()
    };

    let policy = RetryPolicy {
        times: engine.config.retry.times,
        delay_ms: engine.config.retry.delay_ms,
        delay_max_ms: engine.config.retry.delay_max_ms,
        prompt_template: engine.config.retry.prompt.clone(),
        hook_timeout_ms: engine.config.retry.hook_timeout_ms,
    };

    let mut final_usage = Usage::default();

    loop {
        if ctx.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let llm_step_id = uuid::Uuid::now_v7().to_string();
        buffer.push_step(step_record(
            ctx,
            request_id,
            assistant,
            StepType::Llm,
            StepStatus::Running,
            serde_json::json!({ "message_count": messages.len() }),
            Value::Null,
            sequence,
            Some(llm_step_id.clone()),
        ));
        sequence += 1;

        // Each loop iteration clones the stable, outer-scope handles into
        // fresh locals before building the attempt closure: a `move`
        // closure takes ownership of whatever it touches, and `adapter`,
        // `cap`, `messages`, etc. are still needed on the next loop
        // iteration, so only these clones may be consumed.
        let adapter_for_attempt = adapter.clone();
        let hooks_for_attempt = engine.hooks.clone();
        let compiled_for_attempt = compiled.clone();
        let cap_for_attempt = cap.clone();
        let ctx_map_for_attempt = ctx_map.clone();
        let sink_for_attempt = sink.clone();
        let options_for_attempt = options.clone();
        let base_messages = messages.clone();
        let cancel_for_attempt = ctx.cancellation_token().clone();
        let silent = ctx.silent;
        let hook_timeout_ms = engine.config.retry.hook_timeout_ms;

        let attempt: Result<(Usage, Contents)> = run_with_retry(&engine.hooks, compiled.as_ref(), cap.clone(), ctx_map.clone(), &policy, move |rewritten| {
            let adapter = adapter_for_attempt.clone();
            let cancel = cancel_for_attempt.clone();
            let mut call_messages = base_messages.clone();
            if let Some(prompt) = rewritten {
                call_messages.push(ChatMessage { role: Role::User, content: Value::String(prompt), tool_call_id: None, name: None });
            }
            let options = options_for_attempt.clone();
            let hooks = hooks_for_attempt.clone();
            let compiled_stream = compiled_for_attempt.clone();
            let cap = cap_for_attempt.clone();
            let ctx_map = ctx_map_for_attempt.clone();
            let sink = sink_for_attempt.clone();
            async move {
                let mut attempt_contents = Contents::new();
                let usage =
                    run_llm_turn(adapter, cancel, call_messages, options, hooks, compiled_stream, cap, ctx_map, hook_timeout_ms, sink, silent, &mut attempt_contents)
                        .await?;
                Ok((usage, attempt_contents))
            }
        })
        .await;

        buffer.update_step_status(&llm_step_id, if attempt.is_ok() { StepStatus::Completed } else { StepStatus::Failed });

        let (usage, attempt_contents) = match attempt {
            Ok(pair) => pair,
            Err(err) => {
                let message = match &compiled {
                    Some(compiled) => {
                        engine
                            .hooks
                            .call_fail(compiled, cap.clone(), ctx_map.clone(), &err.to_string(), engine.config.retry.hook_timeout_ms)
                            .await?
                            .message
                    }
                    None => err.to_string(),
                };
                if !ctx.silent {
                    sink.send(MessageFrame::error(message.clone()));
                }
                return Err(EngineError::Llm(message));
            }
        };

        final_usage = usage;
        let new_text = attempt_contents.final_text();
        let tool_blocks = attempt_contents.tool_bodies();
        contents.lock().unwrap().data.extend(attempt_contents.data);

        if tool_blocks.is_empty() {
            break;
        }

        for block in tool_blocks {
            match parse_tool_body(&block) {
                Ok(parsed) => {
                    let tool_step_id = uuid::Uuid::now_v7().to_string();
                    buffer.push_step(step_record(
                        ctx,
                        request_id,
                        assistant,
                        StepType::Tool,
                        StepStatus::Running,
                        serde_json::json!({ "function": parsed.function, "arguments": parsed.arguments }),
                        Value::Null,
                        sequence,
                        Some(tool_step_id.clone()),
                    ));
                    sequence += 1;

                    let tool_outcome = dispatch(&engine.tools, &parsed.function, parsed.arguments).await;
                    buffer.update_step_status(&tool_step_id, if tool_outcome.is_error { StepStatus::Failed } else { StepStatus::Completed });

                    if !ctx.silent {
                        sink.send(MessageFrame::tool_result(&tool_step_id, &tool_outcome.function, tool_outcome.output.clone(), tool_outcome.is_error));
                    }
                    messages.push(ChatMessage {
                        role: Role::Tool,
                        content: tool_outcome.output,
                        tool_call_id: Some(tool_step_id),
                        name: Some(tool_outcome.function),
                    });
                }
                Err(message) => {
                    if !ctx.silent {
                        sink.send(MessageFrame::error(message.clone()));
                    }
                    messages.push(ChatMessage { role: Role::Tool, content: Value::String(message), tool_call_id: None, name: None });
                }
            }
        }

        messages.push(ChatMessage { role: Role::Assistant, content: Value::String(new_text), tool_call_id: None, name: None });
    }

    // NEXT_HOOK
    let final_text = contents.lock().unwrap().final_text();
    if let Some(compiled) = &compiled {
        let next_step_id = uuid::Uuid::now_v7().to_string();
        buffer.push_step(step_record(
            ctx,
            request_id,
            assistant,
            StepType::HookNext,
            StepStatus::Running,
            serde_json::json!({ "text_len": final_text.len() }),
            Value::Null,
            sequence,
            Some(next_step_id.clone()),
        ));
        sequence += 1;

        let next_outcome = engine
            .hooks
            .call_next(compiled, cap.clone(), ctx_map.clone(), serde_json::json!({ "text": final_text }))
            .await?;
        buffer.update_step_status(&next_step_id, StepStatus::Completed);

        engine.hooks.call_done(compiled, cap.clone(), ctx_map.clone(), serde_json::json!({ "text": final_text })).await?;

        match next_outcome {
            NextOutcome::Exit => {}
            NextOutcome::NextAssistant { assistant_id, input: next_input, .. } => {
                let mut next_ctx = ctx.clone();
                next_ctx.assistant_id = assistant_id;
                let user_text = next_input.get("text").and_then(|v| v.as_str()).map(str::to_string).unwrap_or_else(|| final_text.clone());
                let next_turn_input = TurnInput { user_text, images: Vec::new() };
                return Box::pin(run_turn_with_budget(engine.clone(), next_ctx, next_turn_input, sink.clone(), hotswap_budget)).await;
            }
            NextOutcome::NextProcess { name, args } => {
                sink.send(MessageFrame { props: Some(serde_json::json!({ "process": name, "args": args })), ..Default::default() });
            }
            NextOutcome::Output { data } => {
                sink.send(MessageFrame { props: Some(data), done: Some(true), ..Default::default() });
            }
        }
    }

    // EXIT
    if !ctx.silent {
        sink.send(MessageFrame::done_with_text(final_text.clone()));
    }
    buffer.push_message(assistant_message_record(ctx, request_id, assistant, &final_text, sequence));

    Ok(TurnOutput { content: final_text, usage: final_usage })
}

fn history_entry_from_record(record: &MessageRecord) -> Option<HistoryEntry> {
    let role = match record.role.as_str() {
        "user" => PromptRole::User,
        "assistant" => PromptRole::Assistant,
        "system" => PromptRole::System,
        _ => return None,
    };
    let content = record.props.get("text").and_then(|v| v.as_str())?.to_string();
    Some(HistoryEntry { role, content })
}

#[allow(clippy::too_many_arguments)]
fn step_record(
    ctx: &TurnContext,
    request_id: &str,
    assistant: &Assistant,
    kind: StepType,
    status: StepStatus,
    input: Value,
    output: Value,
    sequence: i64,
    step_id: Option<String>,
) -> StepRecord {
    let now = chrono::Utc::now();
    StepRecord {
        step_id: step_id.unwrap_or_else(|| uuid::Uuid::now_v7().to_string()),
        chat_id: ctx.chat_id.clone(),
        request_id: request_id.to_string(),
        assistant_id: assistant.id.clone(),
        stack_id: ctx.stack_id.clone(),
        stack_parent_id: ctx.stack_parent_id.clone(),
        stack_depth: ctx.stack_depth,
        kind,
        status,
        input,
        output,
        space_snapshot: ctx.shared_space.snapshot(),
        error: None,
        sequence,
        metadata: Default::default(),
        created_at: now,
        updated_at: now,
    }
}

fn assistant_message_record(ctx: &TurnContext, request_id: &str, assistant: &Assistant, text: &str, sequence: i64) -> MessageRecord {
    MessageRecord {
        message_id: uuid::Uuid::now_v7().to_string(),
        chat_id: ctx.chat_id.clone(),
        request_id: request_id.to_string(),
        role: "assistant".to_string(),
        kind: "text".to_string(),
        props: serde_json::json!({ "text": text }),
        block_id: None,
        thread_id: None,
        assistant_id: Some(assistant.id.clone()),
        sequence,
        metadata: Default::default(),
        created_at: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use turnengine_assistant::store::{AssistantStore, MemoryAssistantStore};
    use turnengine_assistant::{AssistantRegistry, RawAssistant, ToolSpec};
    use turnengine_hooks::HookHost;
    use turnengine_llm::{DeltaControl, ProviderError};
    use turnengine_protocol::ChannelSink;
    use turnengine_store::SqliteStore;
    use turnengine_tools::{Tool, ToolRegistry};

    use super::*;

    /// Replies with a fixed sequence of raw responses, one per call,
    /// looping the last entry once exhausted.
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
        ) -> std::result::Result<Usage, ProviderError> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self.replies.get(idx).or_else(|| self.replies.last()).copied().unwrap_or("");
            on_delta(reply.as_bytes());
            Ok(Usage { model: "mock".to_string(), tokens_in: 1, tokens_out: 1, stop_reason: "stop".to_string(), tool_calls: Vec::new() })
        }
    }

    /// Fails every call with a retryable LLM error.
    struct FailingAdapter;

    #[async_trait]
    impl LlmAdapter for FailingAdapter {
        fn name(&self) -> &str {
            "mock"
        }

        async fn chat(
            &self,
            _cancel: &CancellationToken,
            _messages: &[ChatMessage],
            _options: &ChatOptions,
            _on_delta: &mut (dyn FnMut(&[u8]) -> DeltaControl + Send),
        ) -> std::result::Result<Usage, ProviderError> {
            Err(ProviderError::Unavailable)
        }
    }

    struct Echo(ToolSpec);

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            &self.0.name
        }
        fn spec(&self) -> &ToolSpec {
            &self.0
        }
        async fn execute(&self, arguments: Value) -> Result<Value> {
            Ok(arguments)
        }
    }

    fn echo_tool() -> Arc<dyn Tool> {
        Arc::new(Echo(ToolSpec {
            name: "echo".to_string(),
            description: "echoes back".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            }),
        }))
    }

    fn sample_assistant(id: &str) -> RawAssistant {
        RawAssistant {
            assistant_id: id.to_string(),
            name: "Bot".to_string(),
            connector: "mock".to_string(),
            ..Default::default()
        }
    }

    async fn build_engine(tools: ToolRegistry) -> Arc<Engine> {
        let config = turnengine_core::EngineConfig::default();
        let assistant_store = Arc::new(MemoryAssistantStore::new());
        assistant_store.upsert(sample_assistant("bot1")).await.unwrap();
        let registry = Arc::new(AssistantRegistry::new(16, assistant_store, None));
        let hooks = Arc::new(HookHost::new());
        let store: Arc<dyn turnengine_store::Store> = Arc::new(SqliteStore::in_memory().unwrap());
        Arc::new(Engine::new(config, registry, hooks, tools, store, Vec::new()))
    }

    fn sink_and_collector() -> (Arc<dyn FrameSink>, mpsc::UnboundedReceiver<MessageFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(ChannelSink(tx)), rx)
    }

    fn ctx_for(chat_id: &str) -> TurnContext {
        TurnContext::new("session-1", chat_id, &serde_json::json!({ "assistant_id": "bot1" }))
    }

    #[tokio::test]
    async fn plain_text_turn_streams_and_persists() {
        let engine = build_engine(ToolRegistry::new()).await;
        engine.register_connector("mock", Arc::new(ScriptedAdapter::new(vec!["Hello there."])));

        let ctx = ctx_for("chat1");
        let (sink, mut rx) = sink_and_collector();
        let input = TurnInput { user_text: "hi".to_string(), images: Vec::new() };

        let output = run_turn(engine.clone(), ctx, input, sink).await.unwrap();
        assert_eq!(output.content, "Hello there.");

        let mut saw_done = false;
        while let Ok(frame) = rx.try_recv() {
            if frame.done == Some(true) {
                saw_done = true;
                assert_eq!(frame.text.as_deref(), Some("Hello there."));
            }
        }
        assert!(saw_done, "expected a done frame");

        let history = engine.store.history("chat1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, "user");
        assert_eq!(history[1].role, "assistant");
        assert_eq!(history[1].props["text"], "Hello there.");
    }

    #[tokio::test]
    async fn tool_call_round_trip_dispatches_and_continues() {
        let tools = ToolRegistry::new();
        tools.register(echo_tool());
        let engine = build_engine(tools).await;
        engine.register_connector(
            "mock",
            Arc::new(ScriptedAdapter::new(vec![
                "<tool>{\"function\":\"echo\",\"arguments\":{\"text\":\"hi\"}}</tool>",
                "done now.",
            ])),
        );

        let ctx = ctx_for("chat2");
        let (sink, mut rx) = sink_and_collector();
        let input = TurnInput { user_text: "use the tool".to_string(), images: Vec::new() };

        let output = run_turn(engine.clone(), ctx, input, sink).await.unwrap();
        assert_eq!(output.content, "done now.");

        let mut saw_tool_frame = false;
        while let Ok(frame) = rx.try_recv() {
            if frame.tool.is_some() {
                saw_tool_frame = true;
                assert_eq!(frame.tool.as_ref().unwrap()["output"]["text"], "hi");
            }
        }
        assert!(saw_tool_frame, "expected a tool_result frame");
    }

    #[tokio::test]
    async fn truncated_tool_json_is_repaired_then_dispatched() {
        let tools = ToolRegistry::new();
        tools.register(echo_tool());
        let engine = build_engine(tools).await;
        engine.register_connector(
            "mock",
            Arc::new(ScriptedAdapter::new(vec!["<tool>{\"function\":\"echo\", \"arguments\": {\"text\": \"oops\"</tool>", "fixed up."])),
        );

        let ctx = ctx_for("chat3");
        let (sink, _rx) = sink_and_collector();
        let input = TurnInput { user_text: "go".to_string(), images: Vec::new() };

        // Missing closing braces get recovered by the bracket-balancing
        // repair pass, so the call still dispatches and the loop reaches a
        // clean second turn.
        let output = run_turn(engine.clone(), ctx, input, sink).await.unwrap();
        assert_eq!(output.content, "fixed up.");
    }

    #[tokio::test]
    async fn unparseable_tool_call_is_reported_and_loop_continues() {
        let engine = build_engine(ToolRegistry::new()).await;
        engine.register_connector(
            "mock",
            Arc::new(ScriptedAdapter::new(vec!["<tool>not json at all {{{</tool>", "recovered."])),
        );

        let ctx = ctx_for("chat3b");
        let (sink, mut rx) = sink_and_collector();
        let input = TurnInput { user_text: "go".to_string(), images: Vec::new() };

        let output = run_turn(engine.clone(), ctx, input, sink).await.unwrap();
        assert_eq!(output.content, "recovered.");

        let mut saw_error_frame = false;
        while let Ok(frame) = rx.try_recv() {
            if frame.error.is_some() {
                saw_error_frame = true;
            }
        }
        assert!(saw_error_frame, "expected an error frame for the unparseable call");
    }

    #[tokio::test]
    async fn retries_are_exhausted_and_surfaced_as_error() {
        let mut config_engine = build_engine(ToolRegistry::new()).await;
        let mut config = config_engine.config.clone();
        config.retry.times = 1;
        config.retry.delay_ms = 1;
        config.retry.delay_max_ms = 1;
        config_engine = Arc::new(Engine::new(
            config,
            config_engine.registry.clone(),
            config_engine.hooks.clone(),
            ToolRegistry::new(),
            config_engine.store.clone(),
            Vec::new(),
        ));
        config_engine.register_connector("mock", Arc::new(FailingAdapter));

        let ctx = ctx_for("chat4");
        let (sink, _rx) = sink_and_collector();
        let input = TurnInput { user_text: "hi".to_string(), images: Vec::new() };

        let result = run_turn(config_engine, ctx, input, sink).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn silent_delegated_turn_never_reaches_parent_sink() {
        let engine = build_engine(ToolRegistry::new()).await;
        engine.register_connector("mock", Arc::new(ScriptedAdapter::new(vec!["child output"])));

        let parent_ctx = ctx_for("chat5");
        let child_ctx = parent_ctx.delegate("bot1", true);
        assert!(child_ctx.silent);

        let (sink, mut rx) = sink_and_collector();
        let input = TurnInput { user_text: "delegate me".to_string(), images: Vec::new() };
        let output = run_turn(engine.clone(), child_ctx, input, sink).await.unwrap();
        assert_eq!(output.content, "child output");

        // `ctx.silent` suppresses the final `done` frame, but frames are
        // still aggregated into the child's own stored history.
        assert!(rx.try_recv().is_err());
        // The child used its own derived chat_id, not the parent's.
        let parent_history = engine.store.history("chat5").await.unwrap();
        assert!(parent_history.is_empty());
    }
}
