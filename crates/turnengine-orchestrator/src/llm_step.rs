use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use turnengine_core::{EngineError, Result};
use turnengine_hooks::{Capability, CompiledHook, HookHost, StreamOutcome};
use turnengine_llm::{ChatMessage, ChatOptions, DeltaControl, LlmAdapter, ProviderError, Usage};
use turnengine_protocol::{Contents, FrameSink, MessageFrame};

/// Run one LLM turn: stream deltas from `adapter`, pushing each through the
/// `Stream` hook (if defined) and then through `Contents::scan_tokens`,
/// emitting wire frames to `sink` unless the turn is silent (§4.5 LLM
/// state).
///
/// The adapter's `on_delta` callback is synchronous (C10), but the `Stream`
/// hook is async (it may run script code under `spawn_blocking`); raw
/// chunks are relayed over an unbounded channel to a consumer task that
/// awaits the hook per chunk, keeping the adapter's read loop itself
/// synchronous and allocation-light.
pub async fn run_llm_turn(
    adapter: Arc<dyn LlmAdapter>,
    cancel: CancellationToken,
    messages: Vec<ChatMessage>,
    options: ChatOptions,
    hooks: Arc<HookHost>,
    compiled_stream_hook: Option<CompiledHook>,
    cap: Capability,
    ctx_map: serde_json::Value,
    hook_timeout_ms: u64,
    sink: Arc<dyn FrameSink>,
    silent: bool,
    contents: &mut Contents,
) -> Result<Usage> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();

    let adapter_cancel = cancel.clone();
    let adapter_task = tokio::spawn(async move {
        let mut on_delta = move |bytes: &[u8]| -> DeltaControl {
            if tx.send(bytes.to_vec()).is_err() {
                return DeltaControl::Break;
            }
            DeltaControl::Continue
        };
        adapter.chat(&adapter_cancel, &messages, &options, &mut on_delta).await
    });

    while let Some(chunk) = rx.recv().await {
        let text = String::from_utf8_lossy(&chunk).to_string();

        let outcome = match &compiled_stream_hook {
            Some(compiled) => hooks.call_stream(compiled, cap.clone(), ctx_map.clone(), &text, hook_timeout_ms).await?,
            None => StreamOutcome::Proceed { text: text.clone() },
        };

        match outcome {
            StreamOutcome::Proceed { text } => {
                for frame in contents.scan_tokens(&text) {
                    if !silent {
                        sink.send(frame);
                    }
                }
            }
            StreamOutcome::Silent { text } => {
                // Aggregate for storage but never forward to the client.
                contents.scan_tokens(&text);
            }
            StreamOutcome::Next { action, payload } => {
                let _ = contents.scan_tokens(&text);
                if !silent {
                    sink.send(MessageFrame { props: Some(serde_json::json!({"action": action, "payload": payload})), ..Default::default() });
                }
            }
        }
    }

    match adapter_task.await.map_err(|e| EngineError::Internal(e.to_string()))? {
        Ok(usage) => Ok(usage),
        Err(ProviderError::Cancelled) => Err(EngineError::Cancelled),
        Err(e) => Err(EngineError::Llm(e.to_string())),
    }
}
