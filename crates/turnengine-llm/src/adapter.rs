use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::types::{ChatMessage, ChatOptions, DeltaControl, ProviderError, Usage};

/// The orchestrator's only dependency on an LLM backend (C10):
/// `Chat(ctx, messages, options, onDelta) -> usage | error`.
///
/// `on_delta` is called once per normalized wire chunk; its return value
/// tells the adapter whether to keep streaming (`Continue`) or stop early
/// (`Break`, used when the turn's cancellation token fires mid-stream).
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn chat(
        &self,
        cancel: &CancellationToken,
        messages: &[ChatMessage],
        options: &ChatOptions,
        on_delta: &mut (dyn FnMut(&[u8]) -> DeltaControl + Send),
    ) -> Result<Usage, ProviderError>;
}
