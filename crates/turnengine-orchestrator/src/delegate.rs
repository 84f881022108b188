use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use turnengine_core::{Result, TurnContext};
use turnengine_hooks::Delegator;
use turnengine_protocol::NullSink;

use crate::engine::Engine;
use crate::turn::{run_turn, TurnInput};

/// Bridges a hook script's `MakeCall` (§4.9) to a full nested turn.
///
/// One instance is built per parent turn, capturing that turn's
/// [`TurnContext`] so the child derives its stack id/depth and inherits a
/// snapshot of the shared space. The child always runs silently — its own
/// frames never reach the parent's SSE stream, only its aggregated output
/// does, via the returned JSON value.
pub struct TurnDelegator {
    pub engine: Arc<Engine>,
    pub parent: TurnContext,
}

#[async_trait]
impl Delegator for TurnDelegator {
    async fn make_call(&self, assistant_id: &str, input: Value, _options: Value) -> Result<Value> {
        let child_ctx = self.parent.delegate(assistant_id, true);
        let user_text = input
            .get("text")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| input.to_string());
        let turn_input = TurnInput { user_text, images: Vec::new() };

        let output = Box::pin(run_turn(self.engine.clone(), child_ctx, turn_input, Arc::new(NullSink))).await?;
        Ok(serde_json::json!({ "content": output.content, "usage": output.usage }))
    }
}
