use std::sync::Arc;

use turnengine_core::{Result, TurnContext};
use turnengine_protocol::FrameSink;
use turnengine_store::{plan_resume, replay_action, ReplayAction};

use crate::engine::Engine;
use crate::turn::{run_turn, TurnInput, TurnOutput};

/// Resume an interrupted request for `ctx.chat_id` (§4.8 Resume).
///
/// Steps 1-3 (locate the unfinished step, rebuild its shared space, walk the
/// ancestor chain) are [`turnengine_store::plan_resume`]'s job; this
/// function performs step 4 itself, since only the orchestrator knows how
/// to re-invoke an LLM call, a tool, a hook, or a delegated assistant.
///
/// Returns `Ok(None)` if there is nothing to resume.
pub async fn resume_chat(engine: Arc<Engine>, ctx: TurnContext, sink: Arc<dyn FrameSink>) -> Result<Option<TurnOutput>> {
    let Some(plan) = plan_resume(engine.store.as_ref(), &ctx.chat_id).await? else {
        return Ok(None);
    };

    let mut resumed_ctx = ctx;
    resumed_ctx.assistant_id = plan.target.assistant_id.clone();
    resumed_ctx.stack_id = plan.target.stack_id.clone();
    resumed_ctx.stack_parent_id = plan.target.stack_parent_id.clone();
    resumed_ctx.stack_depth = plan.target.stack_depth;
    resumed_ctx.shared_space = plan.shared_space;

    let action = replay_action(&plan.target)?;
    let user_text = match action {
        ReplayAction::ReplayLlm { input } => extract_text(&input),
        ReplayAction::ReplayTool { arguments } => extract_text(&arguments),
        ReplayAction::ReplayHookNext { payload } => extract_text(&payload),
        ReplayAction::ReplayDelegate { messages } => extract_text(&messages),
    };

    // Re-enter a full turn from the interrupted step's own input; the
    // replayed step naturally re-runs as this turn's first LLM iteration,
    // and on success the ancestor chain is marked completed.
    let turn_input = TurnInput { user_text, images: Vec::new() };
    let output = run_turn(engine.clone(), resumed_ctx, turn_input, sink).await?;
    engine.store.mark_ancestors_completed(&plan.stack).await?;

    Ok(Some(output))
}

fn extract_text(value: &serde_json::Value) -> String {
    value.get("text").and_then(|v| v.as_str()).map(str::to_string).unwrap_or_else(|| value.to_string())
}
