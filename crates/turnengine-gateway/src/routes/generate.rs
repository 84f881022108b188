//! `GET/POST /generate/{title,prompts}` — SSE streaming generation helpers
//! that delegate to the fixed `title-generator`/`prompts-generator`
//! built-in assistants (§6), rather than require the caller to know their
//! ids.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::warn;
use turnengine_core::TurnContext;
use turnengine_orchestrator::TurnInput;
use turnengine_protocol::{ChannelSink, FrameSink, MessageFrame};

use crate::auth::{check_auth, session_id};
use crate::error::ApiError;
use crate::state::AppState;

const TITLE_ASSISTANT_ID: &str = "title-generator";
const PROMPTS_ASSISTANT_ID: &str = "prompts-generator";

#[derive(Deserialize)]
pub struct GenerateBody {
    #[serde(default)]
    chat_id: Option<String>,
    #[serde(default)]
    message: String,
}

pub async fn generate_title(state: State<Arc<AppState>>, headers: HeaderMap, body: Json<GenerateBody>) -> Result<impl IntoResponse, ApiError> {
    generate(state, headers, body, TITLE_ASSISTANT_ID).await
}

pub async fn generate_prompts(state: State<Arc<AppState>>, headers: HeaderMap, body: Json<GenerateBody>) -> Result<impl IntoResponse, ApiError> {
    generate(state, headers, body, PROMPTS_ASSISTANT_ID).await
}

pub async fn generate_title_get(state: State<Arc<AppState>>, headers: HeaderMap, Query(q): Query<GenerateBody>) -> Result<impl IntoResponse, ApiError> {
    generate(state, headers, Json(q), TITLE_ASSISTANT_ID).await
}

pub async fn generate_prompts_get(state: State<Arc<AppState>>, headers: HeaderMap, Query(q): Query<GenerateBody>) -> Result<impl IntoResponse, ApiError> {
    generate(state, headers, Json(q), PROMPTS_ASSISTANT_ID).await
}

async fn generate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<GenerateBody>,
    assistant_id: &'static str,
) -> Result<impl IntoResponse, ApiError> {
    if !check_auth(&state, &headers, None) {
        return Err(turnengine_core::EngineError::Unauthorized("missing or invalid token".into()).into());
    }

    let chat_id = body.chat_id.unwrap_or_else(|| format!("gen_{}", uuid::Uuid::now_v7()));
    let payload = serde_json::json!({ "assistant_id": assistant_id });
    let ctx = TurnContext::new(session_id(&headers), chat_id, &payload);
    let input = TurnInput { user_text: body.message, images: Vec::new() };

    let (tx, rx) = mpsc::unbounded_channel();
    let sink: Arc<dyn FrameSink> = Arc::new(ChannelSink(tx));
    let engine = state.engine.clone();
    tokio::spawn(async move {
        if let Err(e) = turnengine_orchestrator::run_turn(engine, ctx, input, sink.clone()).await {
            warn!(error = %e, assistant_id, "generate helper turn failed");
            sink.send(MessageFrame::error(e.to_string()));
        }
    });

    Ok(super::turn::sse_from_channel(rx))
}
