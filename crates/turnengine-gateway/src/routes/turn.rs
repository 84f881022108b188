//! `GET/POST /` — start or resume a turn; response is SSE (§6).
//!
//! POST starts a fresh turn from the request body; GET resumes whatever
//! interrupted step `resume_chat` (§4.8) finds for `chat_id`, replying with
//! a single immediate `done` frame if there is nothing to resume.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::warn;
use turnengine_core::TurnContext;
use turnengine_protocol::{ChannelSink, FrameSink, MessageFrame};

use crate::auth::{check_auth, session_id};
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct TurnQuery {
    chat_id: String,
    token: Option<String>,
}

#[derive(Deserialize)]
pub struct TurnBody {
    chat_id: Option<String>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    images: Vec<String>,
    #[serde(flatten)]
    rest: serde_json::Value,
}

pub async fn resume_turn(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<TurnQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if !check_auth(&state, &headers, q.token.as_deref()) {
        return Err(turnengine_core::EngineError::Unauthorized("missing or invalid token".into()).into());
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let sink: Arc<dyn FrameSink> = Arc::new(ChannelSink(tx));
    let ctx = TurnContext::new(session_id(&headers), q.chat_id.clone(), &serde_json::Value::Null);
    let cancel = ctx.cancellation_token().clone();
    let request_id = uuid::Uuid::now_v7().to_string();
    state.track_turn(request_id.clone(), cancel);

    let engine = state.engine.clone();
    let state_for_cleanup = state.clone();
    let request_id_for_cleanup = request_id.clone();
    tokio::spawn(async move {
        match turnengine_orchestrator::resume_chat(engine, ctx, sink.clone()).await {
            Ok(None) => sink.send(MessageFrame::done()),
            Ok(Some(_)) => {}
            Err(e) => {
                warn!(error = %e, "resume_chat failed");
                sink.send(MessageFrame::error(e.to_string()));
            }
        }
        state_for_cleanup.release_turn(&request_id_for_cleanup);
    });

    Ok(sse_from_channel(rx))
}

pub async fn start_turn(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<TurnBody>,
) -> Result<impl IntoResponse, ApiError> {
    if !check_auth(&state, &headers, None) {
        return Err(turnengine_core::EngineError::Unauthorized("missing or invalid token".into()).into());
    }
    if body.message.trim().is_empty() {
        return Err(turnengine_core::EngineError::Validation("message cannot be empty".into()).into());
    }

    let chat_id = body.chat_id.clone().unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
    let ctx = TurnContext::new(session_id(&headers), chat_id, &body.rest);
    let images = body.images.into_iter().map(|url| turnengine_assistant::ImageAttachment { url, alt: None }).collect();
    let input = turnengine_orchestrator::TurnInput { user_text: body.message, images };

    let (tx, rx) = mpsc::unbounded_channel();
    let sink: Arc<dyn FrameSink> = Arc::new(ChannelSink(tx));
    let cancel = ctx.cancellation_token().clone();
    let request_id = uuid::Uuid::now_v7().to_string();
    state.track_turn(request_id.clone(), cancel);

    let engine = state.engine.clone();
    let state_for_cleanup = state.clone();
    let request_id_for_cleanup = request_id.clone();
    tokio::spawn(async move {
        if let Err(e) = turnengine_orchestrator::run_turn(engine, ctx, input, sink.clone()).await {
            warn!(error = %e, "run_turn failed");
            sink.send(MessageFrame::error(e.to_string()));
        }
        state_for_cleanup.release_turn(&request_id_for_cleanup);
    });

    Ok(sse_from_channel(rx))
}

pub(crate) fn sse_from_channel(mut rx: mpsc::UnboundedReceiver<MessageFrame>) -> Sse<impl futures_util::Stream<Item = Result<Event, std::convert::Infallible>>> {
    let stream = async_stream::stream! {
        while let Some(frame) = rx.recv().await {
            let json = serde_json::to_string(&frame).unwrap_or_else(|_| "{}".to_string());
            let is_done = frame.done == Some(true);
            yield Ok(Event::default().data(json));
            if is_done {
                break;
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}
