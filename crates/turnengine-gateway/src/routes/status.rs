//! `/status`, `/utility/connectors`, `/dangerous/clear_chats` (§6, §12).

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::json;
use turnengine_core::EngineError;

use crate::auth::{check_auth, session_id};
use crate::error::ApiError;
use crate::state::{AppState, VERSION};

pub async fn status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": VERSION,
        "active_turns": state.active_turns.len(),
    }))
}

pub async fn connectors(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Json<serde_json::Value>, ApiError> {
    require_auth(&state, &headers)?;
    Ok(Json(json!({ "connectors": state.engine.connector_names() })))
}

/// `DELETE /dangerous/clear_chats` — purge every chat owned by the calling
/// session (§6). Named to discourage casual use, per the teacher's own
/// `/dangerous/*` prefix for irreversible operator actions.
pub async fn clear_chats(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Json<serde_json::Value>, ApiError> {
    require_auth(&state, &headers)?;
    let removed = state.engine.store.clear_chats(&session_id(&headers)).await?;
    Ok(Json(json!({ "cleared": removed })))
}

fn require_auth(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    if check_auth(state, headers, None) {
        Ok(())
    } else {
        Err(EngineError::Unauthorized("missing or invalid token".into()).into())
    }
}
