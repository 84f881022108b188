//! `/history`, `/chats`, `/chats/latest`, `/chats/:id` (§6).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use turnengine_core::EngineError;
use turnengine_store::{ChatFilter, ChatOrder};

use crate::auth::{check_auth, session_id};
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct HistoryQuery {
    chat_id: String,
}

pub async fn history(State(state): State<Arc<AppState>>, headers: HeaderMap, Query(q): Query<HistoryQuery>) -> Result<Json<serde_json::Value>, ApiError> {
    require_auth(&state, &headers)?;
    let messages = state.engine.store.history(&q.chat_id).await?;
    Ok(Json(json!({ "chat_id": q.chat_id, "messages": messages })))
}

#[derive(Deserialize)]
pub struct ChatsQuery {
    #[serde(default)]
    keywords: Option<String>,
    #[serde(default)]
    page: u32,
    #[serde(default = "default_pagesize")]
    pagesize: u32,
    #[serde(default)]
    order: Option<String>,
}

fn default_pagesize() -> u32 {
    20
}

pub async fn list_chats(State(state): State<Arc<AppState>>, headers: HeaderMap, Query(q): Query<ChatsQuery>) -> Result<Json<serde_json::Value>, ApiError> {
    require_auth(&state, &headers)?;
    let filter = ChatFilter { keywords: q.keywords, page: q.page, pagesize: q.pagesize, order: ChatOrder::parse(q.order.as_deref()) };
    let page = state.engine.store.list_chats(&session_id(&headers), &filter).await?;
    Ok(Json(serde_json::to_value(page).unwrap_or(serde_json::Value::Null)))
}

/// `GET /chats/latest` — the most recently active chat, or a fresh stub id
/// for the client to start one with.
pub async fn latest_chat(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Json<serde_json::Value>, ApiError> {
    require_auth(&state, &headers)?;
    match state.engine.store.latest_chat(&session_id(&headers)).await? {
        Some(chat) => Ok(Json(serde_json::to_value(chat).unwrap_or(serde_json::Value::Null))),
        None => Ok(Json(json!({ "chat_id": uuid::Uuid::now_v7().to_string(), "stub": true }))),
    }
}

pub async fn get_chat(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(chat_id): Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    require_auth(&state, &headers)?;
    let chat = state
        .engine
        .store
        .get_chat(&chat_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("chat {chat_id} not found")))?;
    Ok(Json(serde_json::to_value(chat).unwrap_or(serde_json::Value::Null)))
}

#[derive(Deserialize)]
pub struct UpdateChatBody {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

pub async fn update_chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(chat_id): Path<String>,
    Json(body): Json<UpdateChatBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_auth(&state, &headers)?;
    let chat = state
        .engine
        .store
        .update_chat(&chat_id, &session_id(&headers), body.title, body.metadata)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("chat {chat_id} not found")))?;
    Ok(Json(serde_json::to_value(chat).unwrap_or(serde_json::Value::Null)))
}

pub async fn delete_chat(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(chat_id): Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    require_auth(&state, &headers)?;
    let removed = state.engine.store.delete_chat(&chat_id, &session_id(&headers)).await?;
    if !removed {
        return Err(EngineError::NotFound(format!("chat {chat_id} not found")).into());
    }
    Ok(Json(json!({ "deleted": true })))
}

fn require_auth(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    if check_auth(state, headers, None) {
        Ok(())
    } else {
        Err(EngineError::Unauthorized("missing or invalid token".into()).into())
    }
}
