//! `/assistants*` and `/mentions` (§6).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use turnengine_assistant::RawAssistant;
use turnengine_core::EngineError;

use crate::auth::check_auth;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize, Default)]
pub struct AssistantsQuery {
    #[serde(default)]
    tags: Option<String>,
    #[serde(default)]
    keywords: Option<String>,
    #[serde(default)]
    connector: Option<String>,
    #[serde(default)]
    built_in: Option<bool>,
    #[serde(default)]
    mentionable: Option<bool>,
    #[serde(default)]
    automated: Option<bool>,
    #[serde(default)]
    assistant_id: Option<String>,
}

pub async fn list_assistants(State(state): State<Arc<AppState>>, headers: HeaderMap, Query(q): Query<AssistantsQuery>) -> Result<Json<serde_json::Value>, ApiError> {
    require_auth(&state, &headers)?;
    let records = filtered(&state, &q).await?;
    let total = records.len();
    Ok(Json(json!({ "assistants": records, "total": total })))
}

pub async fn mentions(State(state): State<Arc<AppState>>, headers: HeaderMap, Query(q): Query<AssistantsQuery>) -> Result<Json<serde_json::Value>, ApiError> {
    require_auth(&state, &headers)?;
    let mut query = q;
    query.mentionable = Some(true);
    let records = filtered(&state, &query).await?;
    Ok(Json(json!({ "assistants": records })))
}

pub async fn tags(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Json<serde_json::Value>, ApiError> {
    require_auth(&state, &headers)?;
    let all = state.engine.registry.list_raw().await?;
    let mut tags: Vec<String> = all
        .into_iter()
        .filter_map(|r| r.tags)
        .filter_map(|v| v.as_array().cloned())
        .flatten()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    tags.sort();
    tags.dedup();
    Ok(Json(json!({ "tags": tags })))
}

pub async fn get_assistant(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(id): Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    require_auth(&state, &headers)?;
    let assistant = state.engine.registry.get(&id).await?;
    Ok(Json(serde_json::to_value(assistant.as_ref()).unwrap_or(serde_json::Value::Null)))
}

pub async fn upsert_assistant(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(raw): Json<RawAssistant>) -> Result<Json<serde_json::Value>, ApiError> {
    require_auth(&state, &headers)?;
    let id = state.engine.registry.save(raw).await?;
    Ok(Json(json!({ "assistant_id": id })))
}

pub async fn delete_assistant(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(id): Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    require_auth(&state, &headers)?;
    state.engine.registry.delete(&id).await?;
    Ok(Json(json!({ "deleted": true })))
}

#[derive(Deserialize)]
pub struct CallBody {
    name: String,
    #[serde(default)]
    payload: serde_json::Value,
}

/// `POST /assistants/:id/call` — invoke an API action on a loaded
/// assistant's hook script via a silent delegated turn, the same surface a
/// script's own `MakeCall` uses (§4.9).
pub async fn call_assistant(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<CallBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_auth(&state, &headers)?;
    // Ensure the assistant resolves before delegating so a bad id surfaces
    // as 404 rather than an opaque turn failure.
    state.engine.registry.get(&id).await?;

    let parent = turnengine_core::TurnContext::new("system", format!("call_{}", uuid::Uuid::now_v7()), &serde_json::Value::Null);
    let delegator = turnengine_orchestrator::TurnDelegator { engine: state.engine.clone(), parent };
    let result = turnengine_hooks::Delegator::make_call(&delegator, &id, json!({ "name": body.name, "payload": body.payload }), serde_json::Value::Null).await?;
    Ok(Json(result))
}

async fn filtered(state: &AppState, q: &AssistantsQuery) -> Result<Vec<RawAssistant>, ApiError> {
    let mut records = state.engine.registry.list_raw().await?;
    if let Some(id) = &q.assistant_id {
        records.retain(|r| &r.assistant_id == id);
    }
    if let Some(connector) = &q.connector {
        records.retain(|r| &r.connector == connector);
    }
    if let Some(built_in) = q.built_in {
        records.retain(|r| r.built_in == built_in);
    }
    if let Some(mentionable) = q.mentionable {
        records.retain(|r| r.mentionable == mentionable);
    }
    if let Some(automated) = q.automated {
        records.retain(|r| r.automated == automated);
    }
    if let Some(keywords) = &q.keywords {
        let needle = keywords.to_lowercase();
        records.retain(|r| r.name.to_lowercase().contains(&needle) || r.assistant_id.to_lowercase().contains(&needle));
    }
    if let Some(tags) = &q.tags {
        let wanted: Vec<&str> = tags.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
        records.retain(|r| {
            r.tags
                .as_ref()
                .and_then(|v| v.as_array())
                .map(|arr| arr.iter().filter_map(|v| v.as_str()).any(|t| wanted.contains(&t)))
                .unwrap_or(false)
        });
    }
    records.sort_by_key(|r| r.sort);
    Ok(records)
}

fn require_auth(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    if check_auth(state, headers, None) {
        Ok(())
    } else {
        Err(EngineError::Unauthorized("missing or invalid token".into()).into())
    }
}
