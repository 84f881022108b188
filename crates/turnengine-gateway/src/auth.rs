use axum::http::HeaderMap;
use turnengine_core::AuthMode;

use crate::state::AppState;

/// §6 auth gate: bearer token (header or `?token=`) or the OAuth
/// access-token/session-id cookie pair, whichever the deployment enables.
/// Grounded on `skynet-gateway::http::chat::check_auth`, generalized past
/// the teacher's header-only bearer check.
pub fn check_auth(state: &AppState, headers: &HeaderMap, query_token: Option<&str>) -> bool {
    match state.config.gateway.auth.mode {
        AuthMode::None => true,
        AuthMode::Token => {
            let Some(expected) = state.config.gateway.auth.token.as_deref() else {
                return false;
            };
            let presented = extract_bearer(headers)
                .map(str::to_string)
                .or_else(|| query_token.map(str::to_string))
                .or_else(|| extract_cookie(headers, "__Host-access_token"));
            presented.map(|t| t == expected).unwrap_or(false)
        }
    }
}

/// The session principal this request is scoped to: the session cookie if
/// present, otherwise a fixed anonymous session (auth mode `none`).
pub fn session_id(headers: &HeaderMap) -> String {
    extract_cookie(headers, "__Host-session_id").unwrap_or_else(|| "anonymous".to_string())
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers.get("authorization").and_then(|v| v.to_str().ok()).and_then(|v| v.strip_prefix("Bearer "))
}

fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get("cookie")?.to_str().ok()?;
    raw.split(';').find_map(|kv| {
        let (k, v) = kv.trim().split_once('=')?;
        (k == name).then(|| v.to_string())
    })
}
