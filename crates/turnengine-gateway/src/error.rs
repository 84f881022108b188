use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use turnengine_core::EngineError;

/// Wraps [`EngineError`] for axum handlers, mapping §7's taxonomy to an
/// HTTP status via `EngineError::http_status` and a `{"error": "...",
/// "code": "..."}` body, mirroring the teacher's `ChatError`/`OpenAiError`
/// shapes in `skynet-gateway::http::{chat,openai_compat}`.
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(json!({ "error": self.0.to_string(), "code": self.0.code() }));
        (status, body).into_response()
    }
}
