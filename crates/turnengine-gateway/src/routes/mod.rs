use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod assistants;
pub mod chats;
pub mod generate;
pub mod status;
pub mod turn;

/// Assembles the full HTTP surface (§6's route table), grounded on the
/// teacher's `skynet-gateway::app::build_router` layering: permissive CORS
/// for the browser client, then request tracing, then the routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(turn::resume_turn).post(turn::start_turn))
        .route("/history", get(chats::history))
        .route("/chats", get(chats::list_chats))
        .route("/chats/latest", get(chats::latest_chat))
        .route("/chats/{id}", get(chats::get_chat).post(chats::update_chat).delete(chats::delete_chat))
        .route("/assistants", get(assistants::list_assistants).post(assistants::upsert_assistant))
        .route("/assistants/tags", get(assistants::tags))
        .route("/assistants/{id}", get(assistants::get_assistant).delete(assistants::delete_assistant))
        .route("/assistants/{id}/call", post(assistants::call_assistant))
        .route("/mentions", get(assistants::mentions))
        .route("/generate/title", get(generate::generate_title_get).post(generate::generate_title))
        .route("/generate/prompts", get(generate::generate_prompts_get).post(generate::generate_prompts))
        .route("/status", get(status::status))
        .route("/utility/connectors", get(status::connectors))
        .route("/dangerous/clear_chats", delete(status::clear_chats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
