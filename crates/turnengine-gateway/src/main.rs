use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

mod auth;
mod error;
mod routes;
mod state;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "turnengine_gateway=info,tower_http=debug".into()),
        )
        .init();

    let config_path = std::env::var("TURNENGINE_CONFIG").ok();
    let config = turnengine_core::EngineConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("config load failed ({}), using defaults", e);
        turnengine_core::EngineConfig::default()
    });

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let state = Arc::new(state::AppState::build(config)?);
    let router = routes::build_router(state.clone());

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!(%addr, "turnengine gateway listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    Ok(())
}

/// Waits for ctrl-c, then cancels every turn still in flight (§12 graceful
/// shutdown), mirroring the teacher's operator-issued `/stop` generalized to
/// process shutdown.
async fn shutdown_signal(state: Arc<state::AppState>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("ctrl-c received, cancelling active turns");
    for entry in state.active_turns.iter() {
        entry.value().cancel();
    }
}
