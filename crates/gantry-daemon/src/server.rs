//! Web server setup and routing

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api;
use crate::config::Config;
use crate::registry::FleetRegistry;

/// Shared application state
pub struct AppState {
    /// Fleet registry mediating all printer access
    pub registry: Arc<FleetRegistry>,
    /// Configuration
    pub config: Config,
}

/// Run the web server until shutdown, then close printer sessions
pub async fn run(state: Arc<AppState>, bind: &str) -> Result<()> {
    let app = Router::new()
        .route("/api/printers", get(api::list_printers).post(api::add_printer))
        .route(
            "/api/printers/{id}",
            get(api::get_printer)
                .put(api::update_printer)
                .delete(api::remove_printer),
        )
        .route("/api/discover", post(api::discover))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = %bind, "Starting web server");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.registry.teardown().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown requested");
}
