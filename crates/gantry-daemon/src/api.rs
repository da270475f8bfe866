//! REST API handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::registry::{PrinterRequest, RegistryError};
use crate::server::AppState;

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

fn error_response(err: RegistryError) -> Response {
    let status = match &err {
        RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
        RegistryError::ConnectionTest(_) => StatusCode::BAD_GATEWAY,
        RegistryError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ApiError::new(err.to_string()))).into_response()
}

/// Status of all printers
pub async fn list_printers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.registry.status_of_all().await)
}

#[derive(Deserialize)]
pub struct AddQuery {
    /// Verify the printer is reachable before persisting
    #[serde(default)]
    test: bool,
}

/// Register a new printer
pub async fn add_printer(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AddQuery>,
    Json(request): Json<PrinterRequest>,
) -> impl IntoResponse {
    info!(host = %request.host, test = query.test, "Add printer requested");

    match state.registry.add(request, query.test).await {
        Ok(id) => (StatusCode::CREATED, Json(serde_json::json!({ "id": id }))).into_response(),
        Err(e) => error_response(e),
    }
}

/// Status of a specific printer
pub async fn get_printer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.registry.status_of(&id).await {
        Ok(view) => Json(view).into_response(),
        Err(e) => error_response(e),
    }
}

/// Update a printer's record
pub async fn update_printer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<PrinterRequest>,
) -> impl IntoResponse {
    match state.registry.update(&id, request).await {
        Ok(()) => Json(serde_json::json!({ "status": "updated" })).into_response(),
        Err(e) => error_response(e),
    }
}

/// Remove a printer
pub async fn remove_printer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    info!(printer = %id, "Remove printer requested");

    match state.registry.remove(&id).await {
        Ok(true) => Json(serde_json::json!({ "status": "removed", "id": id })).into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(ApiError::new("Printer not found")),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// Discover printers on the local network, excluding already
/// configured addresses
pub async fn discover(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!("Discovery requested");

    let window = Duration::from_secs(state.config.discovery.window_secs);
    let known = state.registry.known_addresses().await;
    let found = gantry_discovery::discover_excluding(window, &known).await;
    Json(found)
}
