//! Health check endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::adapter::BackendInfo;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub backend: BackendInfo,
    pub default_model: String,
}

/// GET /health - liveness plus the identity of the configured backend.
///
/// Does not contact the backend.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        backend: state.adapter.info(),
        default_model: state.config.backend.default_model.clone(),
    })
}
