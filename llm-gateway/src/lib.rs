//! LLM Gateway - relays chat completions from a local inference backend and
//! streams generated tokens to callers as Server-Sent Events.

pub mod adapter;
pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod relay;
pub mod state;

use std::sync::Arc;

use axum::routing::get;
use axum::{middleware, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use state::AppState;

/// Build the full application router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/v1", api::router())
        .route("/health", get(api::health::health))
        .route("/healthz", get(api::health::health))
        .layer(middleware::from_fn(logging::request_logger))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
