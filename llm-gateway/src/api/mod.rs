//! Client-facing HTTP API.

pub mod chat;
pub mod health;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Build the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().merge(chat::router())
}
