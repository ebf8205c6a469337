//! Shared application state.

use std::sync::Arc;

use crate::adapter::BackendAdapter;
use crate::config::Config;

/// Shared application state passed to all handlers.
///
/// Read-only after startup; requests share nothing else.
pub struct AppState {
    pub config: Config,
    pub adapter: Arc<dyn BackendAdapter>,
}

impl AppState {
    pub fn new(config: Config, adapter: Arc<dyn BackendAdapter>) -> Self {
        Self { config, adapter }
    }
}
