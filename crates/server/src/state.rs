//! Application state shared across handlers.

use depot_core::config::AppConfig;
use depot_metadata::MetadataStore;
use depot_relay::RelayChannel;
use std::sync::Arc;

/// Shared application state.
///
/// The relay channel is injected here rather than reached through any
/// global, so tests can stand up isolated instances side by side.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub metadata: Arc<dyn MetadataStore>,
    pub relay: Arc<RelayChannel>,
}

impl AppState {
    /// Create new application state.
    pub fn new(
        config: AppConfig,
        metadata: Arc<dyn MetadataStore>,
        relay: Arc<RelayChannel>,
    ) -> Self {
        Self {
            config,
            metadata,
            relay,
        }
    }
}
