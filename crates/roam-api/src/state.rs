//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use roam_chat::ChatService;
use roam_core::config::RoamConfig;

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RoamConfig>,
    /// Sessions, live connections and the generation engine.
    pub chat: Arc<ChatService>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: RoamConfig, chat: ChatService) -> Self {
        Self {
            config: Arc::new(config),
            chat: Arc::new(chat),
            start_time: Instant::now(),
        }
    }
}
