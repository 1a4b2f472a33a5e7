use std::sync::Arc;

use crate::broker::BrokerManager;
use crate::config::ServerConfig;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<BrokerManager>,

    /// Basic-auth credentials expected from the platform
    pub username: String,
    pub password: String,
}

impl AppState {
    pub fn new(manager: Arc<BrokerManager>, server: &ServerConfig) -> Self {
        Self {
            manager,
            username: server.username.clone(),
            password: server.password.clone(),
        }
    }
}
