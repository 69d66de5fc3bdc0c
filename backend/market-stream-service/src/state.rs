use std::sync::Arc;

use crate::auth::TokenDecoder;
use crate::bus::EventBus;
use crate::cache::MarketCache;
use crate::config::Config;
use crate::websocket::{ConnectionRegistry, SessionContext};

/// Shared handles injected into every HTTP handler
#[derive(Clone)]
pub struct AppState {
    pub registry: ConnectionRegistry,
    pub cache: MarketCache,
    pub bus: Arc<dyn EventBus>,
    pub decoder: Arc<TokenDecoder>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn session_context(&self) -> SessionContext {
        SessionContext {
            registry: self.registry.clone(),
            cache: self.cache.clone(),
            bus: self.bus.clone(),
            decoder: self.decoder.clone(),
            config: self.config.session,
        }
    }
}
