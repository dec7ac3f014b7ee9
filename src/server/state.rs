//! Shared application state for HTTP and WebSocket handlers.

use crate::auth::AuthSessions;
use crate::config::Config;
use crate::engine::Engine;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

/// State cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,
    /// The tracking engine.
    pub engine: Arc<Engine>,
    /// Bearer-token resolver.
    pub sessions: Arc<dyn AuthSessions>,
    /// Active WebSocket session counter, for the connection cap.
    pub ws_connections: Arc<AtomicUsize>,
}

impl AppState {
    /// Assemble application state.
    #[must_use]
    pub fn new(config: Arc<Config>, engine: Arc<Engine>, sessions: Arc<dyn AuthSessions>) -> Self {
        Self {
            config,
            engine,
            sessions,
            ws_connections: Arc::new(AtomicUsize::new(0)),
        }
    }
}
