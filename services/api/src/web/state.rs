//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use snore_core::ports::{BlobStore, IdentityProvider, PasswordHasher, SessionStore, UserStore};
use snore_core::{AuthService, CalendarAggregator, SessionEngine};
use std::sync::Arc;

use crate::adapters::{Argon2Hasher, JwtIdentityAdapter};

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: SessionEngine,
    pub calendar: CalendarAggregator,
    pub auth: AuthService,
}

impl AppState {
    /// Wires the core services onto the given storage adapters.
    pub fn new(
        config: Arc<Config>,
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn UserStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        let identity: Arc<dyn IdentityProvider> = Arc::new(JwtIdentityAdapter::new(
            &config.secret_key,
            config.access_token_ttl,
            config.refresh_token_ttl,
        ));
        let hasher: Arc<dyn PasswordHasher> = Arc::new(Argon2Hasher);

        Self {
            engine: SessionEngine::new(sessions.clone(), blobs),
            calendar: CalendarAggregator::new(sessions),
            auth: AuthService::new(users, hasher, identity),
            config,
        }
    }
}
