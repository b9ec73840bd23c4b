use std::sync::Arc;

pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod realtime;
pub mod routes;
pub mod services;

pub use config::Config;
pub use database::DataStore;
pub use error::{AppError, AppResult};
pub use services::{ChatRelay, MembershipEngine, ProfileDirectory};

/// Shared per-process services handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub membership: MembershipEngine,
    pub chat: ChatRelay,
}

impl AppState {
    pub fn new(store: Arc<dyn DataStore>, config: &Config) -> Self {
        let profiles = ProfileDirectory::new(store.clone(), config.profile_cache_ttl_secs);

        Self {
            membership: MembershipEngine::new(store.clone(), profiles),
            chat: ChatRelay::new(store),
        }
    }
}
