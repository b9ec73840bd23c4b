use std::sync::Arc;

use anyhow::Result;
use sqlx::{PgPool, postgres::PgPoolOptions};

use crate::config::Config;
use crate::realtime::Notifier;

pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;
pub mod utils;

pub use memory::{MemoryStore, StoreOp};
pub use postgres::PgStore;
pub use store::{DataStore, StoreError, StoreResult};

pub async fn init_database(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    log::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    log::info!("Migrations completed successfully");

    Ok(pool)
}

/// Builds the store selected by `DATABASE_URL`.
pub async fn connect_store(config: &Config, notifier: Notifier) -> Result<Arc<dyn DataStore>> {
    if config.uses_memory_store() {
        log::warn!("Using the in-memory store; data is lost on restart");
        return Ok(Arc::new(MemoryStore::new(notifier)));
    }

    let pool = init_database(&config.database_url).await?;
    Ok(Arc::new(PgStore::new(pool, notifier)))
}
