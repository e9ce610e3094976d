//! `freerange-migrate`: create or update the document store schema.

use std::io;

use dotenvy::dotenv;
use tracing::info;

use freerange_app::config::load_config;
use freerange_core::config::StoreBackend;
use freerange_store::{init_pool, migrations};

#[tokio::main]
async fn main() -> io::Result<()> {
    dotenv().ok();

    let config = load_config().map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
    freerange_api::init_logging(&config.logging);

    if config.store.backend != StoreBackend::Postgres {
        info!("store backend is not postgres, nothing to migrate");
        return Ok(());
    }

    let pool = init_pool(&config.store.database_url, config.store.pool_size)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    let applied = migrations::run_pending(&pool)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

    if applied.is_empty() {
        info!("schema already up to date");
    } else {
        info!(count = applied.len(), versions = ?applied, "migrations applied");
    }
    Ok(())
}
