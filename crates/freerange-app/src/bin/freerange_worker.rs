//! `freerange-worker`: delivery workers without the HTTP surface. Delayed
//! and retry promotion stays with the server process running the
//! scheduler.

use std::io;

use dotenvy::dotenv;
use tracing::info;

use freerange_api::{build_state, init_logging, run_workers_only};
use freerange_app::config::load_config;

#[tokio::main]
async fn main() -> io::Result<()> {
    dotenv().ok();

    let config = load_config().map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
    init_logging(&config.logging);
    info!(workers = config.workers.count, "freerange-worker starting");

    let state = build_state(config)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    run_workers_only(state).await
}
