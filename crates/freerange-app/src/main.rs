//! `freerange-server`: HTTP surface, scheduler, broadcaster, and worker
//! pool in one process. SIGTERM/SIGINT trigger graceful shutdown.

use std::io;

use dotenvy::dotenv;
use tracing::info;

use freerange_api::{build_state, init_logging, run_server};
use freerange_app::config::load_config;

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv().ok();

    let config = load_config().map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
    init_logging(&config.logging);
    info!(
        host = %config.server.host,
        port = config.server.port,
        store = ?config.store.backend,
        queue = ?config.queue.backend,
        workers = config.workers.count,
        "freerange-server starting"
    );

    let state = build_state(config)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    run_server(state, true).await
}
