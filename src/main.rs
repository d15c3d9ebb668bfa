use std::sync::Arc;

use crate::config::Config;
use crate::context::Context;
use crate::delivery::HttpDelivery;
use crate::executor::CommandExecutor;
use crate::web::start_web_server;
use crate::worker::spawn_workers;

mod access;
mod config;
mod context;
mod delivery;
mod error;
mod executor;
mod logging;
mod models;
mod progress;
mod queue;
mod submit;
#[cfg(test)]
mod testing;
mod web;
mod worker;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // A missing .env file is fine; the environment and defaults still apply.
    let _ = dotenvy::dotenv();
    logging::init_logging();

    let config = Config::from_env()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))?;

    tokio::fs::create_dir_all(&config.work_dir).await.map_err(|err| {
        tracing::error!(
            "Failed creating work directory {}: {err}",
            config.work_dir.display()
        );
        err
    })?;

    tracing::info!(
        workers = config.max_concurrent_transfers,
        work_dir = %config.work_dir.display(),
        "Starting transfer workers..."
    );

    let ctx = Arc::new(Context::new(config));
    let executor = Arc::new(CommandExecutor::from_config(&ctx.config));
    let delivery = Arc::new(HttpDelivery::new());

    let _workers = spawn_workers(ctx.clone(), executor, delivery);

    start_web_server(ctx).await
}
