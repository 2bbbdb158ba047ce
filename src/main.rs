use std::sync::Arc;

use arena_deployer::api::make_api;
use arena_deployer::args::Args;
use arena_deployer::service::DeployerService;
use arena_deployer::worker::Worker;
use clap::Parser;
use tracing::{info, trace};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let fmt_layer = fmt::layer();
    tracing_subscriber::registry()
        .with(log_filter())
        .with(fmt_layer)
        .init();

    trace!(args = ?args, "parsed args");

    let service = Arc::new(
        DeployerService::init(&args)
            .unwrap_or_else(|err| panic!("failed to initialize the service: {err}")),
    );

    for _ in 0..args.workers {
        let worker = Worker::new(Arc::clone(&service));
        tokio::spawn(worker.start());
    }

    let api = make_api(service);

    info!(address = %args.address, "binding to and listening at address");

    axum::Server::bind(&args.address)
        .serve(api.into_make_service())
        .await
        .unwrap_or_else(|err| panic!("failed to serve the API: {err}"));
}

/// `DEBUG_MODE=true` forces debug logging; otherwise `LOG_LEVEL` (then
/// `RUST_LOG`) is consulted, defaulting to `info`.
fn log_filter() -> EnvFilter {
    let debug_mode = std::env::var("DEBUG_MODE")
        .map(|value| value.to_lowercase() == "true")
        .unwrap_or(false);

    if debug_mode {
        return EnvFilter::new("debug");
    }

    EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
