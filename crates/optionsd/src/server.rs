use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use optionsd_service::config::Config;
use optionsd_service::metric;

use crate::endpoints;
use crate::service::RequestService;

/// How long in-flight HTTP requests may take to complete after a shutdown signal.
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Starts the pipeline and the HTTP server based on the loaded config.
///
/// Runs until the process receives Ctrl+C.
pub fn run(config: Config) -> Result<()> {
    // Log this metric before actually starting the server. This allows to see restarts even if
    // service creation fails.
    metric!(counter("server.starting") += 1);

    let megs = 1024 * 1024;
    let web_pool = tokio::runtime::Builder::new_multi_thread()
        .thread_name("optionsd-web")
        .enable_all()
        .thread_stack_size(8 * megs)
        .build()?;

    let service = web_pool
        .block_on(async { RequestService::create(&config) })
        .context("failed to create HTTP service state")?;

    let socket = config.bind.parse::<SocketAddr>()?;
    let handle = axum_server::Handle::new();
    web_pool.spawn(shutdown_on_ctrl_c(handle.clone()));

    let server = axum_server::bind(socket)
        .handle(handle)
        .serve(endpoints::create_app(service.clone()).into_make_service());
    tracing::info!("Starting HTTP server on {}", socket);

    web_pool.block_on(server)?;

    web_pool.block_on(service.pipeline().shutdown());
    tracing::info!("System shutdown complete");

    Ok(())
}

async fn shutdown_on_ctrl_c(handle: axum_server::Handle) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C, shutting down");
            handle.graceful_shutdown(Some(GRACEFUL_SHUTDOWN_TIMEOUT));
        }
        Err(err) => {
            tracing::warn!(error = &err as &dyn std::error::Error, "Failed to listen for Ctrl+C");
        }
    }
}
