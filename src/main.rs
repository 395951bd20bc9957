// =============================================================================
// Connect Gateway: Main Entry Point
// =============================================================================
//
// Forwards market-data requests to the upstream connect service. Startup
// fails if the upstream base URL is not configured.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod config;
mod connect;
mod market_data;

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::GatewayConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & logging ─────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── 2. Configuration (fatal when incomplete) ─────────────────────────
    let config = match GatewayConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid gateway configuration, refusing to start");
            return Err(e.into());
        }
    };

    info!(
        upstream = %config.base_url_api_connect,
        kline_row_format = %config.kline_row_format,
        "Connect gateway starting"
    );

    // ── 3. Shared state & router ─────────────────────────────────────────
    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::new(config));
    let app = api::rest::router(state);

    // ── 4. Serve until Ctrl+C ────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server failed")?;

    info!("Connect gateway shut down complete.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install Ctrl+C handler, running until killed");
        std::future::pending::<()>().await;
    }
    warn!("Shutdown signal received, stopping gracefully");
}
