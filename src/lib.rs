//! cloud-e2e -- end-to-end harness for a cloud provider's public API.
//!
//! The library waits for remote resources to converge on a target status,
//! reports per-test results from many test processes, and serves a dashboard
//! that aggregates those results into bounded, merged runs.

pub mod api;
pub mod client;
pub mod config;
pub mod converge;
pub mod framework;
pub mod logging;
pub mod resources;
pub mod results;

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::api::state::AppState;
use crate::config::E2eConfig;
use crate::results::ResultStore;

/// Run the result dashboard until Ctrl-C, then allow in-flight requests a
/// short grace period.
pub async fn serve(config: E2eConfig) -> Result<()> {
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", config.server.bind))?;
    let state = AppState::new(
        ResultStore::new(config.results.capacity),
        config.results.thresholds(),
    )
    .with_max_log_bytes(config.results.max_log_bytes);
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, capacity = config.results.capacity, "result dashboard listening");

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for Ctrl-C");
                return;
            }
            tracing::info!("shutdown requested");
            shutdown.cancel();
        }
    });

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .into_future();
    let grace = Duration::from_secs(config.server.shutdown_grace_sec);

    tokio::select! {
        res = server => res.context("server error")?,
        _ = async {
            shutdown.cancelled().await;
            tokio::time::sleep(grace).await;
        } => {
            tracing::warn!(grace_sec = grace.as_secs(), "grace period elapsed, dropping open connections");
        }
    }

    tracing::info!("result dashboard stopped");
    Ok(())
}
