//! HTTP surface: a static health check and the Telegram webhook.
//!
//! The webhook answers `200 OK` no matter what happened inside, so Telegram
//! never redelivers an update because of our own failures.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Router,
};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::platform::telegram::parse_update;
use crate::relay::Relay;

pub const HEALTH_TEXT: &str = "MFG Office Bot is running ✅";

pub fn router(relay: Arc<Relay>, webhook_path: &str) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route(webhook_path, post(webhook))
        .with_state(relay)
}

async fn health() -> &'static str {
    HEALTH_TEXT
}

async fn webhook(State(relay): State<Arc<Relay>>, body: Bytes) -> StatusCode {
    match parse_update(&body) {
        Ok(update) => {
            let outcome = relay.handle_update(update).await;
            debug!("Webhook outcome: {:?}", outcome);
        }
        Err(e) => {
            warn!("Ignoring undecodable webhook body: {:#}", e);
        }
    }
    StatusCode::OK
}

/// Serve until ctrl-c.
pub async fn serve(relay: Arc<Relay>, config: &ServerConfig) -> Result<()> {
    let app = router(relay, &config.webhook_path);

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!("Server running on {}", addr);
    info!("Webhook endpoint: POST {}", config.webhook_path);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(tokio::signal::ctrl_c()))
        .await
        .context("Server error")?;

    Ok(())
}

/// Resolves once `signal` fires. If the handler could not be installed the
/// server keeps running instead of stopping right after bind.
async fn shutdown_signal<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => info!("Shutting down"),
        Err(e) => {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
