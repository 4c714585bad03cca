//! Axum HTTP server exposing metrics and liveness

use std::net::SocketAddr;

use axum::{http::StatusCode, routing::get, Router};
use tracing::{error, info};

use crate::labeler::metrics;
use crate::{Error, Result};

/// Metrics endpoint handler
async fn metrics_handler() -> (StatusCode, String) {
    match metrics::encode_metrics() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            error!("Failed to encode metrics: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

pub fn router() -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz))
}

/// Serve `/metrics` and `/healthz` on `addr` until the process exits
pub async fn run_server(addr: SocketAddr) -> Result<()> {
    info!("Metrics server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::ConfigError(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, router())
        .await
        .map_err(|e| Error::ConfigError(format!("Server error: {}", e)))?;

    Ok(())
}
