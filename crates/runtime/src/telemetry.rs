//! Tracing initialization and the Prometheus metrics endpoint.

use axum::{response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to set global subscriber: {0}")]
    SetSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("failed to bind metrics port: {0}")]
    MetricsPort(#[from] std::io::Error),
}

/// Configuration for telemetry.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Log filter directive, e.g. `info` or `zigbridge_device=debug`.
    /// `RUST_LOG` takes precedence when set.
    pub log_filter: String,
    /// Address of the Prometheus `/metrics` endpoint; disabled when `None`.
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            metrics_addr: None,
        }
    }
}

/// Initialize tracing and, when configured, serve `/metrics`.
///
/// The metrics server runs on a background task; losing it never takes
/// the gateway down.
pub async fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter.clone()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(addr) = config.metrics_addr {
        let router = Router::new().route("/metrics", get(metrics_handler));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(%addr, "serving metrics");
        tokio::spawn(async move {
            if let Err(error) = axum::serve(listener, router).await {
                tracing::warn!(%error, "metrics server stopped");
            }
        });
    }

    Ok(())
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return (axum::http::StatusCode::INTERNAL_SERVER_ERROR, Vec::new());
    }
    (axum::http::StatusCode::OK, buffer)
}
