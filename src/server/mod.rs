//! Webhook server
//!
//! HTTP listener receiving Telegram updates on `/<bot token>` and serving a
//! `/health` probe. Each request runs on its own task; updates for the same
//! chat are serialized by the poll state manager.

use crate::channels::Update;
use crate::commands::PollService;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

/// Webhook listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Bind address
    pub bind: String,
    /// Port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8443,
        }
    }
}

/// Server errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid bind address: {0}")]
    InvalidAddress(String),

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Shared state of the webhook handlers
#[derive(Clone)]
pub struct WebhookState {
    pub service: Arc<PollService>,
}

/// Create the webhook router; updates are accepted on `webhook_path`
pub fn create_router(state: WebhookState, webhook_path: &str) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(webhook_path, post(update_handler))
        .with_state(state)
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Always answers 200 so Telegram does not redeliver; failures are logged
async fn update_handler(State(state): State<WebhookState>, Json(update): Json<Update>) -> StatusCode {
    let update_id = update.update_id;
    tracing::debug!(update_id, "Received update");

    let Some(inbound) = update.into_inbound() else {
        tracing::trace!(update_id, "Ignoring update");
        return StatusCode::OK;
    };

    if let Err(e) = state.service.handle(inbound).await {
        tracing::error!(update_id, error = %e, "Failed to handle update");
    }
    StatusCode::OK
}

/// Serve the webhook until `shutdown` resolves
pub async fn serve(
    config: &ServerConfig,
    router: Router,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
    let addr: SocketAddr = format!("{}:{}", config.bind, config.port)
        .parse()
        .map_err(|e: std::net::AddrParseError| ServerError::InvalidAddress(e.to_string()))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "Webhook server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Webhook server stopped");
    Ok(())
}
