use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::bot::SignalDesk;
use crate::error::IngestError;
use crate::models::InboundAlert;

pub const MAX_BODY_BYTES: usize = 1024 * 1024;
pub const ACCEPTED: &str = "Alert received and processed";

pub fn router(desk: Arc<SignalDesk>) -> Router {
    Router::new()
        .route("/webhook", post(receive_alert))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(desk)
}

async fn receive_alert(State(desk): State<Arc<SignalDesk>>, body: Bytes) -> (StatusCode, String) {
    let alert: InboundAlert = match serde_json::from_slice(&body) {
        Ok(a) => a,
        Err(e) => {
            warn!("Rejected malformed alert body: {}", e);
            return (StatusCode::BAD_REQUEST, format!("Invalid alert payload: {}", e));
        }
    };

    match desk.ingest_alert(alert).await {
        Ok(_) => (StatusCode::OK, ACCEPTED.to_string()),
        Err(IngestError::Invalid(e)) => {
            warn!("Rejected alert: {}", e);
            (StatusCode::BAD_REQUEST, format!("Invalid alert: {}", e))
        }
        Err(e @ IngestError::Delivery(_)) => {
            error!("{}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to deliver alert".to_string(),
            )
        }
    }
}

/// Serve the webhook on `addr` until `shutdown` resolves.
pub async fn serve<F>(addr: &str, desk: Arc<SignalDesk>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind webhook listener on {}", addr))?;
    info!("Webhook listening on {}", addr);
    axum::serve(listener, router(desk))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Webhook server failed")
}
