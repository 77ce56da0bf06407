//! HTTP intake for match requests
//!
//! `GET /match/{table}/{level}` long-polls the wait coordinator for the
//! participant named in the `x-participant-id` header.
//! `DELETE /match/{participant_id}` withdraws a pending request.

use crate::coordinator::WaitCoordinator;
use crate::error::{classify, MatchmakingError};
use crate::types::{FailureReason, Level, MatchRequest, ParticipantId, TableId};
use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Header carrying the caller's participant id
pub const PARTICIPANT_HEADER: &str = "x-participant-id";

#[derive(Debug, Clone)]
pub struct IntakeServerConfig {
    pub port: u16,
    pub host: String,
}

impl Default for IntakeServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
        }
    }
}

/// HTTP front door in front of a [`WaitCoordinator`]
pub struct IntakeServer {
    config: IntakeServerConfig,
    coordinator: Arc<WaitCoordinator>,
    shutdown_tx: broadcast::Sender<()>,
}

impl IntakeServer {
    pub fn new(config: IntakeServerConfig, coordinator: Arc<WaitCoordinator>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            coordinator,
            shutdown_tx,
        }
    }

    pub async fn start(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .context("Invalid intake server address")?;

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind intake server to {}", addr))?;

        info!("Match intake listening on http://{}", addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(listener, self.create_router())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("Intake server shutdown signal received");
            })
            .await?;

        info!("Intake server stopped");
        Ok(())
    }

    pub fn create_router(&self) -> Router {
        router(self.coordinator.clone())
    }

    pub async fn stop(&self) -> Result<()> {
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Intake server was not running: {}", e);
        }
        Ok(())
    }
}

/// Build the intake routes around a coordinator
pub fn router(coordinator: Arc<WaitCoordinator>) -> Router {
    Router::new()
        .route("/match/{table}/{level}", get(request_match_handler))
        .route("/match/{participant_id}", delete(cancel_handler))
        .with_state(coordinator)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn participant_from_headers(headers: &HeaderMap) -> std::result::Result<ParticipantId, String> {
    let raw = headers
        .get(PARTICIPANT_HEADER)
        .ok_or_else(|| format!("missing {} header", PARTICIPANT_HEADER))?;

    raw.to_str()
        .ok()
        .and_then(|value| value.trim().parse::<ParticipantId>().ok())
        .ok_or_else(|| format!("{} must be an integer", PARTICIPANT_HEADER))
}

async fn request_match_handler(
    State(coordinator): State<Arc<WaitCoordinator>>,
    Path((table, level)): Path<(TableId, Level)>,
    headers: HeaderMap,
) -> Response {
    let participant_id = match participant_from_headers(&headers) {
        Ok(id) => id,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, message),
    };

    debug!(
        "Intake request - participant: {}, table: {}, level: {}",
        participant_id, table, level
    );

    let request = MatchRequest::new(participant_id, table, level);
    match coordinator.respond(request).await {
        Ok(response) if response.reason == Some(FailureReason::StoreUnavailable) => {
            (StatusCode::SERVICE_UNAVAILABLE, Json(response)).into_response()
        }
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => match classify(&e) {
            Some(MatchmakingError::InvalidRequest { reason }) => {
                error_response(StatusCode::BAD_REQUEST, reason.clone())
            }
            _ => {
                error!("Match request for participant {} failed: {}", participant_id, e);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        },
    }
}

async fn cancel_handler(
    State(coordinator): State<Arc<WaitCoordinator>>,
    Path(participant_id): Path<ParticipantId>,
) -> Response {
    match coordinator.cancel(participant_id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error_response(
            StatusCode::NOT_FOUND,
            format!("no pending request for participant {}", participant_id),
        ),
        Err(e) => match classify(&e) {
            Some(MatchmakingError::StoreUnavailable { .. }) => {
                error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
            }
            _ => {
                error!("Cancel for participant {} failed: {}", participant_id, e);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        },
    }
}
