//! Health check endpoints and Prometheus metrics server
//!
//! Serves liveness, readiness, detailed stats and the Prometheus text
//! exposition on the metrics port using Axum.

use crate::metrics::collector::MetricsCollector;
use crate::service::app::AppState;
use crate::service::health::{HealthCheck, HealthStatus};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const SERVICE_NAME: &str = "table-match";

/// Health server configuration
#[derive(Debug, Clone)]
pub struct HealthServerConfig {
    /// Port to bind the health server to
    pub port: u16,
    /// Host to bind to (typically "0.0.0.0" for all interfaces)
    pub host: String,
}

impl Default for HealthServerConfig {
    fn default() -> Self {
        Self {
            port: 9090,
            host: "0.0.0.0".to_string(),
        }
    }
}

/// Shared state for the health server
#[derive(Clone)]
pub struct HealthServerState {
    pub metrics_collector: Arc<MetricsCollector>,
    pub app_state: Option<Arc<AppState>>,
}

/// Health server that provides HTTP endpoints for monitoring
pub struct HealthServer {
    config: HealthServerConfig,
    state: HealthServerState,
    shutdown_tx: broadcast::Sender<()>,
}

impl HealthServer {
    pub fn new(config: HealthServerConfig, metrics_collector: Arc<MetricsCollector>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            state: HealthServerState {
                metrics_collector,
                app_state: None,
            },
            shutdown_tx,
        }
    }

    /// Set the application state for health checks
    pub fn with_app_state(mut self, app_state: Arc<AppState>) -> Self {
        self.state.app_state = Some(app_state);
        self
    }

    /// Bind and serve until `stop` is called
    pub async fn start(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .context("Invalid health server address")?;

        let app = self.create_router();
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind health server to {}", addr))?;

        info!("Health server listening on http://{}", addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("Health server shutdown signal received");
            })
            .await?;

        info!("Health server stopped");
        Ok(())
    }

    /// Create the Axum router with all health endpoints
    pub fn create_router(&self) -> Router {
        Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/alive", get(alive_handler))
            .route("/metrics", get(metrics_handler))
            .route("/stats", get(stats_handler))
            .with_state(self.state.clone())
    }

    /// Stop the health server
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping health server...");

        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Health server was not running: {}", e);
        }

        Ok(())
    }
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ["/health", "/ready", "/alive", "/metrics", "/stats"]
    }))
}

/// Lightweight health check endpoint handler
async fn health_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    debug!("Health check requested");

    let Some(app_state) = &state.app_state else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "service": SERVICE_NAME,
                "version": env!("CARGO_PKG_VERSION"),
                "error": "Service not initialized"
            })),
        );
    };

    let (code, status) = match HealthCheck::readiness_check(app_state.clone()).await {
        Ok(HealthStatus::Healthy) => (StatusCode::OK, "healthy"),
        Ok(HealthStatus::Degraded) => (StatusCode::OK, "degraded"),
        Ok(HealthStatus::Unhealthy) | Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
    };

    (
        code,
        Json(json!({
            "status": status,
            "service": SERVICE_NAME,
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

async fn ready_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    debug!("Readiness check requested");

    match &state.app_state {
        Some(app_state) => match HealthCheck::readiness_check(app_state.clone()).await {
            Ok(HealthStatus::Healthy) => (StatusCode::OK, "Ready"),
            Ok(HealthStatus::Degraded) => (StatusCode::OK, "Degraded but ready"),
            Ok(HealthStatus::Unhealthy) => (StatusCode::SERVICE_UNAVAILABLE, "Not ready"),
            Err(e) => {
                error!("Readiness check failed: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "Not ready")
            }
        },
        None => (StatusCode::SERVICE_UNAVAILABLE, "Service not initialized"),
    }
}

async fn alive_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    debug!("Liveness check requested");

    match &state.app_state {
        Some(app_state) => match HealthCheck::liveness_check(app_state.clone()).await {
            Ok(HealthStatus::Healthy) => (StatusCode::OK, "Alive"),
            _ => (StatusCode::SERVICE_UNAVAILABLE, "Not alive"),
        },
        None => (StatusCode::SERVICE_UNAVAILABLE, "Service not initialized"),
    }
}

async fn metrics_handler(State(state): State<HealthServerState>) -> Response {
    debug!("Metrics endpoint requested");

    match encode_metrics(&state.metrics_collector) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode metrics".to_string(),
            )
                .into_response()
        }
    }
}

/// Detailed service statistics for humans
async fn stats_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    debug!("Stats endpoint requested");

    let error_body = |reason: &str| {
        json!({
            "service": {
                "name": SERVICE_NAME,
                "version": env!("CARGO_PKG_VERSION"),
                "status": "error"
            },
            "error": reason,
            "timestamp": chrono::Utc::now()
        })
    };

    let Some(app_state) = &state.app_state else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(error_body("Service not initialized")),
        );
    };

    match HealthCheck::check(app_state.clone()).await {
        Ok(health) => {
            let config = app_state.config();
            let stats = json!({
                "service": {
                    "name": health.service,
                    "version": health.version,
                    "status": health.status,
                    "uptime": health.stats.uptime_info
                },
                "matchmaking": {
                    "min_players": config.matchmaking.min_players,
                    "level_window": config.matchmaking.level_window,
                    "wait_mode": config.matchmaking.wait_mode,
                    "pending_requests": health.stats.pending_requests,
                    "active_topics": health.stats.active_topics
                },
                "waits": {
                    "requests": health.stats.requests,
                    "matched": health.stats.matched,
                    "timed_out": health.stats.timed_out
                },
                "matches": {
                    "formed": health.stats.matches_formed,
                    "recorder_failures": health.stats.recorder_failures
                },
                "components": health.checks,
                "timestamp": health.timestamp
            });

            (StatusCode::OK, Json(stats))
        }
        Err(e) => {
            error!("Failed to get stats: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(error_body("Failed to get service stats")),
            )
        }
    }
}

/// Render the registry in Prometheus text format
pub fn encode_metrics(metrics_collector: &MetricsCollector) -> Result<String> {
    let metric_families = metrics_collector.registry().gather();
    TextEncoder::new()
        .encode_to_string(&metric_families)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))
}
