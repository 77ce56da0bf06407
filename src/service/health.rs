//! Health check logic and monitoring
//!
//! Readiness and liveness probes plus a detailed report of the request
//! store, the history recorder and the wait coordinator.

use crate::service::app::AppState;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Gauge value exported to Prometheus
    pub fn as_gauge(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    fn combine(self, other: &HealthStatus) -> HealthStatus {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Optional error message if not healthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Requests currently pending in the store
    pub pending_requests: usize,
    /// Match requests received since start
    pub requests: u64,
    /// Waits that ended in a match
    pub matched: u64,
    /// Waits that hit their deadline
    pub timed_out: u64,
    /// Matches formed and announced
    pub matches_formed: u64,
    pub recorder_failures: u64,
    /// Notification topics with live subscribers
    pub active_topics: usize,
    pub uptime_info: String,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(app_state: Arc<AppState>) -> Result<Self> {
        let checks = vec![
            Self::check_service_running(&app_state).await,
            Self::check_request_store(&app_state).await,
            Self::check_recorder(&app_state),
        ];

        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |acc, check| acc.combine(&check.status));

        let stats = Self::gather_service_stats(&app_state).await;

        Ok(HealthCheck {
            status,
            service: app_state.config().service.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if app_state.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - the service can accept match requests
    pub async fn readiness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if !app_state.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }

        Ok(Self::check_request_store(&app_state).await.status)
    }

    async fn check_service_running(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = if app_state.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn check_request_store(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();
        let store = app_state.store();

        let (status, message) = if store.is_closed() {
            (
                HealthStatus::Unhealthy,
                Some("Request store is closed".to_string()),
            )
        } else {
            match store.pending_count().await {
                Ok(_) => (HealthStatus::Healthy, None),
                Err(e) => {
                    error!("Request store check failed: {}", e);
                    (
                        HealthStatus::Unhealthy,
                        Some(format!("Store check failed: {}", e)),
                    )
                }
            }
        };

        ComponentCheck {
            name: "request_store".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// History loss never blocks matching, so a dead broker only degrades
    fn check_recorder(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match app_state.amqp_connection() {
            Some(connection) if connection.is_alive() => (HealthStatus::Healthy, None),
            Some(_) => (
                HealthStatus::Degraded,
                Some("AMQP connection is closed; match history is not published".to_string()),
            ),
            None => (
                HealthStatus::Healthy,
                Some(format!("Recording via {}", app_state.recorder_name())),
            ),
        };

        ComponentCheck {
            name: "match_recorder".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn gather_service_stats(app_state: &AppState) -> ServiceStats {
        let uptime_info = format!("Up {}s", app_state.uptime().as_secs());

        let pending_requests = match app_state.store().pending_count().await {
            Ok(count) => count,
            Err(e) => {
                debug!("Failed to count pending requests for health check: {}", e);
                0
            }
        };

        let coordinator_stats = match app_state.coordinator().get_stats() {
            Ok(stats) => stats,
            Err(e) => {
                debug!("Failed to get coordinator stats for health check: {}", e);
                Default::default()
            }
        };

        ServiceStats {
            pending_requests,
            requests: coordinator_stats.requests,
            matched: coordinator_stats.matched,
            timed_out: coordinator_stats.timed_out,
            matches_formed: coordinator_stats.matches_announced,
            recorder_failures: coordinator_stats.recorder_failures,
            active_topics: app_state.notifier().topic_count(),
            uptime_info,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}
