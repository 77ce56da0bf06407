//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the table-match service using
//! Prometheus metrics.

use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the matchmaking service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Request and wait metrics
    request_metrics: RequestMetrics,

    /// Match formation metrics
    match_metrics: MatchMetrics,

    /// Performance metrics
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,

    /// Match records handed to the history recorder
    pub records_total: IntCounterVec,

    /// Match records the recorder failed to persist
    pub recorder_failures_total: IntCounterVec,
}

/// Request and wait metrics
#[derive(Clone)]
pub struct RequestMetrics {
    /// Match requests received
    pub requests_total: IntCounterVec,

    /// Requests rejected at validation
    pub rejected_total: IntCounter,

    /// How waits ended
    pub wait_outcomes_total: IntCounterVec,

    /// Callers currently waiting
    pub active_waiters: IntGauge,

    /// Live pending requests in the store
    pub pending_requests: IntGauge,

    /// Requests removed by the expiry sweeper
    pub expired_requests_total: IntCounter,

    /// Store operations that failed
    pub store_errors_total: IntCounterVec,
}

/// Match formation metrics
#[derive(Clone)]
pub struct MatchMetrics {
    /// Match attempts by result
    pub attempts_total: IntCounterVec,

    /// Claim races lost to a concurrent attempt
    pub race_losses_total: IntCounter,

    /// Matches formed
    pub matches_formed_total: IntCounter,

    /// Participants placed into matches
    pub participants_matched_total: IntCounter,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Time from request to outcome
    pub wait_duration: HistogramVec,

    /// Duration of a single match attempt
    pub attempt_duration: Histogram,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let request_metrics = RequestMetrics::new(&registry)?;
        let match_metrics = MatchMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            request_metrics,
            match_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn requests(&self) -> &RequestMetrics {
        &self.request_metrics
    }

    pub fn matches(&self) -> &MatchMetrics {
        &self.match_metrics
    }

    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Record a match request entering the coordinator
    pub fn record_request(&self, mode: &str) {
        self.request_metrics
            .requests_total
            .with_label_values(&[mode])
            .inc();
    }

    /// Record a request rejected at validation
    pub fn record_rejected(&self) {
        self.request_metrics.rejected_total.inc();
    }

    /// Record one match attempt
    pub fn record_attempt(&self, result: &str, duration: Duration) {
        self.match_metrics
            .attempts_total
            .with_label_values(&[result])
            .inc();

        if result == "race_lost" {
            self.match_metrics.race_losses_total.inc();
        }

        self.performance_metrics
            .attempt_duration
            .observe(duration.as_secs_f64());
    }

    /// Record a formed match
    pub fn record_match_formed(&self, size: usize) {
        self.match_metrics.matches_formed_total.inc();
        self.match_metrics
            .participants_matched_total
            .inc_by(size as u64);
    }

    /// Record how a wait ended
    pub fn record_wait_outcome(&self, outcome: &str, waited: Duration) {
        self.request_metrics
            .wait_outcomes_total
            .with_label_values(&[outcome])
            .inc();

        self.performance_metrics
            .wait_duration
            .with_label_values(&[outcome])
            .observe(waited.as_secs_f64());
    }

    /// Record a failed store operation
    pub fn record_store_error(&self, operation: &str) {
        self.request_metrics
            .store_errors_total
            .with_label_values(&[operation])
            .inc();
    }

    /// Record a history hand-off
    pub fn record_recorder_result(&self, recorder: &str, success: bool) {
        let status = if success { "success" } else { "error" };

        self.service_metrics
            .records_total
            .with_label_values(&[recorder, status])
            .inc();

        if !success {
            self.service_metrics
                .recorder_failures_total
                .with_label_values(&[recorder])
                .inc();
        }
    }

    /// Record requests removed by the sweeper
    pub fn record_expired(&self, count: usize) {
        self.request_metrics
            .expired_requests_total
            .inc_by(count as u64);
    }

    /// Set the pending requests gauge
    pub fn set_pending_requests(&self, count: usize) {
        self.request_metrics.pending_requests.set(count as i64);
    }

    pub fn waiter_started(&self) {
        self.request_metrics.active_waiters.inc();
    }

    pub fn waiter_finished(&self) {
        self.request_metrics.active_waiters.dec();
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("table_match_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let health_status = IntGauge::new(
            "table_match_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("table_match_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        let records_total = IntCounterVec::new(
            Opts::new(
                "table_match_records_total",
                "Match records handed to the history recorder",
            ),
            &["recorder", "status"],
        )?;
        registry.register(Box::new(records_total.clone()))?;

        let recorder_failures_total = IntCounterVec::new(
            Opts::new(
                "table_match_recorder_failures_total",
                "Match records that failed to persist",
            ),
            &["recorder"],
        )?;
        registry.register(Box::new(recorder_failures_total.clone()))?;

        Ok(Self {
            uptime_seconds,
            health_status,
            component_health,
            records_total,
            recorder_failures_total,
        })
    }
}

impl RequestMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let requests_total = IntCounterVec::new(
            Opts::new("table_match_requests_total", "Match requests received"),
            &["mode"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let rejected_total = IntCounter::new(
            "table_match_rejected_requests_total",
            "Requests rejected at validation",
        )?;
        registry.register(Box::new(rejected_total.clone()))?;

        let wait_outcomes_total = IntCounterVec::new(
            Opts::new("table_match_wait_outcomes_total", "How waits ended"),
            &["outcome"],
        )?;
        registry.register(Box::new(wait_outcomes_total.clone()))?;

        let active_waiters =
            IntGauge::new("table_match_active_waiters", "Callers currently waiting")?;
        registry.register(Box::new(active_waiters.clone()))?;

        let pending_requests = IntGauge::new(
            "table_match_pending_requests",
            "Live pending requests in the store",
        )?;
        registry.register(Box::new(pending_requests.clone()))?;

        let expired_requests_total = IntCounter::new(
            "table_match_expired_requests_total",
            "Requests removed after their TTL elapsed",
        )?;
        registry.register(Box::new(expired_requests_total.clone()))?;

        let store_errors_total = IntCounterVec::new(
            Opts::new("table_match_store_errors_total", "Failed store operations"),
            &["operation"],
        )?;
        registry.register(Box::new(store_errors_total.clone()))?;

        Ok(Self {
            requests_total,
            rejected_total,
            wait_outcomes_total,
            active_waiters,
            pending_requests,
            expired_requests_total,
            store_errors_total,
        })
    }
}

impl MatchMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let attempts_total = IntCounterVec::new(
            Opts::new("table_match_attempts_total", "Match attempts by result"),
            &["result"],
        )?;
        registry.register(Box::new(attempts_total.clone()))?;

        let race_losses_total = IntCounter::new(
            "table_match_race_losses_total",
            "Claims lost to a concurrent attempt",
        )?;
        registry.register(Box::new(race_losses_total.clone()))?;

        let matches_formed_total =
            IntCounter::new("table_match_matches_formed_total", "Matches formed")?;
        registry.register(Box::new(matches_formed_total.clone()))?;

        let participants_matched_total = IntCounter::new(
            "table_match_participants_matched_total",
            "Participants placed into matches",
        )?;
        registry.register(Box::new(participants_matched_total.clone()))?;

        Ok(Self {
            attempts_total,
            race_losses_total,
            matches_formed_total,
            participants_matched_total,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let wait_duration = HistogramVec::new(
            HistogramOpts::new(
                "table_match_wait_duration_seconds",
                "Time from request to outcome",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]),
            &["outcome"],
        )?;
        registry.register(Box::new(wait_duration.clone()))?;

        let attempt_duration = Histogram::with_opts(
            HistogramOpts::new(
                "table_match_attempt_duration_seconds",
                "Single match attempt duration",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1]),
        )?;
        registry.register(Box::new(attempt_duration.clone()))?;

        Ok(Self {
            wait_duration,
            attempt_duration,
        })
    }
}
