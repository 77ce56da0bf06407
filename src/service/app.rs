//! Main application state and service coordination
//!
//! `AppState` wires the request store, matcher, notifier, match recorder and
//! wait coordinator together and owns the HTTP servers and background tasks.

use crate::amqp::{AmqpConfig, AmqpConnection, AmqpMatchRecorder, PublisherConfig};
use crate::audit::{LoggingMatchRecorder, MatchRecorder};
use crate::config::AppConfig;
use crate::coordinator::WaitCoordinator;
use crate::matching::LevelWindowMatcher;
use crate::metrics::{HealthServer, HealthServerConfig, MetricsCollector, MetricsService};
use crate::notify::BroadcastNotifier;
use crate::service::health::HealthCheck;
use crate::service::intake::{IntakeServer, IntakeServerConfig};
use crate::store::{InMemoryRequestStore, RequestStore};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    config: AppConfig,

    /// Matchmaking core
    store: Arc<dyn RequestStore>,
    notifier: Arc<BroadcastNotifier>,
    coordinator: Arc<WaitCoordinator>,

    /// Match history sink and, when publishing, its broker connection
    recorder_name: &'static str,
    amqp_connection: Option<Arc<AmqpConnection>>,

    metrics: Arc<MetricsCollector>,
    metrics_service: Mutex<Option<Arc<MetricsService>>>,
    intake_server: Arc<IntakeServer>,

    background_tasks: Mutex<Vec<JoinHandle<()>>>,
    is_running: Arc<RwLock<bool>>,
    started_at: Instant,
}

impl AppState {
    /// Initialize the application with all dependencies
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing table-match service");
        info!(
            "Configuration: service={}, min_players={}, level_window={}, wait_mode={}",
            config.service.name,
            config.matchmaking.min_players,
            config.matchmaking.level_window,
            config.matchmaking.wait_mode
        );

        let metrics =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let (recorder, amqp_connection) = Self::initialize_recorder(&config).await?;
        let recorder_name = recorder.name();

        let store: Arc<dyn RequestStore> =
            Arc::new(InMemoryRequestStore::new(config.store_config()));
        let notifier = Arc::new(BroadcastNotifier::default());
        let matcher = Arc::new(LevelWindowMatcher::new(
            store.clone(),
            config.matching_config(),
        ));

        let coordinator = Arc::new(
            WaitCoordinator::new(
                store.clone(),
                matcher,
                notifier.clone(),
                recorder,
                config.coordinator_config(),
            )
            .with_metrics(metrics.clone()),
        );

        let intake_server = Arc::new(IntakeServer::new(
            IntakeServerConfig {
                port: config.service.http_port,
                host: "0.0.0.0".to_string(),
            },
            coordinator.clone(),
        ));

        Ok(Self {
            config,
            store,
            notifier,
            coordinator,
            recorder_name,
            amqp_connection,
            metrics,
            metrics_service: Mutex::new(None),
            intake_server,
            background_tasks: Mutex::new(Vec::new()),
            is_running: Arc::new(RwLock::new(false)),
            started_at: Instant::now(),
        })
    }

    /// Start the HTTP servers and background maintenance
    pub async fn start(self: &Arc<Self>) -> Result<(), ServiceError> {
        info!("Starting table-match service");

        self.mark_running(true).await;

        self.start_metrics_service().await?;
        self.start_intake_server().await;
        self.start_background_tasks().await;

        info!("✅ table-match service started successfully");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of table-match service");

        self.mark_running(false).await;

        if let Err(e) = self.intake_server.stop().await {
            warn!("Failed to stop intake server: {}", e);
        }

        if let Some(metrics_service) = self.metrics_service.lock().await.take() {
            if let Err(e) = metrics_service.stop().await {
                warn!("Failed to stop metrics service: {}", e);
            } else {
                info!("✅ Metrics service stopped");
            }
        }

        self.stop_background_tasks().await;

        // Waiters still in flight fail fast with StoreUnavailable
        self.store.close();

        if let Some(connection) = &self.amqp_connection {
            if let Err(e) = connection.close().await {
                warn!("Failed to close AMQP connection: {}", e);
            } else {
                info!("✅ AMQP connection closed");
            }
        }

        let final_stats =
            self.coordinator
                .get_stats()
                .map_err(|e| ServiceError::BackgroundTask {
                    message: format!("Failed to get final stats: {}", e),
                })?;

        info!("Final service statistics: {:?}", final_stats);
        info!("✅ table-match service shutdown completed");

        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub(crate) async fn mark_running(&self, running: bool) {
        *self.is_running.write().await = running;
    }

    pub fn store(&self) -> Arc<dyn RequestStore> {
        self.store.clone()
    }

    pub fn notifier(&self) -> Arc<BroadcastNotifier> {
        self.notifier.clone()
    }

    pub fn coordinator(&self) -> Arc<WaitCoordinator> {
        self.coordinator.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    /// Name of the active match history sink
    pub fn recorder_name(&self) -> &'static str {
        self.recorder_name
    }

    /// Broker connection, present only when history is published over AMQP
    pub fn amqp_connection(&self) -> Option<Arc<AmqpConnection>> {
        self.amqp_connection.clone()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Pick the history sink: AMQP when enabled, a log line otherwise
    async fn initialize_recorder(
        config: &AppConfig,
    ) -> Result<(Arc<dyn MatchRecorder>, Option<Arc<AmqpConnection>>), ServiceError> {
        if !config.amqp.enabled {
            info!("AMQP disabled - match history goes to the log only");
            return Ok((Arc::new(LoggingMatchRecorder), None));
        }

        info!("Connecting to AMQP broker for match history");

        let amqp_config = AmqpConfig::from_url(&config.amqp.url)
            .map_err(|e| ServiceError::Configuration {
                message: format!("Failed to parse AMQP URL: {}", e),
            })?
            .with_retry(config.amqp.max_retry_attempts, config.amqp.retry_delay_ms)
            .with_connection_timeout(config.amqp_connection_timeout());

        let connection =
            AmqpConnection::new(amqp_config)
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to connect to AMQP: {}", e),
                })?;

        let channel = connection
            .connection()
            .open_channel(None)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open AMQP channel: {}", e),
            })?;

        let publisher_config = PublisherConfig {
            exchange: config.amqp.exchange_name.clone(),
            max_retries: config.amqp.max_retry_attempts,
            retry_delay_ms: config.amqp.retry_delay_ms,
            ..PublisherConfig::default()
        };

        let recorder = AmqpMatchRecorder::new(channel, publisher_config)
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to initialize match history publisher: {}", e),
            })?;

        Ok((Arc::new(recorder), Some(Arc::new(connection))))
    }

    async fn start_metrics_service(self: &Arc<Self>) -> Result<(), ServiceError> {
        let port = self.config.service.metrics_port;
        info!("Starting metrics and health endpoints on port {}", port);

        let health_server = Arc::new(
            HealthServer::new(
                HealthServerConfig {
                    port,
                    host: "0.0.0.0".to_string(),
                },
                self.metrics.clone(),
            )
            .with_app_state(self.clone()),
        );
        let metrics_service = Arc::new(MetricsService::new(self.metrics.clone(), health_server));

        let handle = {
            let metrics_service = metrics_service.clone();
            tokio::spawn(async move {
                if let Err(e) = metrics_service.start().await {
                    error!("Metrics service failed: {}", e);
                }
            })
        };

        *self.metrics_service.lock().await = Some(metrics_service);
        self.background_tasks.lock().await.push(handle);

        info!("✅ Metrics service started on port {}", port);
        Ok(())
    }

    async fn start_intake_server(&self) {
        let intake_server = self.intake_server.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = intake_server.start().await {
                error!("Intake server failed: {}", e);
            }
        });

        self.background_tasks.lock().await.push(handle);
        info!(
            "✅ Match intake started on port {}",
            self.config.service.http_port
        );
    }

    /// Start background maintenance tasks
    async fn start_background_tasks(self: &Arc<Self>) {
        info!(
            "Starting expiry sweeper ({}s interval)...",
            self.config.cleanup_interval().as_secs()
        );
        let sweeper_task = {
            let store = self.store.clone();
            let metrics = self.metrics.clone();
            let cleanup_interval = self.config.cleanup_interval();
            let is_running = self.is_running.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(cleanup_interval);

                while *is_running.read().await {
                    interval.tick().await;

                    let timer = metrics.start_timer();
                    match store.purge_expired().await {
                        Ok(purged) if purged.total() > 0 => {
                            info!(
                                "Purged {} expired requests and {} stale results in {:?}",
                                purged.expired_requests,
                                purged.stale_results,
                                timer.stop()
                            );
                            metrics.record_expired(purged.expired_requests);
                        }
                        Ok(_) => debug!("Expiry sweep found nothing to purge"),
                        Err(e) => {
                            warn!("Expiry sweep failed: {}", e);
                            metrics.record_store_error("purge_expired");
                        }
                    }

                    if let Ok(pending) = store.pending_count().await {
                        metrics.set_pending_requests(pending);
                    }
                }

                info!("Expiry sweeper stopped");
            })
        };

        info!("Starting health metrics task (15s interval)...");
        let health_metrics_task = {
            let app_state = self.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(15));

                while app_state.is_running().await {
                    interval.tick().await;

                    let metrics = app_state.metrics();
                    metrics
                        .service()
                        .uptime_seconds
                        .set(app_state.uptime().as_secs() as i64);

                    match HealthCheck::check(app_state.clone()).await {
                        Ok(health) => {
                            metrics.update_health_status(health.status.as_gauge());
                            for check in &health.checks {
                                metrics.update_component_health(
                                    &check.name,
                                    check.status != crate::service::HealthStatus::Unhealthy,
                                );
                            }
                            debug!(
                                "Health check: {} - {} pending, {} matches formed",
                                health.status,
                                health.stats.pending_requests,
                                health.stats.matches_formed
                            );
                        }
                        Err(e) => warn!("Health check failed: {}", e),
                    }
                }

                info!("Health metrics task stopped");
            })
        };

        let mut tasks = self.background_tasks.lock().await;
        tasks.push(sweeper_task);
        tasks.push(health_metrics_task);
        info!("2 background maintenance tasks started");
    }

    async fn stop_background_tasks(&self) {
        let mut tasks = self.background_tasks.lock().await;
        let task_count = tasks.len();
        if task_count == 0 {
            return;
        }

        info!("Stopping {} background tasks...", task_count);

        // Servers got their shutdown signal first; give them a moment to drain
        tokio::time::sleep(Duration::from_millis(100)).await;
        for task in tasks.drain(..) {
            task.abort();
        }

        info!("✅ All {} background tasks stopped", task_count);
    }
}
