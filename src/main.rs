//! Main entry point for the table-match service
//!
//! Loads configuration, installs logging, starts the intake and health
//! servers and shuts everything down on SIGINT/SIGTERM.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use table_match::config::{validate_config, AppConfig};
use table_match::service::{AppState, HealthCheck, HealthStatus};
use table_match::WaitMode;
use tokio::signal;
use tracing::{error, info, warn};

/// Table Match - level-window matchmaking service
#[derive(Parser)]
#[command(
    name = "table-match",
    version,
    about = "Groups participants at the same table and similar level into matches",
    long_about = "table-match accepts match requests over HTTP, holds them in a TTL-bounded \
                 store, forms groups of min_players at one table within a level window, and \
                 claims each group atomically so no participant lands in two matches."
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Perform health check and exit
    #[arg(long, help = "Perform a health check and exit with status code")]
    health_check: bool,

    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    #[arg(long, value_name = "URL", help = "Override AMQP connection URL")]
    amqp_url: Option<String>,

    /// Keep match history in the log instead of publishing it
    #[arg(long, help = "Disable AMQP match history publishing")]
    no_audit: bool,

    #[arg(long, value_name = "PORT", help = "Override match intake port")]
    http_port: Option<u16>,

    #[arg(long, value_name = "PORT", help = "Override health and metrics port")]
    metrics_port: Option<u16>,

    #[arg(long, value_name = "N", help = "Override participants per match")]
    min_players: Option<usize>,

    #[arg(long, value_name = "MODE", help = "Override wait mode (notify, polling)")]
    wait_mode: Option<WaitMode>,

    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    #[arg(
        long,
        help = "Validate configuration and exit without starting service"
    )]
    dry_run: bool,
}

/// Initialize structured logging; `RUST_LOG` wins over the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Build the service in-process, run a full check and exit with its verdict
async fn perform_health_check(config: AppConfig) -> Result<()> {
    info!("Performing health check...");

    let app_state = Arc::new(AppState::new(config).await?);
    app_state.start().await?;

    let health = HealthCheck::check(app_state.clone()).await;
    if let Err(e) = app_state.shutdown().await {
        warn!("Shutdown after health check failed: {}", e);
    }

    match health {
        Ok(health) => {
            println!("Health Check: {}", health.status);
            for check in &health.checks {
                println!(
                    "  {}: {}{}",
                    check.name,
                    check.status,
                    check
                        .message
                        .as_ref()
                        .map(|m| format!(" ({})", m))
                        .unwrap_or_default()
                );
            }
            println!("  Uptime: {}", health.stats.uptime_info);

            if health.status == HealthStatus::Unhealthy {
                std::process::exit(1);
            }
            std::process::exit(0);
        }
        Err(e) => {
            error!("Health check failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C) signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

fn display_startup_banner(config: &AppConfig) {
    info!("🎲 Table Match Service");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Intake port: {}", config.service.http_port);
    info!("   Health port: {}", config.service.metrics_port);
    if config.amqp.enabled {
        info!("   Match history: AMQP ({})", config.amqp.exchange_name);
    } else {
        info!("   Match history: log only");
    }
    info!(
        "   Matching: {} players, level window ±{}",
        config.matchmaking.min_players, config.matchmaking.level_window
    );
    info!(
        "   Waiting: {} mode, ttl {}ms, timeout {}s",
        config.matchmaking.wait_mode,
        config.matchmaking.request_ttl_ms,
        config.matchmaking.wait_timeout_seconds
    );
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

/// Load configuration from file or environment, then apply CLI overrides
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(config_path) => AppConfig::from_file(config_path)?,
        None => AppConfig::from_env()?,
    };

    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }

    if args.debug {
        config.service.log_level = "debug".to_string();
    }

    if let Some(amqp_url) = &args.amqp_url {
        config.amqp.url = amqp_url.clone();
    }

    if args.no_audit {
        config.amqp.enabled = false;
    }

    if let Some(http_port) = args.http_port {
        config.service.http_port = http_port;
    }

    if let Some(metrics_port) = args.metrics_port {
        config.service.metrics_port = metrics_port;
    }

    if let Some(min_players) = args.min_players {
        config.matchmaking.min_players = min_players;
    }

    if let Some(wait_mode) = args.wait_mode {
        config.matchmaking.wait_mode = wait_mode;
    }

    // Overrides can break what the loader already validated
    validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {:#}", e);
        std::process::exit(1);
    });

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if args.health_check {
        return perform_health_check(config).await;
    }

    display_startup_banner(&config);

    if args.dry_run {
        info!("Configuration validation successful");
        info!("Dry run completed - exiting without starting service");
        return Ok(());
    }

    info!("Initializing service components...");
    let app_state = match AppState::new(config.clone()).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        std::process::exit(1);
    }

    info!("✅ table-match is running");
    info!("Press Ctrl+C to shutdown gracefully...");

    wait_for_shutdown_signal().await;

    info!("🛑 Shutdown signal received, beginning graceful shutdown...");

    match tokio::time::timeout(config.shutdown_timeout(), app_state.shutdown()).await {
        Ok(Ok(())) => info!("✅ Graceful shutdown completed successfully"),
        Ok(Err(e)) => warn!("Shutdown finished with errors: {}", e),
        Err(_) => warn!("⚠️  Shutdown timeout exceeded, forcing exit"),
    }

    info!("🛑 table-match stopped");
    Ok(())
}
