use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use throttled::config::{LoggingConfig, StorageBackend, ThrottledConfig};
use throttled::http::HttpServer;
use throttled::storage::{EventStore, MemoryEventStore, SqliteEventStore};
use throttled::throttle::Throttler;

/// Rule-based request throttling service.
#[derive(Debug, Parser)]
#[command(name = "throttled", version, about)]
struct Cli {
    /// Service configuration file (YAML)
    #[arg(short, long, env = "THROTTLED_CONFIG")]
    config: Option<PathBuf>,

    /// Throttle rules file, overriding `throttling.rules_path`
    #[arg(short, long)]
    rules: Option<PathBuf>,

    /// Validate the configuration, print the rule registry and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ThrottledConfig::load(cli.config.as_deref())?;
    if let Some(rules) = cli.rules {
        config.throttling.rules_path = Some(rules.display().to_string());
    }

    init_tracing(&config.logging);

    info!("Starting throttled");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        http_addr = %config.server.http_addr,
        backend = ?config.storage.backend,
        "Configuration loaded"
    );

    let rules = config.load_rules()?;
    info!(count = rules.throttles.len(), "Throttle rules loaded");

    if cli.check {
        println!("{}", serde_json::to_string_pretty(&rules.throttles)?);
        return Ok(());
    }

    let store: Arc<dyn EventStore> = match config.storage.backend {
        StorageBackend::Memory => Arc::new(MemoryEventStore::new()),
        StorageBackend::Sqlite => Arc::new(SqliteEventStore::connect(&config.storage.sqlite_url).await?),
    };
    let throttler = Throttler::with_rules(store, &rules);
    info!("Throttler initialized");

    let server = HttpServer::new(config.server.http_addr, throttler);
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("throttled stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
