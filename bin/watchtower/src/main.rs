//! Watchtower - multi-chain event watcher.
//!
//! # Usage
//!
//! ```bash
//! # Start with the default config file
//! watchtower
//!
//! # Start with environment overrides
//! DATABASE_URL=postgres://localhost/watchtower watchtower --config jobs.yaml
//!
//! # Dry run: map everything, deliver nothing
//! watchtower --config jobs.yaml --dry-run --ephemeral
//! ```

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};
use tracing_subscriber::{fmt, EnvFilter};

use watchtower_chains::{AptosSource, EvmSource, RpcClientConfig, SolanaSource, SuiSource};
use watchtower_core::error::WatcherError;
use watchtower_core::metrics::init_metrics;
use watchtower_core::models::{JobDefinition, SourceKind};
use watchtower_core::ports::{AlertSink, ChainSource, LogAlertSink, WatermarkStore};
use watchtower_core::services::{Poller, PollerConfig};
use watchtower_handlers::build_handler;
use watchtower_storage::{Database, DatabaseConfig, InMemoryWatermarkStore, PgWatermarkStore};

use config::AppConfig;

/// Watchtower CLI - multi-chain event watcher.
#[derive(Parser, Debug)]
#[command(name = "watchtower")]
#[command(about = "Watchtower - multi-chain event watcher")]
#[command(version)]
struct Cli {
    /// Path to the job configuration file (YAML or JSON).
    #[arg(long, env = "CONFIG_PATH", default_value = "watchtower.yaml")]
    config: PathBuf,

    /// PostgreSQL database URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost/watchtower"
    )]
    database_url: String,

    /// Prometheus metrics port.
    #[arg(long, env = "METRICS_PORT", default_value = "9090")]
    metrics_port: u16,

    /// Enable JSON log output.
    #[arg(long, env = "JSON_LOGS")]
    json_logs: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Swap every delivery target for the logging sink.
    #[arg(long, env = "DRY_RUN")]
    dry_run: bool,

    /// Keep watermarks in memory instead of PostgreSQL. Progress is lost
    /// on restart; useful with --dry-run.
    #[arg(long)]
    ephemeral: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    // Prometheus metrics exporter (optional - failures don't crash the app)
    let metrics_enabled = match format!("0.0.0.0:{}", cli.metrics_port).parse::<std::net::SocketAddr>() {
        Ok(metrics_addr) => {
            match PrometheusBuilder::new()
                .with_http_listener(metrics_addr)
                .install()
            {
                Ok(()) => {
                    init_metrics();
                    true
                }
                Err(e) => {
                    warn!("⚠️  Failed to start metrics exporter: {}. Continuing without metrics.", e);
                    false
                }
            }
        }
        Err(e) => {
            warn!("⚠️  Invalid metrics address: {}. Continuing without metrics.", e);
            false
        }
    };

    // ─────────────────────────────────────────────────────────────────────────
    // 🚀 STARTUP
    // ─────────────────────────────────────────────────────────────────────────
    info!("🚀 Starting Watchtower");
    debug!(config = %cli.config.display(), "Config file");
    if cli.dry_run {
        info!("🔇 Dry run: targets replaced by the logging sink");
    }

    let app_config = AppConfig::load(&cli.config).context("Failed to load job configuration")?;
    info!(jobs = app_config.jobs.len(), "📋 Configuration loaded");

    // ─────────────────────────────────────────────────────────────────────────
    // 🗄️ WATERMARK STORE
    // ─────────────────────────────────────────────────────────────────────────
    let mut db = None;
    let store: Arc<dyn WatermarkStore> = if cli.ephemeral {
        info!("🗄️  Using in-memory watermark store (progress lost on restart)");
        Arc::new(InMemoryWatermarkStore::new())
    } else {
        debug!(database_url = %mask_password(&cli.database_url), "Database endpoint");
        info!("🗄️  Connecting to database...");
        let database = Database::connect(&DatabaseConfig::with_url(&cli.database_url))
            .await
            .context("Failed to connect to database")?;
        database
            .ensure_schema()
            .await
            .context("Failed to prepare watermark schema")?;
        if !database.is_healthy().await {
            anyhow::bail!("Database health check failed after schema setup");
        }
        info!("🗄️  Database ready");
        let store = Arc::new(PgWatermarkStore::new(&database));
        db = Some(database);
        store
    };

    // ─────────────────────────────────────────────────────────────────────────
    // ⚡ POLLERS START
    // ─────────────────────────────────────────────────────────────────────────
    let (shutdown_tx, _) = watch::channel(false);
    let alerts: Arc<dyn AlertSink> = Arc::new(LogAlertSink);

    let mut poller_handles = Vec::new();
    for job in &app_config.jobs {
        let source = build_source(job);
        let handlers = job
            .handlers
            .iter()
            .map(|def| build_handler(def, cli.dry_run))
            .collect();

        let poller = Poller::new(
            job.clone(),
            source,
            handlers,
            store.clone(),
            alerts.clone(),
            PollerConfig::default(),
        );

        let job_id = job.id.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let handle = tokio::spawn(
            async move {
                if let Err(e) = poller.run(shutdown_rx).await {
                    match e {
                        WatcherError::ShutdownRequested => {}
                        other => error!(error = %other, "❌ Poller stopped with error"),
                    }
                }
            }
            .instrument(info_span!("poller", job = %job_id)),
        );
        poller_handles.push(handle);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // ✅ READY
    // ─────────────────────────────────────────────────────────────────────────
    info!("✅ Watchtower ready");
    info!("   ⛓️  Jobs:     {}", app_config.jobs.len());
    if metrics_enabled {
        info!(
            "   📊 Metrics:  http://localhost:{}/metrics",
            cli.metrics_port
        );
    } else {
        info!("   📊 Metrics:  disabled");
    }
    info!("   Press Ctrl+C to stop");

    shutdown_signal().await;

    // ─────────────────────────────────────────────────────────────────────────
    // 🛑 SHUTDOWN
    // ─────────────────────────────────────────────────────────────────────────
    info!("🛑 Shutting down...");
    let _ = shutdown_tx.send(true);

    for handle in poller_handles {
        match tokio::time::timeout(std::time::Duration::from_secs(30), handle).await {
            Ok(_) => debug!("Poller stopped"),
            Err(_) => warn!("⚠️  Poller shutdown timed out"),
        }
    }

    if let Some(db) = db {
        db.close().await;
    }

    info!("🛑 Shutdown complete");
    Ok(())
}

/// Build the chain source adapter a job declares.
fn build_source(job: &JobDefinition) -> Arc<dyn ChainSource> {
    let chain_id = job.chain_id;
    match &job.source {
        SourceKind::Evm {
            rpc_url,
            finality_resolution,
            scan,
        } => Arc::new(EvmSource::new(
            RpcClientConfig::new(rpc_url),
            chain_id,
            *scan,
            finality_resolution,
        )),
        SourceKind::Solana { rpc_url } => {
            Arc::new(SolanaSource::new(RpcClientConfig::new(rpc_url), chain_id))
        }
        SourceKind::Sui { rpc_url } => {
            Arc::new(SuiSource::new(RpcClientConfig::new(rpc_url), chain_id))
        }
        SourceKind::Aptos { rest_url } => {
            Arc::new(AptosSource::new(RpcClientConfig::new(rest_url), chain_id))
        }
    }
}

/// Initialize tracing subscriber.
fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }
}

/// Mask password in database URL for logging.
fn mask_password(url_str: &str) -> String {
    match url::Url::parse(url_str) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("****"));
            }
            url.to_string()
        }
        Err(_) => url_str.to_string(),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
