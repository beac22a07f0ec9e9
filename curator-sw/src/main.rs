//! curator-sw (Scoring Worker) - Main entry point
//!
//! Loads the classifier heads of every curation mode, binds the worker
//! address, accepts exactly one dispatcher connection and serves it until the
//! dispatcher disconnects.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use curator_common::config::load_config;
use curator_common::db::{init_database, CurationModeStore};
use curator_sw::classifier::{HashingFeatureExtractor, HeadClassifier};
use curator_sw::serve_one;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for curator-sw
#[derive(Parser, Debug)]
#[command(name = "curator-sw")]
#[command(about = "Scoring worker for the content curator")]
#[command(version)]
struct Args {
    /// Config file (overrides CURATOR_CONFIG and the platform default)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on (overrides [worker] bind_addr)
    #[arg(short, long, env = "CURATOR_SW_BIND")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Start at info until the config file names a level; RUST_LOG wins over both
    let rust_log_set = std::env::var_os("RUST_LOG").is_some();
    let (filter, filter_handle) = reload::Layer::new(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting curator scoring worker (curator-sw) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let args = Args::parse();
    let config = load_config(args.config.as_deref());

    if !rust_log_set {
        filter_handle
            .reload(EnvFilter::new(&config.logging.level))
            .context("Failed to apply configured log level")?;
    }

    info!("Database: {}", config.database_path.display());
    let pool = init_database(&config.database_path)
        .await
        .context("Failed to open database")?;
    let modes = CurationModeStore::open(pool, config.id_claim.max_attempts)
        .await
        .context("Failed to open curation modes")?;

    let extractor = HashingFeatureExtractor::new(config.worker.feature_dim);
    let classifier = HeadClassifier::load(extractor, &modes)
        .await
        .context("Failed to load classifier heads")?;

    let bind_addr = args.bind.unwrap_or_else(|| config.worker.bind_addr.clone());
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    info!("Listening for dispatcher on {}", bind_addr);

    tokio::select! {
        result = serve_one(listener, config.worker.max_message_size, Arc::new(classifier)) => {
            let stats = result.context("Scoring worker failed")?;
            info!(
                "Served {} scores ({} failed, {} skipped)",
                stats.scored, stats.failed, stats.skipped
            );
        }
        _ = shutdown_signal() => {}
    }

    info!("Scoring worker shutdown complete");
    Ok(())
}

/// Ctrl+C / SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
