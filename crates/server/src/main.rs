//! imagegate server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use imagegate_core::config::AppConfig;
use imagegate_server::{AppState, create_router};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// imagegate - an image hosting gateway
#[derive(Parser, Debug)]
#[command(name = "imagegated")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "IMAGEGATE_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

/// Load configuration from an optional TOML file and `IMAGEGATE_` variables.
fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();

    if std::path::Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}, using defaults and environment", path);
    }

    let mut config: AppConfig = figment
        .merge(Env::prefixed("IMAGEGATE_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    config
        .apply_env_overrides()
        .map_err(anyhow::Error::msg)
        .context("invalid environment override")?;

    let warnings = config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;
    for warning in warnings {
        tracing::warn!("{warning}");
    }

    Ok(config)
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received, draining connections");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("imagegate v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    imagegate_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    if let Some(temp_dir) = &config.upload.temp_dir {
        tokio::fs::create_dir_all(temp_dir)
            .await
            .with_context(|| format!("failed to create temp dir {}", temp_dir.display()))?;
    }

    let storage = imagegate_storage::from_config(&config.storage)
        .await
        .context("failed to initialize blob store")?;

    // Fail fast on bad credentials rather than on the first upload.
    storage
        .health_check()
        .await
        .context("blob store health check failed")?;
    tracing::info!(backend = storage.backend_name(), "Blob store ready");

    let metadata = imagegate_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize record store")?;
    tracing::info!(path = %config.metadata.path.display(), "Record store ready");

    let state = AppState::new(config.clone(), storage, metadata.clone());

    if let Some(interval) = state.rate_limit_cleanup_interval() {
        imagegate_server::ratelimit::spawn_cleanup_task(state.rate_limit.clone(), interval);
        tracing::info!(
            interval_secs = interval.as_secs(),
            "Rate limiter cleanup task spawned"
        );
    }

    if let Some(interval) = state.cache_cleanup_interval() {
        imagegate_server::resolve::spawn_cleanup_task(state.cache.clone(), interval);
        tracing::info!(
            interval_secs = interval.as_secs(),
            "Resolution cache cleanup task spawned"
        );
    }

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    tracing::info!("Listening on {}", addr);

    let draining = Arc::new(Notify::new());
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown({
        let draining = draining.clone();
        async move {
            shutdown_signal().await;
            draining.notify_one();
        }
    })
    .into_future();

    let shutdown_timeout = config.server.shutdown_timeout();
    tokio::select! {
        result = server => result.context("server error")?,
        _ = async {
            draining.notified().await;
            tokio::time::sleep(shutdown_timeout).await;
        } => {
            tracing::warn!(
                timeout_secs = shutdown_timeout.as_secs(),
                "In-flight requests did not finish before the shutdown timeout"
            );
        }
    }

    metadata.close().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
