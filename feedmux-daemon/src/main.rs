//! feedmuxd - feed aggregation daemon
//!
//! Polls the registered backends, diffs each fetch against what every view
//! last published and streams the changes to local clients.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use feedmux_common::config::{load_default_config, load_toml_config, Settings, SettingsOverrides};
use feedmux_daemon::banned::BanRegistry;
use feedmux_daemon::cache::ResultCache;
use feedmux_daemon::{backends, build_router, AppState, Core, CoreSettings};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for feedmuxd
#[derive(Parser, Debug)]
#[command(name = "feedmuxd")]
#[command(about = "Feed aggregation daemon")]
#[command(version)]
struct Args {
    /// Address to listen on
    #[arg(short, long, env = "FEEDMUX_BIND")]
    bind: Option<String>,

    /// Cache directory (result cache, ban list, thumbnails)
    #[arg(long, env = "FEEDMUX_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Refresh interval in seconds
    #[arg(long, env = "FEEDMUX_REFRESH_SECS")]
    refresh_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "FEEDMUX_LOG_LEVEL")]
    log_level: Option<String>,

    /// Start offline: serve cached results without polling until
    /// `POST /online` reports connectivity
    #[arg(long)]
    offline: bool,

    /// Config file (overrides the default search path)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml = match &args.config {
        Some(path) => Some(
            load_toml_config(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?,
        ),
        None => load_default_config().context("Failed to read config file")?,
    };
    let settings = Settings::resolve(
        SettingsOverrides {
            bind: args.bind,
            cache_dir: args.cache_dir,
            refresh_interval_secs: args.refresh_secs,
            log_level: args.log_level,
        },
        toml,
    )
    .context("Invalid configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},tower_http=info", settings.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting feedmuxd v{}", env!("CARGO_PKG_VERSION"));
    info!("Cache directory: {}", settings.cache_dir.display());
    info!("Refresh interval: {:?}", settings.refresh_interval);

    let bans = BanRegistry::load(settings.ban_list_path()).into_shared();
    let cache = ResultCache::new(settings.result_cache_dir(), settings.thumbnail_dir());

    let mut core = Core::new(
        CoreSettings {
            refresh_interval: settings.refresh_interval,
            event_capacity: settings.event_capacity,
        },
        cache,
        bans,
    );
    for backend in backends::builtin() {
        core.register_backend(backend);
    }
    if args.offline {
        core.set_online(false);
    }
    let core = Arc::new(core);

    let app = build_router(AppState::new(Arc::clone(&core)));

    let listener = tokio::net::TcpListener::bind(&settings.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", settings.bind))?;
    info!("feedmuxd listening on http://{}", settings.bind);
    info!("Health check: http://{}/health", settings.bind);

    let shutdown_core = Arc::clone(&core);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Ends every open event stream so connections can drain
            shutdown_core.shutdown().await;
        })
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
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
