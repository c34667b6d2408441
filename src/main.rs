mod bot;
mod config;
mod dispatch;
mod handlers;
mod logging;
mod message;
mod platform;
mod storage;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::bot::Bot;
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    // Held until exit so buffered file logs get flushed
    let _log_guard = logging::init(&config.logging)?;

    info!("Configuration loaded from {}", config_path.display());
    info!("  Platforms: {:?}", config.general.enabled_platforms);
    info!("  Proxy: {}", config.proxy.url().unwrap_or("none"));
    info!("  Storage: {}", config.storage.enabled);

    let config = Arc::new(config);
    let mut bot = Bot::new(Arc::clone(&config));

    let downloads = if config.strategies.download.enabled {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(handlers::download::run_queue(
            rx,
            config.strategies.download.queue_file.clone(),
        ));
        Some(tx)
    } else {
        None
    };
    handlers::register_defaults(&mut bot, &config, downloads)?;

    bot.start();
    if bot.active_platforms().is_empty() {
        warn!("Nothing to listen to; check enabled_platforms and credentials");
    }

    bot.run_until(shutdown_signal()).await;
    info!("Goodbye");

    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
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
                warn!("Failed to listen for SIGTERM: {}", e);
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
}
