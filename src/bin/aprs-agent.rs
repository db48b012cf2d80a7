//! APRS Audio Agent
//!
//! Captures radio audio, runs it through the APRS dynamics chain and keeps
//! the playback stream open until Ctrl-C.

use anyhow::{Context, Result};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aprs_audio::{audio::StreamManager, config::AppConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let (config, source) = load_config(config_path)?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.system.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting APRS audio agent");
    tracing::info!("Configuration: {}", source);

    let interval_ms = config.system.level_monitor_interval_ms;
    let list_devices = config.system.list_devices_on_startup;
    let manager = StreamManager::new(config).context("invalid audio configuration")?;

    if list_devices {
        manager.list_devices();
    }

    let cancel = CancellationToken::new();

    manager
        .start_input(&cancel)
        .context("failed to start audio input")?;
    if let Err(e) = manager.start_output(&cancel) {
        manager.close();
        return Err(e).context("failed to start audio output");
    }

    tracing::info!("Audio streams running - press Ctrl+C to stop");

    monitor_levels(
        &manager,
        Duration::from_millis(interval_ms),
        tokio::signal::ctrl_c(),
    )
    .await;
    tracing::info!("Shutdown requested");

    cancel.cancel();
    manager.close();
    tracing::info!("APRS audio agent stopped");
    Ok(())
}

/// Log levels on every interval until `shutdown` resolves; returns the
/// number of level lines written
async fn monitor_levels<F: Future>(manager: &StreamManager, interval: Duration, shutdown: F) -> u64 {
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(interval);
    let mut ticks = 0;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                ticks += 1;
                tracing::info!(
                    "Levels: input {:.1} dB, output {:.1} dB",
                    manager.input_level(),
                    manager.output_level()
                );
                if tracing::enabled!(tracing::Level::DEBUG) {
                    match serde_json::to_string(&manager.status()) {
                        Ok(status) => tracing::debug!("Status: {}", status),
                        Err(e) => tracing::warn!("Failed to serialize status: {}", e),
                    }
                }
            }
        }
    }

    ticks
}

/// Explicit path, then the per-user default path, then built-in defaults
fn load_config(explicit: Option<PathBuf>) -> Result<(AppConfig, String)> {
    if let Some(path) = explicit {
        let config = AppConfig::load(&path)
            .with_context(|| format!("load config {}", path.display()))?;
        return Ok((config, path.display().to_string()));
    }

    if let Some(path) = AppConfig::default_path().filter(|p| p.exists()) {
        let config = AppConfig::load(&path)
            .with_context(|| format!("load config {}", path.display()))?;
        return Ok((config, path.display().to_string()));
    }

    Ok((AppConfig::default(), "built-in defaults".to_string()))
}
