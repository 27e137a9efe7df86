//! mute-probe-daemon: hosts one mute detector for local clients
//!
//! - Probes the mute switch on an interval through a command-line player
//! - SIGUSR1/SIGUSR2 move the detector to background/foreground
//! - IPC server for status queries, manual checks and event subscription

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use mute_probe::clip::{self, DEFAULT_CLIP_DURATION};
use mute_probe::ipc::Server;
use mute_probe::lifecycle::{ShutdownSignal, SignalLifecycle};
use mute_probe::{listener, Config, MuteDetector, ProcessPlayer};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "mute-probe-daemon starting"
    );

    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, clip = ?config.detector.clip_path, "configuration loaded");

    // The default clip ships with the daemon; a configured one must exist
    if !config.custom_clip && !config.detector.clip_path.exists() {
        clip::write_silent_wav(&config.detector.clip_path, DEFAULT_CLIP_DURATION)
            .context("failed to install default probe clip")?;
        info!(clip = ?config.detector.clip_path, "default probe clip installed");
    }

    let shutdown = ShutdownSignal::new();
    let (lifecycle, lifecycle_rx) = SignalLifecycle::channel(8);

    let player = ProcessPlayer::new(config.player.clone()).with_args(config.player_args.clone());
    let detector = MuteDetector::spawn(config.detector.clone(), player, Some(lifecycle_rx))
        .context("failed to start mute detector")?;
    detector.set_listener(Some(listener(|muted| {
        info!(muted, "mute switch state");
    })));

    tokio::spawn(async move {
        if let Err(e) = lifecycle.run().await {
            warn!(?e, "lifecycle signals unavailable, detector stays in foreground");
        }
    });

    let server = Server::bind(&config.socket_path, detector.clone())?;

    info!("daemon initialized, entering main loop");

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        result = shutdown.wait() => {
            match result {
                Ok(()) => info!("shutdown signal received"),
                Err(e) => error!(?e, "failed to register shutdown signals"),
            }
        }
    }

    info!("shutting down...");

    server.shutdown().await;
    detector.shutdown().await;

    info!("mute-probe-daemon stopped");

    Ok(())
}
