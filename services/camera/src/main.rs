//! Camera server for the matte pipeline.
//!
//! Streams JPEG frame records from a video source to one connected consumer
//! at a time over a plain TCP connection, at a configured best-effort rate.
//!
//! # Architecture
//!
//! ```text
//! Video source -> JPEG encode -> FrameRecord lines -> TCP client
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded from:
//! 1. Configuration files (config/default.toml, config/{env}.toml)
//! 2. Environment variables (prefixed with CAMERA__)
//!
//! See `config.rs` for detailed configuration options.

mod config;
mod server;
mod source;
#[cfg(feature = "capture-v4l2")]
mod v4l2;

use config::CameraConfig;
use server::CameraServer;

use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// The producer is single-threaded by design: one session at a time, and the
// only scheduling concern is the inter-frame sleep.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;

    init_logging(&config.logging)?;

    info!(
        service = "matte-camera",
        version = env!("CARGO_PKG_VERSION"),
        camera_id = %config.server.camera_id,
        "starting camera server"
    );

    config.validate()?;

    let server = CameraServer::new(config);

    tokio::select! {
        result = server.run() => {
            result?;
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    let stats = server.stats();
    info!(
        sessions_served = stats.sessions_served,
        frames_sent = stats.frames_sent,
        frames_skipped = stats.frames_skipped,
        "camera server stopped"
    );

    Ok(())
}

/// Load and validate configuration.
fn load_config() -> anyhow::Result<CameraConfig> {
    let config = CameraConfig::load().or_else(|e| {
        warn!(error = %e, "failed to load config from files, trying environment");
        CameraConfig::from_env()
    })?;

    Ok(config)
}

/// Initialize the tracing/logging subsystem.
fn init_logging(config: &config::LoggingConfig) -> anyhow::Result<()> {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("matte_camera={}", level).parse()?);

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().pretty()).init();
    }

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM).
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
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
