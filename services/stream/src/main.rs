//! Stream consumer for the matte pipeline.
//!
//! Connects to the camera server, ingests the frame record stream, and
//! processes micro-batches across parallel partition workers, committing a
//! checkpoint after each batch.
//!
//! # Architecture
//!
//! ```text
//! TCP stream -> StreamClient -> MicroBatcher -> partition workers -> output files
//!                                                        |
//!                                                 CheckpointStore
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded from:
//! 1. Configuration files (config/default.toml, config/{env}.toml)
//! 2. Environment variables (prefixed with STREAM__)
//!
//! See `config.rs` for detailed configuration options.

use anyhow::Context;
use matte_stream::config::{LoggingConfig, StreamConfig};
use matte_stream::{BackgroundMatte, CheckpointStore, FrameProcessor, StreamClient, StreamJob};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;

    init_logging(&config.logging)?;

    info!(
        service = "matte-stream",
        version = env!("CARGO_PKG_VERSION"),
        "starting stream consumer"
    );

    config.validate()?;

    // Fatal startup checks, before any stream is opened.
    let matte = BackgroundMatte::from_asset_path(Path::new(&config.transform.asset_path))
        .context("failed to load matting asset")?;
    fs::create_dir_all(&config.output.dir).context("failed to create output directory")?;
    let checkpoints = CheckpointStore::open(&config.checkpoint.dir, config.checkpoint.retain)
        .context("failed to open checkpoint store")?;

    let start_batch_id = checkpoints.resume_batch_id()?;
    if start_batch_id > 0 {
        info!(start_batch_id, "resuming after last committed micro-batch");
    }

    let processor = Arc::new(FrameProcessor::new(
        Arc::new(matte),
        &config.output.dir,
        config.output.jpeg_quality,
    ));

    let client = Arc::new(StreamClient::new(config.connect.clone()));
    let (line_tx, mut line_rx) = mpsc::channel(config.batch.queue_size);

    let ingest_handle = {
        let client = client.clone();
        tokio::spawn(async move { client.run(line_tx).await })
    };

    // On shutdown the client stops and drops its sender; the job then
    // drains buffered lines into a final batch and commits its checkpoint.
    {
        let client = client.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("received shutdown signal");
            client.shutdown();
        });
    }

    let mut job = StreamJob::new(
        config.batch.clone(),
        processor.clone(),
        checkpoints,
        start_batch_id,
    );
    job.run(&mut line_rx).await?;

    match ingest_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "ingestion ended with error"),
        Err(e) => warn!(error = %e, "ingestion task failed"),
    }

    let ingest_stats = client.stats();
    let processor_stats = processor.stats();
    info!(
        lines_received = ingest_stats.lines_received,
        sessions = ingest_stats.sessions,
        reconnect_attempts = ingest_stats.reconnect_attempts,
        frames_succeeded = processor_stats.frames_succeeded,
        frames_failed = processor_stats.frames_failed,
        "stream consumer stopped"
    );

    Ok(())
}

/// Load and validate configuration.
fn load_config() -> anyhow::Result<StreamConfig> {
    let config = StreamConfig::load().or_else(|e| {
        warn!(error = %e, "failed to load config from files, trying environment");
        StreamConfig::from_env()
    })?;

    Ok(config)
}

/// Initialize the tracing/logging subsystem.
fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("matte_stream={}", level).parse()?);

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
