//! TCP frame server.
//!
//! Binds once and accepts connections serially: only one client is served at
//! a time, and a new connection is accepted only after the previous session
//! ends. Each session picks a video source, encodes frames as JPEG at the
//! configured quality, and streams newline-terminated frame records at a
//! best-effort target rate. Finite sources are replayed indefinitely; a live
//! source that stops producing ends the session. Client disconnects are
//! expected operational events, never fatal.

use crate::config::CameraConfig;
use crate::source::{self, VideoSource};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use matte_protocol::FrameRecord;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Errors that end the server itself (session-level failures do not).
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(#[from] std::io::Error),
}

/// Why a serving session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client hung up or the connection failed mid-write.
    ClientDisconnected,
    /// The source stopped producing frames and could not be replayed.
    SourceEnded,
}

/// Statistics for the camera server.
#[derive(Debug, Default, Clone)]
pub struct ServerStats {
    pub sessions_served: u64,
    pub frames_sent: u64,
    pub frames_skipped: u64,
}

/// Serial, single-client frame server.
pub struct CameraServer {
    config: CameraConfig,
    stats: Arc<RwLock<ServerStats>>,
}

impl CameraServer {
    /// Create a server from validated configuration.
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Get current server statistics.
    pub fn stats(&self) -> ServerStats {
        self.stats.read().clone()
    }

    /// Bind and serve clients until the task is cancelled.
    pub async fn run(&self) -> Result<(), ServerError> {
        let addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.clone(),
                source: e,
            })?;

        info!(
            addr = %addr,
            camera_id = %self.config.server.camera_id,
            target_fps = self.config.encode.target_fps,
            "camera server listening"
        );

        loop {
            let (stream, peer) = listener.accept().await?;
            let session_id = Uuid::new_v4();
            self.stats.write().sessions_served += 1;
            info!(peer = %peer, session_id = %session_id, "client connected");

            let mut video = match source::select(&self.config.source) {
                Ok(v) => v,
                Err(e) => {
                    // Close the connection and go back to listening.
                    warn!(session_id = %session_id, error = %e, "no usable video source");
                    continue;
                }
            };

            info!(
                session_id = %session_id,
                source = %video.describe(),
                "session started"
            );

            let end = self.serve_session(video.as_mut(), stream).await;
            let stats = self.stats.read().clone();
            info!(
                session_id = %session_id,
                end = ?end,
                frames_sent = stats.frames_sent,
                "session closed"
            );
        }
    }

    /// Stream frames from one source to one client until either side stops.
    ///
    /// `frame_id` starts at 0 for the session and tracks the source frame
    /// position: replaying a finite source resets it, so an N-frame file
    /// emits ids cycling `0..N-1`.
    async fn serve_session<W>(&self, video: &mut dyn VideoSource, mut sink: W) -> SessionEnd
    where
        W: AsyncWrite + Unpin,
    {
        let interval = self.config.encode.frame_interval();
        let quality = self.config.encode.jpeg_quality;

        let mut frame_id: u64 = 0;
        let mut sent_since_rewind = false;

        loop {
            let frame = match video.read_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    // Guard against spinning on a source that yields nothing.
                    if video.is_finite() && sent_since_rewind {
                        if let Err(e) = video.rewind() {
                            warn!(error = %e, "rewind failed");
                            return SessionEnd::SourceEnded;
                        }
                        frame_id = 0;
                        sent_since_rewind = false;
                        continue;
                    }
                    return SessionEnd::SourceEnded;
                }
                Err(e) => {
                    warn!(error = %e, "source read failed");
                    return SessionEnd::SourceEnded;
                }
            };

            let payload = match encode_jpeg(&frame, quality) {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(error = %e, frame_id, "frame encode failed, skipping");
                    self.stats.write().frames_skipped += 1;
                    continue;
                }
            };

            let record = FrameRecord {
                camera_id: self.config.server.camera_id.clone(),
                frame_id,
                timestamp: unix_now(),
                image_payload: payload,
            };

            if let Err(e) = sink.write_all(record.encode().as_bytes()).await {
                debug!(error = %e, "write failed");
                return SessionEnd::ClientDisconnected;
            }
            if let Err(e) = sink.flush().await {
                debug!(error = %e, "flush failed");
                return SessionEnd::ClientDisconnected;
            }

            frame_id += 1;
            sent_since_rewind = true;
            self.stats.write().frames_sent += 1;

            tokio::time::sleep(interval).await;
        }
    }
}

/// Encode an RGB frame as JPEG at the given quality.
fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    encoder.encode(
        frame.as_raw(),
        frame.width(),
        frame.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(buf)
}

/// Wall-clock seconds since the Unix epoch.
fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
