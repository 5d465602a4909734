//! Stream ingestion client with automatic reconnection.
//!
//! Connects to the camera server, reads the newline-delimited byte stream,
//! and forwards each raw line undecoded to the batching layer. Decoding
//! happens at processing time, which keeps the ingestion-time failure
//! surface down to the connection itself. Connection failures are retried
//! with exponential backoff; after a mid-stream drop, ingestion resumes
//! without assuming `frame_id` continuity.

use crate::config::ConnectConfig;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Errors that can occur during ingestion.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("maximum reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,

    #[error("ingestion shut down")]
    Shutdown,
}

/// State of the connection to the camera server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// Statistics for the ingestion client.
#[derive(Debug, Default, Clone)]
pub struct IngestStats {
    pub lines_received: u64,
    pub bytes_received: u64,
    pub reconnect_attempts: u64,
    pub sessions: u64,
    pub last_line_at: Option<Instant>,
}

/// Socket client feeding raw record lines to the processing layer.
pub struct StreamClient {
    config: ConnectConfig,
    state: Arc<RwLock<ConnectionState>>,
    stats: Arc<RwLock<IngestStats>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl StreamClient {
    /// Create a new client with the given configuration.
    pub fn new(config: ConnectConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            stats: Arc::new(RwLock::new(IngestStats::default())),
            shutdown_tx,
        }
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Get current ingestion statistics.
    pub fn stats(&self) -> IngestStats {
        self.stats.read().clone()
    }

    /// Signal the ingestion loop to stop.
    pub fn shutdown(&self) {
        info!("signaling ingestion shutdown");
        let _ = self.shutdown_tx.send(());
    }

    /// Ingest lines into `tx` until shutdown or the retry budget is spent.
    ///
    /// Dropping the sender on return is the flush/termination signal for the
    /// batching layer downstream.
    pub async fn run(&self, tx: mpsc::Sender<String>) -> Result<(), IngestError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        info!(
            host = %self.config.host,
            port = self.config.port,
            "starting stream ingestion"
        );

        loop {
            let stream = tokio::select! {
                _ = shutdown_rx.recv() => {
                    *self.state.write() = ConnectionState::Disconnected;
                    return Ok(());
                }
                result = self.connect_with_retry() => result?,
            };

            *self.state.write() = ConnectionState::Connected;
            self.stats.write().sessions += 1;

            let mut lines = BufReader::new(stream).lines();

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        *self.state.write() = ConnectionState::Disconnected;
                        return Ok(());
                    }
                    next = lines.next_line() => match next {
                        Ok(Some(line)) => {
                            {
                                let mut stats = self.stats.write();
                                stats.lines_received += 1;
                                stats.bytes_received += line.len() as u64 + 1;
                                stats.last_line_at = Some(Instant::now());
                            }
                            if tx.send(line).await.is_err() {
                                *self.state.write() = ConnectionState::Disconnected;
                                return Err(IngestError::Shutdown);
                            }
                        }
                        Ok(None) => {
                            warn!("camera server closed the connection");
                            break;
                        }
                        Err(e) => {
                            warn!(error = %e, "stream read failed");
                            break;
                        }
                    }
                }
            }

            *self.state.write() = ConnectionState::Disconnected;
        }
    }

    /// Connect to the camera server with exponential backoff retry.
    async fn connect_with_retry(&self) -> Result<TcpStream, IngestError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        let mut backoff = ExponentialBackoff {
            initial_interval: self.config.reconnect_base_delay(),
            max_interval: self.config.reconnect_max_delay(),
            max_elapsed_time: None,
            ..Default::default()
        };

        let mut attempts = 0u32;
        let max_attempts = self.config.max_reconnect_attempts;
        let first_session = self.stats.read().sessions == 0;

        loop {
            *self.state.write() = if first_session && attempts == 0 {
                ConnectionState::Connecting
            } else {
                ConnectionState::Reconnecting
            };

            let failure = match timeout(
                self.config.connect_timeout(),
                TcpStream::connect(addr.as_str()),
            )
            .await
            {
                Ok(Ok(stream)) => {
                    info!(addr = %addr, attempts = attempts, "connected to camera server");
                    return Ok(stream);
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => "connect timed out".to_string(),
            };

            attempts += 1;
            self.stats.write().reconnect_attempts += 1;

            if max_attempts > 0 && attempts >= max_attempts {
                *self.state.write() = ConnectionState::Failed;
                error!(
                    addr = %addr,
                    attempts = attempts,
                    error = %failure,
                    "max reconnection attempts exceeded"
                );
                return Err(IngestError::MaxReconnectAttemptsExceeded);
            }

            if let Some(delay) = backoff.next_backoff() {
                warn!(
                    addr = %addr,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %failure,
                    "connection failed, retrying"
                );
                tokio::time::sleep(delay).await;
            } else {
                backoff.reset();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn create_test_config(port: u16) -> ConnectConfig {
        ConnectConfig {
            host: "127.0.0.1".to_string(),
            port,
            connect_timeout_secs: 5,
            max_reconnect_attempts: 1,
            reconnect_base_delay_ms: 10,
            reconnect_max_delay_ms: 50,
        }
    }

    #[test]
    fn test_initial_state() {
        let client = StreamClient::new(create_test_config(6100));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        let stats = client.stats();
        assert_eq!(stats.lines_received, 0);
        assert_eq!(stats.sessions, 0);
    }

    #[tokio::test]
    async fn test_forwards_lines_then_fails_when_server_gone() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = Arc::new(StreamClient::new(create_test_config(addr.port())));
        let (tx, mut rx) = mpsc::channel(16);

        let handle = {
            let client = client.clone();
            tokio::spawn(async move { client.run(tx).await })
        };

        // Serve one session by hand, closing the listener first so the
        // reconnect attempt is refused.
        let (mut socket, _) = listener.accept().await.unwrap();
        drop(listener);
        socket.write_all(b"line-one\nline-two\n").await.unwrap();
        socket.shutdown().await.unwrap();
        drop(socket);

        assert_eq!(rx.recv().await.unwrap(), "line-one");
        assert_eq!(rx.recv().await.unwrap(), "line-two");

        // Server is gone and the retry budget is one attempt.
        let result = handle.await.unwrap();
        assert!(matches!(
            result,
            Err(IngestError::MaxReconnectAttemptsExceeded)
        ));
        assert_eq!(client.state(), ConnectionState::Failed);

        let stats = client.stats();
        assert_eq!(stats.lines_received, 2);
        assert_eq!(stats.sessions, 1);
    }

    #[tokio::test]
    async fn test_shutdown_during_retry() {
        // Bind then drop to get a port nothing is listening on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut config = create_test_config(port);
        config.max_reconnect_attempts = 0;

        let client = Arc::new(StreamClient::new(config));
        let (tx, _rx) = mpsc::channel(16);

        let handle = {
            let client = client.clone();
            tokio::spawn(async move { client.run(tx).await })
        };

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        client.shutdown();

        assert!(handle.await.unwrap().is_ok());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}
