//! Configuration management for the stream consumer.
//!
//! This module handles loading and validating configuration from environment
//! variables and configuration files.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the stream consumer.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Camera server connection
    #[serde(default)]
    pub connect: ConnectConfig,

    /// Micro-batch shape
    #[serde(default)]
    pub batch: BatchConfig,

    /// Matting transform asset
    #[serde(default)]
    pub transform: TransformConfig,

    /// Output destination
    #[serde(default)]
    pub output: OutputConfig,

    /// Checkpoint persistence
    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Camera server connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectConfig {
    /// Camera server host
    #[serde(default = "default_connect_host")]
    pub host: String,

    /// Camera server port
    #[serde(default = "default_connect_port")]
    pub port: u16,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Maximum number of reconnection attempts (0 = infinite)
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Base delay between reconnection attempts in milliseconds
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,

    /// Maximum delay between reconnection attempts in milliseconds
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
}

/// Micro-batch shape configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Maximum records per micro-batch
    #[serde(default = "default_max_records")]
    pub max_records: usize,

    /// Batch window in milliseconds (a batch closes when full or when the
    /// window elapses, whichever comes first)
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Number of parallel partitions per micro-batch
    #[serde(default = "default_partitions")]
    pub partitions: usize,

    /// Bound of the raw-line channel between ingestion and batching
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

/// Matting transform asset configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TransformConfig {
    /// Path to the matting asset (JSON parameters)
    #[serde(default = "default_asset_path")]
    pub asset_path: String,
}

/// Output destination configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Directory transformed frames are written to
    #[serde(default = "default_output_dir")]
    pub dir: String,

    /// JPEG quality for written frames, 0-100
    #[serde(default = "default_output_quality")]
    pub jpeg_quality: u8,
}

/// Checkpoint persistence configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointConfig {
    /// Directory progress markers are persisted to
    #[serde(default = "default_checkpoint_dir")]
    pub dir: String,

    /// How many superseded checkpoint files to retain
    #[serde(default = "default_checkpoint_retain")]
    pub retain: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_connect_host() -> String {
    "127.0.0.1".to_string()
}
fn default_connect_port() -> u16 {
    6100
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_max_reconnect_attempts() -> u32 {
    0
}
fn default_reconnect_base_delay_ms() -> u64 {
    1000
}
fn default_reconnect_max_delay_ms() -> u64 {
    30000
}
fn default_max_records() -> usize {
    64
}
fn default_window_ms() -> u64 {
    1000
}
fn default_partitions() -> usize {
    4
}
fn default_queue_size() -> usize {
    1024
}
fn default_asset_path() -> String {
    "models/matte.json".to_string()
}
fn default_output_dir() -> String {
    "output".to_string()
}
fn default_output_quality() -> u8 {
    90
}
fn default_checkpoint_dir() -> String {
    "checkpoints".to_string()
}
fn default_checkpoint_retain() -> usize {
    16
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            host: default_connect_host(),
            port: default_connect_port(),
            connect_timeout_secs: default_connect_timeout(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_records(),
            window_ms: default_window_ms(),
            partitions: default_partitions(),
            queue_size: default_queue_size(),
        }
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            asset_path: default_asset_path(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            jpeg_quality: default_output_quality(),
        }
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: default_checkpoint_dir(),
            retain: default_checkpoint_retain(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl StreamConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default config file (config/default.toml)
    /// 2. Environment-specific config (config/{env}.toml)
    /// 3. Environment variables (prefixed with STREAM__)
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(
                Environment::with_prefix("STREAM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Create configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(
                Environment::with_prefix("STREAM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.connect.host.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "connect.host".to_string(),
            ));
        }

        if self.batch.max_records == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "batch.max_records".to_string(),
                message: "Batch size must be greater than 0".to_string(),
            });
        }

        if self.batch.partitions == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "batch.partitions".to_string(),
                message: "Partition count must be greater than 0".to_string(),
            });
        }

        if self.transform.asset_path.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "transform.asset_path".to_string(),
            ));
        }

        if self.output.jpeg_quality > 100 {
            return Err(ConfigValidationError::InvalidValue {
                field: "output.jpeg_quality".to_string(),
                message: "Quality must be between 0 and 100".to_string(),
            });
        }

        Ok(())
    }
}

impl ConnectConfig {
    /// Get connection timeout as Duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get base reconnection delay as Duration.
    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    /// Get maximum reconnection delay as Duration.
    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }
}

impl BatchConfig {
    /// Get the batch window as Duration.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> StreamConfig {
        StreamConfig {
            connect: ConnectConfig::default(),
            batch: BatchConfig::default(),
            transform: TransformConfig::default(),
            output: OutputConfig::default(),
            checkpoint: CheckpointConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn test_valid_defaults() {
        let config = create_test_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.connect.port, 6100);
        assert_eq!(config.batch.window(), Duration::from_millis(1000));
    }

    #[test]
    fn test_missing_host() {
        let mut config = create_test_config();
        config.connect.host = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::MissingField(_))
        ));
    }

    #[test]
    fn test_zero_partitions() {
        let mut config = create_test_config();
        config.batch.partitions = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_zero_batch_size() {
        let mut config = create_test_config();
        config.batch.max_records = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_invalid_output_quality() {
        let mut config = create_test_config();
        config.output.jpeg_quality = 150;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }
}
