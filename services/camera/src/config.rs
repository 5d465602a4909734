//! Configuration management for the camera server.
//!
//! This module handles loading and validating configuration from environment
//! variables and configuration files.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the camera server.
#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    /// Listen address and stream identity
    #[serde(default)]
    pub server: ServerConfig,

    /// Video source selection
    #[serde(default)]
    pub source: SourceConfig,

    /// Frame encoding and send rate
    #[serde(default)]
    pub encode: EncodeConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listen address and stream identity.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind
    #[serde(default = "default_port")]
    pub port: u16,

    /// Camera identifier carried on every frame record
    #[serde(default = "default_camera_id")]
    pub camera_id: String,
}

/// Video source selection.
///
/// Per connection, an explicitly configured path wins, then the first file in
/// the videos directory in lexical order, then the live capture device.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SourceConfig {
    /// Explicit video file to stream
    #[serde(default)]
    pub video_path: Option<String>,

    /// Directory scanned for video files when no explicit path is set
    #[serde(default = "default_videos_dir")]
    pub videos_dir: String,

    /// Capture device node used when no file source is found
    #[serde(default = "default_device")]
    pub device: String,
}

/// Frame encoding and send rate.
#[derive(Debug, Clone, Deserialize)]
pub struct EncodeConfig {
    /// Target frames per second (best-effort, via inter-frame sleep)
    #[serde(default = "default_target_fps")]
    pub target_fps: f32,

    /// JPEG quality, 0-100
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
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
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    6100
}
fn default_camera_id() -> String {
    "cam01".to_string()
}
fn default_videos_dir() -> String {
    "videos".to_string()
}
fn default_device() -> String {
    "/dev/video0".to_string()
}
fn default_target_fps() -> f32 {
    2.0
}
fn default_jpeg_quality() -> u8 {
    80
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            camera_id: default_camera_id(),
        }
    }
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            target_fps: default_target_fps(),
            jpeg_quality: default_jpeg_quality(),
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

impl CameraConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default config file (config/default.toml)
    /// 2. Environment-specific config (config/{env}.toml)
    /// 3. Environment variables (prefixed with CAMERA__)
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(
                Environment::with_prefix("CAMERA")
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
                Environment::with_prefix("CAMERA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.server.camera_id.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "server.camera_id".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "server.port".to_string(),
                message: "Port must be greater than 0".to_string(),
            });
        }

        if self.encode.target_fps <= 0.0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "encode.target_fps".to_string(),
                message: "FPS must be greater than 0".to_string(),
            });
        }

        if self.encode.jpeg_quality > 100 {
            return Err(ConfigValidationError::InvalidValue {
                field: "encode.jpeg_quality".to_string(),
                message: "Quality must be between 0 and 100".to_string(),
            });
        }

        Ok(())
    }
}

impl EncodeConfig {
    /// Get the sleep between frame sends as Duration.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.target_fps)
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
