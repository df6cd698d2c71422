//! Configuration management for sp-player
//!
//! Configuration sources, highest priority first:
//! 1. Command-line arguments (`sp-play --pool-size ...`)
//! 2. TOML configuration file (`--config player.toml`)
//! 3. Built-in defaults (code constants)
//!
//! Every field has a default, so an empty file is a valid configuration.
//!
//! ```toml
//! [engine]
//! pool_size = 4
//! frames_per_buffer = 4096
//!
//! [output]
//! device = "default"
//!
//! [logging]
//! level = "debug"
//! ```

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Largest pool the engine will allocate.
///
/// The pool bounds latency; beyond this the buffered audio is measured in
/// seconds rather than milliseconds.
pub const MAX_POOL_SIZE: usize = 64;

/// Top-level player configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Buffering and scheduling parameters
    pub engine: EngineConfig,

    /// Output device selection
    pub output: OutputConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Buffer pool and fill scheduler parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of buffers recycled between decoder and sink
    pub pool_size: usize,

    /// Capacity of each buffer in PCM frames
    pub frames_per_buffer: usize,

    /// Consecutive failed reads tolerated before playback stops with an error
    pub max_read_retries: u32,

    /// Delay between retried reads (multiplied by the attempt number)
    pub retry_backoff_ms: u64,

    /// Periodic wake-up of the fill scheduler when no release arrives
    pub fill_poll_interval_ms: u64,

    /// Processed-buffer poll period of the source sink
    pub source_poll_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            frames_per_buffer: 4096,
            max_read_retries: 3,
            retry_backoff_ms: 20,
            fill_poll_interval_ms: 250,
            source_poll_interval_ms: 10,
        }
    }
}

impl EngineConfig {
    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(Error::Config("pool_size must be at least 1".to_string()));
        }
        if self.pool_size > MAX_POOL_SIZE {
            return Err(Error::Config(format!(
                "pool_size {} exceeds maximum of {}",
                self.pool_size, MAX_POOL_SIZE
            )));
        }
        if self.frames_per_buffer == 0 {
            return Err(Error::Config(
                "frames_per_buffer must be greater than 0".to_string(),
            ));
        }
        if self.fill_poll_interval_ms == 0 || self.source_poll_interval_ms == 0 {
            return Err(Error::Config(
                "poll intervals must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn fill_poll_interval(&self) -> Duration {
        Duration::from_millis(self.fill_poll_interval_ms)
    }

    pub fn source_poll_interval(&self) -> Duration {
        Duration::from_millis(self.source_poll_interval_ms)
    }
}

/// Output device configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Device name (None = system default device)
    pub device: Option<String>,

    /// Fixed device period in frames (None = device default)
    pub buffer_frames: Option<u32>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl PlayerConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PlayerConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        match self.logging.level.to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" | "off" => Ok(()),
            other => Err(Error::Config(format!("Unknown log level: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = PlayerConfig::from_toml_str("").unwrap();
        assert_eq!(config.engine.pool_size, 4);
        assert_eq!(config.engine.frames_per_buffer, 4096);
        assert_eq!(config.engine.max_read_retries, 3);
        assert!(config.output.device.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_sections() {
        let config = PlayerConfig::from_toml_str(
            r#"
            [engine]
            pool_size = 6

            [output]
            device = "USB DAC"
            buffer_frames = 512
            "#,
        )
        .unwrap();

        assert_eq!(config.engine.pool_size, 6);
        assert_eq!(config.engine.frames_per_buffer, 4096);
        assert_eq!(config.output.device.as_deref(), Some("USB DAC"));
        assert_eq!(config.output.buffer_frames, Some(512));
    }

    #[test]
    fn test_zero_pool_rejected() {
        let err = PlayerConfig::from_toml_str("[engine]\npool_size = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_oversized_pool_rejected() {
        let err = PlayerConfig::from_toml_str("[engine]\npool_size = 1000\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_unknown_log_level_rejected() {
        let err = PlayerConfig::from_toml_str("[logging]\nlevel = \"loud\"\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_malformed_toml() {
        let err = PlayerConfig::from_toml_str("[engine\npool_size = 2").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
