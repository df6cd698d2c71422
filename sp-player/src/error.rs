//! Error types for sp-player
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use thiserror::Error;

/// Main error type for sp-player
#[derive(Error, Debug)]
pub enum Error {
    /// Media location could not be resolved to a readable source
    #[error("Not found: {0}")]
    NotFound(String),

    /// Decoder cannot interpret the content, or its output does not match the device
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Backend could not acquire an output device or build its stream
    #[error("Device init failed: {0}")]
    DeviceInitFailed(String),

    /// Decoder failed while reading the next chunk
    #[error("Decode read error: {0}")]
    DecodeRead(String),

    /// Audio output errors after initialization
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Configuration file loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors raised while constructing a player.
    ///
    /// Construction errors are never retried by the engine; callers may retry
    /// `DeviceInitFailed` later.
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_) | Error::UnsupportedFormat(_) | Error::DeviceInitFailed(_)
        )
    }
}

/// Convenience Result type using sp-player Error
pub type Result<T> = std::result::Result<T, Error>;
