//! Error types for the APRS audio pipeline

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stream endpoint and processing errors.
///
/// All of these are returned synchronously to the caller of the failing
/// operation. Failures inside a driver callback are logged and the block is
/// dropped instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AudioError {
    #[error("Stream is already running")]
    AlreadyRunning,

    #[error("Stream is not running")]
    NotRunning,

    #[error("Audio input has not been started")]
    InputNotStarted,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Playback queue is full")]
    QueueFull,

    #[error("{0} is not initialized")]
    NotInitialized(&'static str),

    #[error("Stream error: {0}")]
    StreamError(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
