//! Error types for docflow-guard.

use thiserror::Error;

/// Main error type for rate limiting and realtime operations.
#[derive(Error, Debug)]
pub enum GuardError {
    /// A caller passed a value the API cannot work with (zero limit, empty key, bad URL).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// WebSocket transport errors
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Transport errors raised by non-tungstenite connectors
    #[error("Transport error: {0}")]
    Transport(String),

    /// JSON serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for GuardError {
    fn from(err: config::ConfigError) -> Self {
        GuardError::Config(err.to_string())
    }
}

impl From<serde_yaml::Error> for GuardError {
    fn from(err: serde_yaml::Error) -> Self {
        GuardError::Config(err.to_string())
    }
}

/// Result type alias for docflow-guard operations.
pub type Result<T> = std::result::Result<T, GuardError>;
