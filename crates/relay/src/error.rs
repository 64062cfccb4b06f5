//! Relay error types.

use thiserror::Error;

/// Relay error type.
#[derive(Debug, Error)]
pub enum RelayError {
    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Topic or timestamp rejected by the shared types.
    #[error(transparent)]
    Common(#[from] common::Error),

    /// Required field missing or empty.
    #[error("Missing required parameter: {0}")]
    MissingField(&'static str),

    /// Connection not found.
    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    /// Outbound channel to the connection is closed.
    #[error("Channel send error")]
    ChannelSend,

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
