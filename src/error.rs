//! relayclaw error types

use thiserror::Error;

/// relayclaw error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// WebSocket handshake error
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// Wire protocol error (malformed frame or message)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Gateway error
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for relayclaw operations
pub type Result<T> = std::result::Result<T, Error>;
