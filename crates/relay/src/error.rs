//! Relay error types.

use thiserror::Error;

/// Relay operation errors.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("payload of {size} bytes exceeds backend ceiling of {ceiling} bytes")]
    SizeCeiling { size: u64, ceiling: u64 },

    #[error("invalid relay handle: {0}")]
    InvalidHandle(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend protocol error: {0}")]
    Protocol(String),

    #[error("relay channel closed")]
    ChannelClosed,
}

/// Result type for relay operations.
pub type RelayResult<T> = std::result::Result<T, RelayError>;
