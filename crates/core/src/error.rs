//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    #[error("invalid segment size: {size} (must be between {min} and {max})")]
    InvalidSegmentSize { size: u64, min: u64, max: u64 },

    #[error("invalid session token: {0}")]
    InvalidSessionToken(String),

    #[error("malformed session: {0}")]
    MalformedSession(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
