//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("deletion incomplete: {remaining} chunks could not be removed from the backend")]
    PartialDeletion { remaining: usize },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata error: {0}")]
    Metadata(#[from] depot_metadata::MetadataError),

    #[error("relay error: {0}")]
    Relay(#[from] depot_relay::RelayError),

    #[error("core error: {0}")]
    Core(#[from] depot_core::Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::PayloadTooLarge(_) => "payload_too_large",
            Self::Conflict(_) => "conflict",
            Self::PartialDeletion { .. } => "partial_deletion",
            Self::Internal(_) => "internal_error",
            Self::Io(_) => "io_error",
            Self::Metadata(depot_metadata::MetadataError::MalformedSession(_)) => {
                "malformed_session"
            }
            Self::Metadata(_) => "metadata_error",
            Self::Relay(_) => "relay_error",
            Self::Core(_) => "core_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Conflict(_) => StatusCode::CONFLICT,
            // The file (and its remaining chunks) stays visible; the client
            // retries the deletion to cover the remainder.
            Self::PartialDeletion { .. } => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Metadata(e) => match e {
                depot_metadata::MetadataError::NotFound(_) => StatusCode::NOT_FOUND,
                depot_metadata::MetadataError::MalformedSession(_) => StatusCode::CONFLICT,
                depot_metadata::MetadataError::Constraint(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Relay(e) => match e {
                depot_relay::RelayError::NotFound(_) => StatusCode::NOT_FOUND,
                depot_relay::RelayError::SizeCeiling { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                depot_relay::RelayError::Unavailable(_) => StatusCode::BAD_GATEWAY,
                depot_relay::RelayError::Http(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
