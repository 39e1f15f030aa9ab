//! HTTP request handlers.

pub mod files;
pub mod uploads;

pub use files::{delete_file, direct_upload, download_file, list_files};
pub use uploads::{abort_session, accept_segment, finalize_session, get_session};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde::Serialize;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub backend: &'static str,
}

/// GET /v1/health - Check metadata store and relay connectivity.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state.metadata.health_check().await?;
    state.relay.health_check().await?;
    Ok(Json(HealthResponse {
        status: "ok",
        backend: state.relay.backend_name(),
    }))
}

/// Validate a client-supplied filename: non-empty, no path separators or
/// control characters. The stored name is a label, never a path.
pub(crate) fn validate_filename(filename: &str) -> ApiResult<&str> {
    if filename.is_empty() || filename.len() > 512 {
        return Err(ApiError::BadRequest(
            "filename must be 1-512 characters".to_string(),
        ));
    }
    if filename.contains(['/', '\\']) || filename.chars().any(char::is_control) {
        return Err(ApiError::BadRequest(
            "filename must not contain path separators or control characters".to_string(),
        ));
    }
    Ok(filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_filename() {
        assert!(validate_filename("video.mkv").is_ok());
        assert!(validate_filename("").is_err());
        assert!(validate_filename("a/b").is_err());
        assert!(validate_filename("a\\b").is_err());
        assert!(validate_filename("a\nb").is_err());
        assert!(validate_filename(&"x".repeat(600)).is_err());
    }
}
