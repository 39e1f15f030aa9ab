//! Resumable upload session handlers.
//!
//! A session is nothing but its persisted segment rows: any server process
//! can accept any segment, report status for resume, and finalize, with no
//! in-memory session state to lose on restart.

use crate::error::{ApiError, ApiResult};
use crate::handlers::validate_filename;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use depot_core::SessionToken;
use depot_core::session::{AcceptSegmentResponse, FinalizeResponse, SessionStatusResponse};
use depot_metadata::repos::sessions::SegmentUpsert;
use depot_relay::RelayHandle;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct SegmentQuery {
    pub filename: String,
    pub total_size: u64,
    pub total_segments: u32,
}

/// PUT /v1/uploads/{token}/segments/{index} - Accept one segment of a
/// resumable upload.
///
/// Idempotent per (token, index): a retried or replayed segment replaces the
/// previous payload, and the replaced backend object is discarded.
#[tracing::instrument(skip(state, query, req), fields(token, index))]
pub async fn accept_segment(
    State(state): State<AppState>,
    Path((token, index)): Path<(String, u32)>,
    Query(query): Query<SegmentQuery>,
    req: Request,
) -> ApiResult<Json<AcceptSegmentResponse>> {
    let token = SessionToken::parse(&token)?;
    let filename = validate_filename(&query.filename)?.to_string();

    if query.total_segments == 0 {
        return Err(ApiError::BadRequest(
            "total_segments must be at least 1".to_string(),
        ));
    }
    if index >= query.total_segments {
        return Err(ApiError::BadRequest(format!(
            "segment index {index} out of range for {} segments",
            query.total_segments
        )));
    }

    let ceiling = state.relay.max_object_size();
    let payload = axum::body::to_bytes(req.into_body(), ceiling as usize)
        .await
        .map_err(|_| {
            ApiError::PayloadTooLarge(format!(
                "segment exceeds the backend's {ceiling} byte ceiling"
            ))
        })?;
    let size = payload.len() as u64;

    // Relay first, record second: a crash in between orphans one backend
    // object, never a metadata row pointing at nothing.
    let annotation = format!("{filename} | segment {index} | session {token}");
    let handle = state.relay.send(payload, annotation).await?;

    let upsert = SegmentUpsert {
        session_token: token.as_str(),
        seg_index: index as i64,
        filename: &filename,
        declared_size: query.total_size as i64,
        declared_segments: query.total_segments as i64,
        handle: handle.as_str(),
        size_bytes: size as i64,
    };
    let replaced = match state.metadata.record_segment(&upsert).await {
        Ok(replaced) => replaced,
        Err(e) => {
            // The rejected payload just became backend garbage; discard it.
            if let Err(del) = state.relay.delete(handle.clone()).await {
                tracing::warn!(handle = %handle, error = %del, "failed to discard rejected segment");
            }
            return Err(e.into());
        }
    };

    if let Some(old) = replaced {
        tracing::debug!(%token, index, "segment replaced, discarding previous payload");
        if let Err(e) = state.relay.delete(RelayHandle::new(old.clone())).await {
            tracing::warn!(handle = %old, error = %e, "failed to discard replaced segment");
        }
    }

    let received = state.metadata.get_segments(token.as_str()).await?.len() as u32;
    tracing::info!(%token, index, size, received, "segment accepted");

    Ok(Json(AcceptSegmentResponse {
        session_token: token.as_str().to_string(),
        index,
        size,
        received,
    }))
}

/// GET /v1/uploads/{token} - Report which segments a session holds, so an
/// interrupted client can resume with only the missing ones.
#[tracing::instrument(skip(state))]
pub async fn get_session(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<SessionStatusResponse>> {
    let token = SessionToken::parse(&token)?;
    let segments = state.metadata.get_segments(token.as_str()).await?;
    let Some(first) = segments.first() else {
        return Err(ApiError::NotFound(format!("session {token} not found")));
    };

    Ok(Json(SessionStatusResponse {
        session_token: token.as_str().to_string(),
        filename: first.filename.clone(),
        declared_size: first.declared_size as u64,
        declared_segments: first.declared_segments as u32,
        received: segments.iter().map(|s| s.seg_index as u32).collect(),
    }))
}

/// POST /v1/uploads/{token}/finalize - Validate the session and commit it
/// as a file.
///
/// The segment set must match the declared totals exactly; otherwise the
/// session stays open (409) for the client to repair. Success atomically
/// consumes the session, so concurrent finalizes commit at most one file.
#[tracing::instrument(skip(state))]
pub async fn finalize_session(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<FinalizeResponse>> {
    let token = SessionToken::parse(&token)?;
    let file = state.metadata.finalize_session(token.as_str()).await?;
    let chunks = state.metadata.get_chunks(file.id).await?;

    tracing::info!(%token, file_id = file.id, chunks = chunks.len(), "session finalized");
    Ok(Json(FinalizeResponse {
        file_id: file.id,
        filename: file.filename,
        size: file.size_bytes as u64,
        chunks: chunks.len() as u32,
    }))
}

/// DELETE /v1/uploads/{token} - Abort a session, discarding its segments.
#[tracing::instrument(skip(state))]
pub async fn abort_session(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<StatusCode> {
    let token = SessionToken::parse(&token)?;
    let handles = state.metadata.delete_session(token.as_str()).await?;
    if handles.is_empty() {
        return Err(ApiError::NotFound(format!("session {token} not found")));
    }

    // Best-effort backend cleanup; the rows are already gone, so a failed
    // delete leaves an unreferenced backend object, not dangling metadata.
    for handle in handles {
        if let Err(e) = state.relay.delete(RelayHandle::new(handle.clone())).await {
            tracing::warn!(%token, handle = %handle, error = %e, "failed to discard aborted segment");
        }
    }

    tracing::info!(%token, "session aborted");
    Ok(StatusCode::NO_CONTENT)
}
