//! File handlers: listing, direct upload, download, deletion.

use crate::error::{ApiError, ApiResult};
use crate::handlers::validate_filename;
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use depot_core::SegmentPlan;
use depot_core::session::{DeleteFileResponse, DirectUploadResponse, FileEntry, ListFilesResponse};
use depot_metadata::repos::files::NewChunk;
use depot_relay::RelayHandle;
use futures::StreamExt;
use serde::Deserialize;
use std::path::PathBuf;
use time::format_description::well_known::Rfc3339;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

/// GET /v1/files - List all stored files.
pub async fn list_files(State(state): State<AppState>) -> ApiResult<Json<ListFilesResponse>> {
    let rows = state.metadata.list_files().await?;
    let files = rows
        .into_iter()
        .map(|row| {
            let created_at = row
                .created_at
                .format(&Rfc3339)
                .map_err(|e| ApiError::Internal(format!("timestamp formatting failed: {e}")))?;
            Ok(FileEntry {
                id: row.id,
                filename: row.filename,
                size: row.size_bytes as u64,
                chunks: row.chunk_count as u32,
                created_at,
            })
        })
        .collect::<ApiResult<Vec<_>>>()?;
    Ok(Json(ListFilesResponse { files }))
}

#[derive(Debug, Deserialize)]
pub struct DirectUploadQuery {
    pub filename: String,
}

/// POST /v1/files - Store a whole file in one request.
///
/// The body is spooled to the staging directory while being fingerprinted,
/// deduplicated against committed files, then split per the segment plan and
/// relayed. Metadata becomes visible only after every segment is stored; a
/// mid-upload failure deletes the segments already sent and leaves nothing
/// behind.
#[tracing::instrument(skip(state, req), fields(filename = %query.filename))]
pub async fn direct_upload(
    State(state): State<AppState>,
    Query(query): Query<DirectUploadQuery>,
    req: Request,
) -> ApiResult<(StatusCode, Json<DirectUploadResponse>)> {
    let filename = validate_filename(&query.filename)?.to_string();

    let spool = SpoolFile::create(&state.config.server.staging_dir).await?;
    let (total, fingerprint) = match spool
        .fill(req.into_body(), state.config.server.max_upload_size)
        .await
    {
        Ok(result) => result,
        Err(e) => {
            spool.remove().await;
            return Err(e);
        }
    };

    // Whole-file dedup: identical content maps onto the already stored file.
    let fingerprint_hex = fingerprint.to_hex();
    if let Some(existing) = state.metadata.find_by_fingerprint(&fingerprint_hex).await? {
        spool.remove().await;
        tracing::info!(file_id = existing.id, "direct upload deduplicated");
        return Ok((
            StatusCode::OK,
            Json(DirectUploadResponse {
                file_id: existing.id,
                filename: existing.filename,
                deduplicated: true,
            }),
        ));
    }

    let plan = SegmentPlan::new(total, state.config.server.segment_size)?;
    let result = relay_segments(&state, &spool, &plan, &filename).await;
    spool.remove().await;
    let chunks = result?;

    let file = match state
        .metadata
        .commit_file(&filename, total as i64, Some(&fingerprint_hex), &chunks)
        .await
    {
        Ok(file) => file,
        Err(e) => {
            discard_handles(&state, &chunks).await;
            return Err(e.into());
        }
    };

    tracing::info!(file_id = file.id, size = total, chunks = chunks.len(), "file stored");
    Ok((
        StatusCode::CREATED,
        Json(DirectUploadResponse {
            file_id: file.id,
            filename: file.filename,
            deduplicated: false,
        }),
    ))
}

/// Send every planned segment of the spooled body to the relay.
///
/// On failure the segments already sent are deleted best-effort before the
/// error propagates, so an aborted direct upload leaves no orphans behind.
async fn relay_segments(
    state: &AppState,
    spool: &SpoolFile,
    plan: &SegmentPlan,
    filename: &str,
) -> ApiResult<Vec<NewChunk>> {
    let mut reader = spool.open().await?;
    let mut sent: Vec<NewChunk> = Vec::with_capacity(plan.segment_count() as usize);

    for span in plan.iter() {
        let mut buf = vec![0u8; span.size as usize];
        if let Err(e) = reader.read_exact(&mut buf).await {
            discard_handles(state, &sent).await;
            return Err(e.into());
        }

        let annotation = format!(
            "{filename} | segment {}/{}",
            span.index + 1,
            plan.segment_count()
        );
        match state.relay.send(Bytes::from(buf), annotation).await {
            Ok(handle) => sent.push(NewChunk {
                chunk_index: span.index as i64,
                handle: handle.into_string(),
                size_bytes: span.size as i64,
            }),
            Err(e) => {
                discard_handles(state, &sent).await;
                return Err(e.into());
            }
        }
    }

    Ok(sent)
}

/// Best-effort removal of relayed segments that will never gain a metadata
/// record. Failures are logged; the objects become unreferenced backend
/// garbage rather than dangling metadata.
async fn discard_handles(state: &AppState, chunks: &[NewChunk]) {
    for chunk in chunks {
        if let Err(e) = state
            .relay
            .delete(RelayHandle::new(chunk.handle.clone()))
            .await
        {
            tracing::warn!(handle = %chunk.handle, error = %e, "failed to discard orphaned segment");
        }
    }
}

/// A request body spooled to the staging directory.
struct SpoolFile {
    path: PathBuf,
}

impl SpoolFile {
    async fn create(staging_dir: &std::path::Path) -> ApiResult<Self> {
        tokio::fs::create_dir_all(staging_dir).await?;
        let path = staging_dir.join(format!("upload-{}", Uuid::new_v4().simple()));
        Ok(Self { path })
    }

    /// Stream the body into the spool file, fingerprinting as it goes.
    /// Returns the total size and content fingerprint.
    async fn fill(&self, body: Body, max_size: u64) -> ApiResult<(u64, depot_core::ContentHash)> {
        let mut file = tokio::fs::File::create(&self.path).await?;
        let mut hasher = depot_core::ContentHash::hasher();
        let mut total: u64 = 0;

        let mut stream = body.into_data_stream();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
            total += chunk.len() as u64;
            if total > max_size {
                return Err(ApiError::PayloadTooLarge(format!(
                    "upload exceeds the {max_size} byte limit"
                )));
            }
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok((total, hasher.finalize()))
    }

    async fn open(&self) -> ApiResult<tokio::fs::File> {
        Ok(tokio::fs::File::open(&self.path).await?)
    }

    async fn remove(&self) {
        if let Err(e) = tokio::fs::remove_file(&self.path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove spool file");
        }
    }
}

/// GET /v1/files/{file_id}/content - Stream a file back, reassembled from
/// its chunks in index order.
#[tracing::instrument(skip(state))]
pub async fn download_file(
    State(state): State<AppState>,
    Path(file_id): Path<i64>,
) -> ApiResult<Response> {
    let file = state
        .metadata
        .get_file(file_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("file {file_id} not found")))?;
    let chunks = state.metadata.get_chunks(file_id).await?;

    // Each chunk is fetched through the relay channel as the previous one
    // drains to the client, so at most one segment is resident at a time.
    let relay = state.relay.clone();
    let stream = futures::stream::iter(chunks)
        .then(move |chunk| {
            let relay = relay.clone();
            async move {
                relay
                    .fetch(RelayHandle::new(chunk.handle.clone()))
                    .await
                    .inspect_err(|e| {
                        tracing::error!(
                            file_id = chunk.file_id,
                            chunk_index = chunk.chunk_index,
                            error = %e,
                            "download failed mid-transfer"
                        );
                    })
            }
        })
        .map(|result| result.map_err(|e| std::io::Error::other(e.to_string())));

    // Quotes and control characters never survive upload validation; strip
    // them here as well before the name lands in a header.
    let safe_name: String = file
        .filename
        .chars()
        .filter(|c| *c != '"' && !c.is_control())
        .collect();

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, "application/octet-stream".to_string()),
            (CONTENT_LENGTH, file.size_bytes.to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{safe_name}\""),
            ),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

/// DELETE /v1/files/{file_id} - Delete a file and its backend objects.
///
/// Chunk records are removed one by one as the corresponding backend delete
/// succeeds. If any backend delete fails the file row survives with only the
/// unremoved chunks attached, so a retried request covers exactly the
/// remainder.
#[tracing::instrument(skip(state))]
pub async fn delete_file(
    State(state): State<AppState>,
    Path(file_id): Path<i64>,
) -> ApiResult<Json<DeleteFileResponse>> {
    state
        .metadata
        .get_file(file_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("file {file_id} not found")))?;

    let chunks = state.metadata.get_chunks(file_id).await?;
    let mut remaining = 0usize;
    for chunk in chunks {
        match state
            .relay
            .delete(RelayHandle::new(chunk.handle.clone()))
            .await
        {
            Ok(()) => {
                state
                    .metadata
                    .delete_chunk(file_id, chunk.chunk_index)
                    .await?;
            }
            Err(e) => {
                tracing::warn!(
                    file_id,
                    chunk_index = chunk.chunk_index,
                    error = %e,
                    "backend delete failed, chunk record kept for retry"
                );
                remaining += 1;
            }
        }
    }

    if remaining > 0 {
        return Err(ApiError::PartialDeletion { remaining });
    }

    state.metadata.delete_file(file_id).await?;
    tracing::info!(file_id, "file deleted");
    Ok(Json(DeleteFileResponse { deleted: file_id }))
}
