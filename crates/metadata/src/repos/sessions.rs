//! Upload session repository.

use crate::error::MetadataResult;
use crate::models::{FileRow, UploadSegmentRow};
use async_trait::async_trait;

/// Parameters for recording a received segment.
#[derive(Debug, Clone)]
pub struct SegmentUpsert<'a> {
    pub session_token: &'a str,
    pub seg_index: i64,
    pub filename: &'a str,
    pub declared_size: i64,
    pub declared_segments: i64,
    pub handle: &'a str,
    pub size_bytes: i64,
}

/// Repository for resumable upload sessions.
///
/// Sessions live entirely in segment rows, so an interrupted upload can be
/// resumed by a fresh process with nothing but the session token.
#[async_trait]
pub trait SessionRepo: Send + Sync {
    /// Record a received segment, replacing any previous row at the same
    /// (session_token, seg_index).
    ///
    /// Returns the relay handle of the replaced row, if a different payload
    /// was already stored there; the caller should delete that orphan from
    /// the backend. Fails with `Constraint` if the declared filename, size,
    /// or segment count disagree with segments already in the session.
    async fn record_segment(&self, segment: &SegmentUpsert<'_>) -> MetadataResult<Option<String>>;

    /// Get all recorded segments of a session, ordered by segment index.
    ///
    /// An unknown token yields an empty vec, indistinguishable from a
    /// session that has not received any segment yet.
    async fn get_segments(&self, session_token: &str) -> MetadataResult<Vec<UploadSegmentRow>>;

    /// Validate and atomically consume a session, producing a file.
    ///
    /// In one transaction: checks the received segment set against the
    /// declared totals, inserts the file and chunk rows, and deletes the
    /// session's segment rows. A malformed set fails with
    /// `MalformedSession` and leaves the session untouched, so the client
    /// can send the missing segments and finalize again. Of two racing
    /// finalizes, exactly one wins; the loser finds no segments and fails
    /// with `NotFound`.
    async fn finalize_session(&self, session_token: &str) -> MetadataResult<FileRow>;

    /// Delete all segment rows of a session, returning their relay handles
    /// so the caller can clean up the backend. Unknown tokens yield an
    /// empty vec.
    async fn delete_session(&self, session_token: &str) -> MetadataResult<Vec<String>>;
}
