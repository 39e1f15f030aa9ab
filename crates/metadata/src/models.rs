//! Database models mapping to the metadata schema.

use sqlx::FromRow;
use time::OffsetDateTime;

/// Stored file record.
#[derive(Debug, Clone, FromRow)]
pub struct FileRow {
    pub id: i64,
    pub filename: String,
    pub size_bytes: i64,
    /// Hex-encoded content fingerprint for dedup. NULL for files assembled
    /// from a resumable session, whose bytes were never hashed end to end.
    pub fingerprint: Option<String>,
    pub created_at: OffsetDateTime,
}

/// File record joined with its chunk count, for listings.
#[derive(Debug, Clone, FromRow)]
pub struct FileListingRow {
    pub id: i64,
    pub filename: String,
    pub size_bytes: i64,
    pub chunk_count: i64,
    pub created_at: OffsetDateTime,
}

/// One stored segment of a file.
#[derive(Debug, Clone, FromRow)]
pub struct ChunkRow {
    pub file_id: i64,
    pub chunk_index: i64,
    /// Opaque relay handle the segment payload lives under.
    pub handle: String,
    pub size_bytes: i64,
}

/// One received segment of an in-flight upload session.
///
/// A session has no row of its own; it exists as long as at least one
/// segment row carries its token. The declared size/segment-count fields are
/// repeated on every row and must agree across a session.
#[derive(Debug, Clone, FromRow)]
pub struct UploadSegmentRow {
    pub session_token: String,
    pub seg_index: i64,
    pub filename: String,
    pub declared_size: i64,
    pub declared_segments: i64,
    pub handle: String,
    pub size_bytes: i64,
    pub created_at: OffsetDateTime,
}
