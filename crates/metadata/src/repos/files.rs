//! File repository.

use crate::error::MetadataResult;
use crate::models::{FileListingRow, FileRow};
use async_trait::async_trait;

/// A segment record to attach to a file being committed.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub chunk_index: i64,
    pub handle: String,
    pub size_bytes: i64,
}

/// Repository for file records.
#[async_trait]
pub trait FileRepo: Send + Sync {
    /// Insert a file and all its chunk rows in one transaction.
    ///
    /// Used by direct uploads, after every segment has reached the relay.
    /// Either the file becomes fully visible or nothing is written.
    async fn commit_file(
        &self,
        filename: &str,
        size_bytes: i64,
        fingerprint: Option<&str>,
        chunks: &[NewChunk],
    ) -> MetadataResult<FileRow>;

    /// Get a file by id.
    async fn get_file(&self, file_id: i64) -> MetadataResult<Option<FileRow>>;

    /// Find a committed file with the given content fingerprint.
    ///
    /// If several exist (two identical uploads racing), any one is returned.
    async fn find_by_fingerprint(&self, fingerprint: &str) -> MetadataResult<Option<FileRow>>;

    /// List all files, newest first, with their chunk counts.
    async fn list_files(&self) -> MetadataResult<Vec<FileListingRow>>;

    /// Delete a file record.
    ///
    /// Fails with `Constraint` while chunk rows still reference the file;
    /// the deletion coordinator removes those first.
    async fn delete_file(&self, file_id: i64) -> MetadataResult<()>;
}
