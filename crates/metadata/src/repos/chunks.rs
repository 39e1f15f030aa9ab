//! Chunk repository.

use crate::error::MetadataResult;
use crate::models::ChunkRow;
use async_trait::async_trait;

/// Repository for chunk records.
#[async_trait]
pub trait ChunkRepo: Send + Sync {
    /// Get all chunks of a file, ordered by chunk index.
    async fn get_chunks(&self, file_id: i64) -> MetadataResult<Vec<ChunkRow>>;

    /// Delete a single chunk record.
    ///
    /// The deletion coordinator calls this per chunk as the corresponding
    /// backend delete succeeds, so a retried deletion only revisits chunks
    /// whose backend delete failed.
    async fn delete_chunk(&self, file_id: i64, chunk_index: i64) -> MetadataResult<()>;
}
