//! Metadata store trait and SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{ChunkRepo, FileRepo, SessionRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: FileRepo + ChunkRepo + SessionRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection avoids
            // persistent "database is locked" failures under axum concurrency and
            // serializes the finalize transaction so racing finalizes resolve
            // cleanly (one wins, the other finds an empty session).
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use crate::repos::files::NewChunk;
    use crate::repos::sessions::SegmentUpsert;
    use time::OffsetDateTime;

    #[async_trait]
    impl FileRepo for SqliteStore {
        async fn commit_file(
            &self,
            filename: &str,
            size_bytes: i64,
            fingerprint: Option<&str>,
            chunks: &[NewChunk],
        ) -> MetadataResult<FileRow> {
            let created_at = OffsetDateTime::now_utc();
            let mut tx = self.pool.begin().await?;

            let id: i64 = sqlx::query_scalar(
                "INSERT INTO files (filename, size_bytes, fingerprint, created_at) \
                 VALUES (?, ?, ?, ?) RETURNING id",
            )
            .bind(filename)
            .bind(size_bytes)
            .bind(fingerprint)
            .bind(created_at)
            .fetch_one(&mut *tx)
            .await?;

            for chunk in chunks {
                sqlx::query(
                    "INSERT INTO chunks (file_id, chunk_index, handle, size_bytes) \
                     VALUES (?, ?, ?, ?)",
                )
                .bind(id)
                .bind(chunk.chunk_index)
                .bind(&chunk.handle)
                .bind(chunk.size_bytes)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;

            Ok(FileRow {
                id,
                filename: filename.to_string(),
                size_bytes,
                fingerprint: fingerprint.map(str::to_string),
                created_at,
            })
        }

        async fn get_file(&self, file_id: i64) -> MetadataResult<Option<FileRow>> {
            let row = sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE id = ?")
                .bind(file_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn find_by_fingerprint(&self, fingerprint: &str) -> MetadataResult<Option<FileRow>> {
            let row = sqlx::query_as::<_, FileRow>(
                "SELECT * FROM files WHERE fingerprint = ? ORDER BY id LIMIT 1",
            )
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_files(&self) -> MetadataResult<Vec<FileListingRow>> {
            let rows = sqlx::query_as::<_, FileListingRow>(
                "SELECT f.id, f.filename, f.size_bytes, \
                        COUNT(c.file_id) AS chunk_count, f.created_at \
                 FROM files f LEFT JOIN chunks c ON c.file_id = f.id \
                 GROUP BY f.id ORDER BY f.id DESC",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn delete_file(&self, file_id: i64) -> MetadataResult<()> {
            let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE file_id = ?")
                .bind(file_id)
                .fetch_one(&self.pool)
                .await?;
            if remaining > 0 {
                return Err(MetadataError::Constraint(format!(
                    "file {file_id} still has {remaining} chunk records"
                )));
            }

            let result = sqlx::query("DELETE FROM files WHERE id = ?")
                .bind(file_id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("file {file_id} not found")));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ChunkRepo for SqliteStore {
        async fn get_chunks(&self, file_id: i64) -> MetadataResult<Vec<ChunkRow>> {
            let rows = sqlx::query_as::<_, ChunkRow>(
                "SELECT * FROM chunks WHERE file_id = ? ORDER BY chunk_index",
            )
            .bind(file_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn delete_chunk(&self, file_id: i64, chunk_index: i64) -> MetadataResult<()> {
            let result = sqlx::query("DELETE FROM chunks WHERE file_id = ? AND chunk_index = ?")
                .bind(file_id)
                .bind(chunk_index)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "chunk {chunk_index} of file {file_id} not found"
                )));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl SessionRepo for SqliteStore {
        async fn record_segment(
            &self,
            segment: &SegmentUpsert<'_>,
        ) -> MetadataResult<Option<String>> {
            let mut tx = self.pool.begin().await?;

            // Declared fields must agree across every segment of a session.
            let existing = sqlx::query_as::<_, UploadSegmentRow>(
                "SELECT * FROM upload_segments WHERE session_token = ? LIMIT 1",
            )
            .bind(segment.session_token)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(first) = existing
                && (first.filename != segment.filename
                    || first.declared_size != segment.declared_size
                    || first.declared_segments != segment.declared_segments)
            {
                return Err(MetadataError::Constraint(format!(
                    "session {} was opened for '{}' ({} bytes, {} segments)",
                    segment.session_token,
                    first.filename,
                    first.declared_size,
                    first.declared_segments
                )));
            }

            let replaced: Option<String> = sqlx::query_scalar(
                "SELECT handle FROM upload_segments WHERE session_token = ? AND seg_index = ?",
            )
            .bind(segment.session_token)
            .bind(segment.seg_index)
            .fetch_optional(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO upload_segments \
                     (session_token, seg_index, filename, declared_size, declared_segments, \
                      handle, size_bytes, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT (session_token, seg_index) DO UPDATE SET \
                     handle = excluded.handle, \
                     size_bytes = excluded.size_bytes, \
                     created_at = excluded.created_at",
            )
            .bind(segment.session_token)
            .bind(segment.seg_index)
            .bind(segment.filename)
            .bind(segment.declared_size)
            .bind(segment.declared_segments)
            .bind(segment.handle)
            .bind(segment.size_bytes)
            .bind(OffsetDateTime::now_utc())
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(replaced.filter(|h| h != segment.handle))
        }

        async fn get_segments(&self, session_token: &str) -> MetadataResult<Vec<UploadSegmentRow>> {
            let rows = sqlx::query_as::<_, UploadSegmentRow>(
                "SELECT * FROM upload_segments WHERE session_token = ? ORDER BY seg_index",
            )
            .bind(session_token)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn finalize_session(&self, session_token: &str) -> MetadataResult<FileRow> {
            let mut tx = self.pool.begin().await?;

            let segments = sqlx::query_as::<_, UploadSegmentRow>(
                "SELECT * FROM upload_segments WHERE session_token = ? ORDER BY seg_index",
            )
            .bind(session_token)
            .fetch_all(&mut *tx)
            .await?;

            let Some(first) = segments.first() else {
                return Err(MetadataError::NotFound(format!(
                    "session {session_token} not found"
                )));
            };

            let entries: Vec<(u32, u64)> = segments
                .iter()
                .map(|s| (s.seg_index as u32, s.size_bytes as u64))
                .collect();
            depot_core::validate_segment_set(
                first.declared_segments as u32,
                first.declared_size as u64,
                &entries,
            )
            .map_err(|e| MetadataError::MalformedSession(e.to_string()))?;

            let created_at = OffsetDateTime::now_utc();
            let id: i64 = sqlx::query_scalar(
                "INSERT INTO files (filename, size_bytes, fingerprint, created_at) \
                 VALUES (?, ?, NULL, ?) RETURNING id",
            )
            .bind(&first.filename)
            .bind(first.declared_size)
            .bind(created_at)
            .fetch_one(&mut *tx)
            .await?;

            for seg in &segments {
                sqlx::query(
                    "INSERT INTO chunks (file_id, chunk_index, handle, size_bytes) \
                     VALUES (?, ?, ?, ?)",
                )
                .bind(id)
                .bind(seg.seg_index)
                .bind(&seg.handle)
                .bind(seg.size_bytes)
                .execute(&mut *tx)
                .await?;
            }

            sqlx::query("DELETE FROM upload_segments WHERE session_token = ?")
                .bind(session_token)
                .execute(&mut *tx)
                .await?;

            let file = FileRow {
                id,
                filename: first.filename.clone(),
                size_bytes: first.declared_size,
                fingerprint: None,
                created_at,
            };

            tx.commit().await?;
            Ok(file)
        }

        async fn delete_session(&self, session_token: &str) -> MetadataResult<Vec<String>> {
            let mut tx = self.pool.begin().await?;

            let handles: Vec<String> = sqlx::query_scalar(
                "SELECT handle FROM upload_segments WHERE session_token = ? ORDER BY seg_index",
            )
            .bind(session_token)
            .fetch_all(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM upload_segments WHERE session_token = ?")
                .bind(session_token)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(handles)
        }
    }
}

/// SQLite schema (idempotent).
const SCHEMA_SQL: &str = r#"
-- Committed files
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filename TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    -- NULL for files assembled from resumable sessions
    fingerprint TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_files_fingerprint ON files(fingerprint) WHERE fingerprint IS NOT NULL;

-- Segments of committed files
CREATE TABLE IF NOT EXISTS chunks (
    file_id INTEGER NOT NULL REFERENCES files(id),
    chunk_index INTEGER NOT NULL,
    handle TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    PRIMARY KEY (file_id, chunk_index)
);

-- Segments of in-flight upload sessions
CREATE TABLE IF NOT EXISTS upload_segments (
    session_token TEXT NOT NULL,
    seg_index INTEGER NOT NULL,
    filename TEXT NOT NULL,
    declared_size INTEGER NOT NULL,
    declared_segments INTEGER NOT NULL,
    handle TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (session_token, seg_index)
);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repos::files::NewChunk;
    use crate::repos::sessions::SegmentUpsert;

    async fn test_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("metadata.db"))
            .await
            .unwrap();
        (dir, store)
    }

    fn segment<'a>(token: &'a str, index: i64, size: i64, handle: &'a str) -> SegmentUpsert<'a> {
        SegmentUpsert {
            session_token: token,
            seg_index: index,
            filename: "video.mkv",
            declared_size: 300,
            declared_segments: 3,
            handle,
            size_bytes: size,
        }
    }

    #[tokio::test]
    async fn test_commit_file_roundtrip() {
        let (_dir, store) = test_store().await;

        let chunks = vec![
            NewChunk {
                chunk_index: 0,
                handle: "h0".to_string(),
                size_bytes: 100,
            },
            NewChunk {
                chunk_index: 1,
                handle: "h1".to_string(),
                size_bytes: 50,
            },
        ];
        let file = store
            .commit_file("backup.tar", 150, Some("ab".repeat(32).as_str()), &chunks)
            .await
            .unwrap();

        let fetched = store.get_file(file.id).await.unwrap().unwrap();
        assert_eq!(fetched.filename, "backup.tar");
        assert_eq!(fetched.size_bytes, 150);

        let stored = store.get_chunks(file.id).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].handle, "h0");
        assert_eq!(stored[1].chunk_index, 1);

        let listing = store.list_files().await.unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].chunk_count, 2);
    }

    #[tokio::test]
    async fn test_find_by_fingerprint() {
        let (_dir, store) = test_store().await;

        let fp = "cd".repeat(32);
        store
            .commit_file("a.bin", 10, Some(&fp), &[])
            .await
            .unwrap();

        let found = store.find_by_fingerprint(&fp).await.unwrap();
        assert!(found.is_some());
        assert!(
            store
                .find_by_fingerprint(&"ef".repeat(32))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_delete_file_requires_chunks_gone() {
        let (_dir, store) = test_store().await;

        let chunks = vec![NewChunk {
            chunk_index: 0,
            handle: "h0".to_string(),
            size_bytes: 10,
        }];
        let file = store.commit_file("a.bin", 10, None, &chunks).await.unwrap();

        let err = store.delete_file(file.id).await.unwrap_err();
        assert!(matches!(err, MetadataError::Constraint(_)));

        store.delete_chunk(file.id, 0).await.unwrap();
        store.delete_file(file.id).await.unwrap();
        assert!(store.get_file(file.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_segment_replace_returns_old_handle() {
        let (_dir, store) = test_store().await;

        let replaced = store
            .record_segment(&segment("tok", 0, 100, "old"))
            .await
            .unwrap();
        assert!(replaced.is_none());

        let replaced = store
            .record_segment(&segment("tok", 0, 100, "new"))
            .await
            .unwrap();
        assert_eq!(replaced.as_deref(), Some("old"));

        let segments = store.get_segments("tok").await.unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].handle, "new");
    }

    #[tokio::test]
    async fn test_record_segment_rejects_declared_mismatch() {
        let (_dir, store) = test_store().await;

        store
            .record_segment(&segment("tok", 0, 100, "h0"))
            .await
            .unwrap();

        let mut bad = segment("tok", 1, 100, "h1");
        bad.declared_segments = 4;
        let err = store.record_segment(&bad).await.unwrap_err();
        assert!(matches!(err, MetadataError::Constraint(_)));
    }

    #[tokio::test]
    async fn test_finalize_session_consumes_segments() {
        let (_dir, store) = test_store().await;

        for (i, h) in ["h0", "h1", "h2"].iter().enumerate() {
            store
                .record_segment(&segment("tok", i as i64, 100, h))
                .await
                .unwrap();
        }

        let file = store.finalize_session("tok").await.unwrap();
        assert_eq!(file.filename, "video.mkv");
        assert_eq!(file.size_bytes, 300);
        assert!(file.fingerprint.is_none());

        let chunks = store.get_chunks(file.id).await.unwrap();
        assert_eq!(chunks.len(), 3);
        assert!(store.get_segments("tok").await.unwrap().is_empty());

        // A second finalize finds nothing to consume.
        let err = store.finalize_session("tok").await.unwrap_err();
        assert!(matches!(err, MetadataError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_finalize_incomplete_session_leaves_it_open() {
        let (_dir, store) = test_store().await;

        store
            .record_segment(&segment("tok", 0, 100, "h0"))
            .await
            .unwrap();
        store
            .record_segment(&segment("tok", 2, 100, "h2"))
            .await
            .unwrap();

        let err = store.finalize_session("tok").await.unwrap_err();
        assert!(matches!(err, MetadataError::MalformedSession(_)));

        // Segments survive so the client can fill the gap and retry.
        assert_eq!(store.get_segments("tok").await.unwrap().len(), 2);
        store
            .record_segment(&segment("tok", 1, 100, "h1"))
            .await
            .unwrap();
        store.finalize_session("tok").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_session_returns_handles() {
        let (_dir, store) = test_store().await;

        store
            .record_segment(&segment("tok", 0, 100, "h0"))
            .await
            .unwrap();
        store
            .record_segment(&segment("tok", 1, 100, "h1"))
            .await
            .unwrap();

        let handles = store.delete_session("tok").await.unwrap();
        assert_eq!(handles, vec!["h0".to_string(), "h1".to_string()]);
        assert!(store.get_segments("tok").await.unwrap().is_empty());

        assert!(store.delete_session("missing").await.unwrap().is_empty());
    }
}
