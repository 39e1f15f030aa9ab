//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::*;
use crate::repos::{ChunkRepo, FileRepo, SessionRepo, files::NewChunk, sessions::SegmentUpsert};
use crate::store::MetadataStore;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use time::OffsetDateTime;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Create a new PostgreSQL store from individual connection parameters.
    ///
    /// This allows credentials to be passed separately, enabling better
    /// secret management (e.g., passwords via environment variables).
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        // Log connection info without password
        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        // Prevent hung queries from pinning pool connections indefinitely.
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{}ms", timeout_ms))]);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // PostgreSQL doesn't allow multiple statements in a single prepared
        // statement, so the schema is split and executed piecewise.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl FileRepo for PostgresStore {
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
             VALUES ($1, $2, $3, $4) RETURNING id",
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
                 VALUES ($1, $2, $3, $4)",
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
        let row = sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE id = $1")
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn find_by_fingerprint(&self, fingerprint: &str) -> MetadataResult<Option<FileRow>> {
        let row = sqlx::query_as::<_, FileRow>(
            "SELECT * FROM files WHERE fingerprint = $1 ORDER BY id LIMIT 1",
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
        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE file_id = $1")
            .bind(file_id)
            .fetch_one(&self.pool)
            .await?;
        if remaining > 0 {
            return Err(MetadataError::Constraint(format!(
                "file {file_id} still has {remaining} chunk records"
            )));
        }

        let result = sqlx::query("DELETE FROM files WHERE id = $1")
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
impl ChunkRepo for PostgresStore {
    async fn get_chunks(&self, file_id: i64) -> MetadataResult<Vec<ChunkRow>> {
        let rows = sqlx::query_as::<_, ChunkRow>(
            "SELECT * FROM chunks WHERE file_id = $1 ORDER BY chunk_index",
        )
        .bind(file_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete_chunk(&self, file_id: i64, chunk_index: i64) -> MetadataResult<()> {
        let result = sqlx::query("DELETE FROM chunks WHERE file_id = $1 AND chunk_index = $2")
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
impl SessionRepo for PostgresStore {
    async fn record_segment(&self, segment: &SegmentUpsert<'_>) -> MetadataResult<Option<String>> {
        let mut tx = self.pool.begin().await?;

        // Lock the session's rows so concurrent writers serialize here.
        let existing = sqlx::query_as::<_, UploadSegmentRow>(
            "SELECT * FROM upload_segments WHERE session_token = $1 LIMIT 1 FOR UPDATE",
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
            "SELECT handle FROM upload_segments WHERE session_token = $1 AND seg_index = $2",
        )
        .bind(segment.session_token)
        .bind(segment.seg_index)
        .fetch_optional(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO upload_segments \
                 (session_token, seg_index, filename, declared_size, declared_segments, \
                  handle, size_bytes, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
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
            "SELECT * FROM upload_segments WHERE session_token = $1 ORDER BY seg_index",
        )
        .bind(session_token)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn finalize_session(&self, session_token: &str) -> MetadataResult<FileRow> {
        let mut tx = self.pool.begin().await?;

        // FOR UPDATE holds the rows until COMMIT, so of two racing
        // finalizes one blocks here and then sees an empty session.
        let segments = sqlx::query_as::<_, UploadSegmentRow>(
            "SELECT * FROM upload_segments WHERE session_token = $1 \
             ORDER BY seg_index FOR UPDATE",
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
             VALUES ($1, $2, NULL, $3) RETURNING id",
        )
        .bind(&first.filename)
        .bind(first.declared_size)
        .bind(created_at)
        .fetch_one(&mut *tx)
        .await?;

        for seg in &segments {
            sqlx::query(
                "INSERT INTO chunks (file_id, chunk_index, handle, size_bytes) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(id)
            .bind(seg.seg_index)
            .bind(&seg.handle)
            .bind(seg.size_bytes)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM upload_segments WHERE session_token = $1")
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
        let handles: Vec<String> = sqlx::query_scalar(
            "DELETE FROM upload_segments WHERE session_token = $1 RETURNING handle",
        )
        .bind(session_token)
        .fetch_all(&self.pool)
        .await?;
        Ok(handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statement_splitting() {
        let statements = postgres_schema_statements(POSTGRES_SCHEMA);
        assert!(statements.len() >= 4);
        assert!(statements[0].contains("CREATE TABLE IF NOT EXISTS files"));
        for statement in statements {
            assert!(!statement.trim().is_empty());
        }
    }
}
