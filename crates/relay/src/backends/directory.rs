//! Local directory relay backend.
//!
//! Stores each payload as a file under a root directory, addressed by a
//! generated name. Intended for development and tests; it honors the same
//! contract as the real backend, including the per-object ceiling.

use crate::error::{RelayError, RelayResult};
use crate::traits::{BlobRelay, RelayHandle};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use tokio::fs;
use uuid::Uuid;

/// Directory-backed relay.
pub struct DirectoryRelay {
    root: PathBuf,
    max_object_size: u64,
}

impl DirectoryRelay {
    pub fn new(root: impl Into<PathBuf>, max_object_size: u64) -> Self {
        Self {
            root: root.into(),
            max_object_size,
        }
    }

    fn object_path(&self, handle: &RelayHandle) -> RelayResult<PathBuf> {
        // Handles are generated names, never paths.
        let name = handle.as_str();
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return Err(RelayError::InvalidHandle(name.to_string()));
        }
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl BlobRelay for DirectoryRelay {
    async fn connect(&mut self) -> RelayResult<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    async fn send(&mut self, payload: Bytes, annotation: &str) -> RelayResult<RelayHandle> {
        if payload.len() as u64 > self.max_object_size {
            return Err(RelayError::SizeCeiling {
                size: payload.len() as u64,
                ceiling: self.max_object_size,
            });
        }

        let handle = RelayHandle::new(Uuid::new_v4().simple().to_string());
        let path = self.object_path(&handle)?;

        // Write-then-rename so a crashed send never leaves a partial object
        // under a valid handle.
        let tmp = self.root.join(format!(".tmp-{}", Uuid::new_v4().simple()));
        fs::write(&tmp, &payload).await?;
        fs::rename(&tmp, &path).await?;

        tracing::debug!(handle = %handle, annotation, size = payload.len(), "stored object");
        Ok(handle)
    }

    async fn fetch(&mut self, handle: &RelayHandle) -> RelayResult<Bytes> {
        let path = self.object_path(handle)?;
        let data = fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RelayError::NotFound(handle.to_string())
            } else {
                RelayError::Io(e)
            }
        })?;
        Ok(Bytes::from(data))
    }

    async fn delete(&mut self, handle: &RelayHandle) -> RelayResult<()> {
        let path = self.object_path(handle)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            // Idempotent: retried deletion passes may revisit handles.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RelayError::Io(e)),
        }
    }

    fn max_object_size(&self) -> u64 {
        self.max_object_size
    }

    fn backend_name(&self) -> &'static str {
        "directory"
    }
}
