//! Relay trait definitions.

use crate::error::RelayResult;
use async_trait::async_trait;
use bytes::Bytes;

/// Opaque handle a backend hands out for a stored object.
///
/// Handles are backend-specific strings and must not be parsed outside the
/// backend that issued them. They are persisted verbatim in the metadata
/// store and presented back for fetch and delete.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RelayHandle(String);

impl RelayHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for RelayHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RelayHandle {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Blob relay backend abstraction.
///
/// A backend stores opaque payloads up to `max_object_size` bytes and
/// addresses them by the handles it issues. Implementations take `&mut self`
/// because a backend instance is owned by exactly one execution channel
/// worker; they never need internal synchronization.
#[async_trait]
pub trait BlobRelay: Send + 'static {
    /// Establish the backend connection.
    ///
    /// Called once by the channel worker before the first operation,
    /// not at construction time.
    async fn connect(&mut self) -> RelayResult<()>;

    /// Store a payload, annotated for out-of-band inspection, and return
    /// its handle.
    async fn send(&mut self, payload: Bytes, annotation: &str) -> RelayResult<RelayHandle>;

    /// Fetch a stored payload.
    async fn fetch(&mut self, handle: &RelayHandle) -> RelayResult<Bytes>;

    /// Delete a stored payload.
    ///
    /// Deleting an already-absent object succeeds, so a retried deletion
    /// pass can safely revisit handles it may have already removed.
    async fn delete(&mut self, handle: &RelayHandle) -> RelayResult<()>;

    /// Per-object size ceiling in bytes.
    fn max_object_size(&self) -> u64;

    /// Static backend identifier for logging.
    fn backend_name(&self) -> &'static str;
}
