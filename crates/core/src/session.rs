//! Upload session tokens, segment-set validation, and wire types.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum accepted session token length.
const MAX_TOKEN_LEN: usize = 128;

/// A client-generated token correlating all segments of one resumable upload.
///
/// The client picks the token (any process can then service any segment of
/// the upload), so the server only constrains its shape: 1-128 characters
/// from `[A-Za-z0-9._-]`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Validate and wrap a client-supplied token.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.is_empty() || s.len() > MAX_TOKEN_LEN {
            return Err(crate::Error::InvalidSessionToken(format!(
                "token length must be 1..={MAX_TOKEN_LEN}, got {}",
                s.len()
            )));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(crate::Error::InvalidSessionToken(
                "token may only contain [A-Za-z0-9._-]".to_string(),
            ));
        }
        Ok(Self(s.to_string()))
    }

    /// Generate a fresh random token (used by clients starting an upload).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Get the token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken({})", self.0)
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Check that a session's persisted segments form exactly the upload the
/// client declared.
///
/// `entries` is `(index, size)` per persisted segment. Passes only when the
/// entry count equals the declared segment count, the index set is exactly
/// `0..declared_segments`, and the sizes sum to the declared total size.
/// A session failing this check must stay open so the client can repair it.
pub fn validate_segment_set(
    declared_segments: u32,
    declared_size: u64,
    entries: &[(u32, u64)],
) -> crate::Result<()> {
    if entries.len() != declared_segments as usize {
        return Err(crate::Error::MalformedSession(format!(
            "expected {declared_segments} segments, found {}",
            entries.len()
        )));
    }

    let mut seen = vec![false; declared_segments as usize];
    for &(index, _) in entries {
        match seen.get_mut(index as usize) {
            Some(slot) if !*slot => *slot = true,
            Some(_) => {
                return Err(crate::Error::MalformedSession(format!(
                    "duplicate segment index {index}"
                )));
            }
            None => {
                return Err(crate::Error::MalformedSession(format!(
                    "segment index {index} out of range 0..{declared_segments}"
                )));
            }
        }
    }
    // Uniqueness plus count == declared means the set is exactly 0..n-1,
    // but report the first gap explicitly for a usable error message.
    if let Some(missing) = seen.iter().position(|s| !*s) {
        return Err(crate::Error::MalformedSession(format!(
            "missing segment index {missing}"
        )));
    }

    let total: u64 = entries.iter().map(|&(_, size)| size).sum();
    if total != declared_size {
        return Err(crate::Error::MalformedSession(format!(
            "segment sizes sum to {total}, declared total is {declared_size}"
        )));
    }

    Ok(())
}

// =============================================================================
// Wire types
// =============================================================================

/// Response after a segment is accepted into a session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AcceptSegmentResponse {
    /// The session token the segment was recorded under.
    pub session_token: String,
    /// Zero-based segment index.
    pub index: u32,
    /// Accepted segment size in bytes.
    pub size: u64,
    /// How many segments the session holds after this one.
    pub received: u32,
}

/// Response from finalizing a session into a permanent file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FinalizeResponse {
    /// Identifier of the committed file.
    pub file_id: i64,
    /// Original filename.
    pub filename: String,
    /// Total file size in bytes.
    pub size: u64,
    /// Number of chunks the file was stored as.
    pub chunks: u32,
}

/// State of an open upload session, for resume.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionStatusResponse {
    /// The session token.
    pub session_token: String,
    /// Declared filename.
    pub filename: String,
    /// Declared total size in bytes.
    pub declared_size: u64,
    /// Declared total segment count.
    pub declared_segments: u32,
    /// Indices of segments already accepted, in ascending order.
    pub received: Vec<u32>,
}

/// Response from a direct (single-request) upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DirectUploadResponse {
    /// Identifier of the stored file.
    pub file_id: i64,
    /// Original filename.
    pub filename: String,
    /// Whether the content matched an existing file and no data was stored.
    pub deduplicated: bool,
}

/// One entry in a file listing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileEntry {
    /// File identifier.
    pub id: i64,
    /// Original filename.
    pub filename: String,
    /// Total size in bytes.
    pub size: u64,
    /// Number of stored chunks.
    pub chunks: u32,
    /// Creation timestamp (RFC 3339).
    pub created_at: String,
}

/// Response listing all stored files.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListFilesResponse {
    /// Stored files, most recent first.
    pub files: Vec<FileEntry>,
}

/// Response from deleting a file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeleteFileResponse {
    /// Identifier of the deleted file.
    pub deleted: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_token_parse() {
        SessionToken::parse("abc-123_X.y").unwrap();
        assert!(SessionToken::parse("").is_err());
        assert!(SessionToken::parse("has space").is_err());
        assert!(SessionToken::parse("slash/y").is_err());
        assert!(SessionToken::parse(&"a".repeat(129)).is_err());
    }

    #[test]
    fn test_generated_token_is_valid() {
        let token = SessionToken::generate();
        SessionToken::parse(token.as_str()).unwrap();
    }

    #[test]
    fn test_validate_segment_set_accepts_complete_session() {
        let entries = vec![(0, 30), (1, 30), (2, 10)];
        validate_segment_set(3, 70, &entries).unwrap();

        // Order of persisted entries does not matter.
        let shuffled = vec![(2, 10), (0, 30), (1, 30)];
        validate_segment_set(3, 70, &shuffled).unwrap();
    }

    #[test]
    fn test_validate_segment_set_rejects_count_mismatch() {
        let entries = vec![(0, 30), (1, 30)];
        let err = validate_segment_set(3, 60, &entries).unwrap_err();
        assert!(err.to_string().contains("expected 3 segments"));
    }

    #[test]
    fn test_validate_segment_set_rejects_gap_and_duplicate() {
        // Index 1 missing, index 3 out of range.
        let entries = vec![(0, 30), (3, 30), (2, 30)];
        assert!(validate_segment_set(3, 90, &entries).is_err());

        let entries = vec![(0, 30), (0, 30), (1, 30)];
        let err = validate_segment_set(3, 90, &entries).unwrap_err();
        assert!(err.to_string().contains("duplicate segment index 0"));
    }

    #[test]
    fn test_validate_segment_set_rejects_size_mismatch() {
        let entries = vec![(0, 30), (1, 30)];
        let err = validate_segment_set(2, 100, &entries).unwrap_err();
        assert!(err.to_string().contains("sum to 60"));
    }
}
