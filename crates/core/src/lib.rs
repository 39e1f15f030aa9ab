//! Core domain types and shared logic for Depot.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Content fingerprints for whole-file deduplication
//! - Segment planning against the relay's per-object size ceiling
//! - Upload session tokens and wire request/response types
//! - Configuration for the server, relay backend, and metadata store

pub mod config;
pub mod error;
pub mod hash;
pub mod plan;
pub mod session;

pub use error::{Error, Result};
pub use hash::{ContentHash, ContentHasher};
pub use plan::{SegmentPlan, SegmentSpan};
pub use session::{SessionToken, validate_segment_set};

/// Default segment size: 1900 MiB, comfortably under the relay's ~2 GiB
/// per-object ceiling.
pub const DEFAULT_SEGMENT_SIZE: u64 = 1900 * 1024 * 1024;

/// Maximum segment size the server will accept: 2000 MiB.
pub const MAX_SEGMENT_SIZE: u64 = 2000 * 1024 * 1024;

/// Minimum segment size: 1 MiB.
pub const MIN_SEGMENT_SIZE: u64 = 1024 * 1024;
