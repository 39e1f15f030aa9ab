//! Repository traits for metadata operations.

pub mod chunks;
pub mod files;
pub mod sessions;

pub use chunks::ChunkRepo;
pub use files::{FileRepo, NewChunk};
pub use sessions::{SegmentUpsert, SessionRepo};
