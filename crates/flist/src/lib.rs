//! # Overview
//!
//! The sender's catalogue of files in flight: immutable per-file metadata
//! records, the segment-oriented file list that allocates the dense wire
//! indices, and the one-entry cache that drives the delta flags of the
//! file-list serialiser. The list is append-only; segments are retired from
//! the front once the receiver confirms completion, which bounds the memory
//! held for a transfer of any size.

pub mod cache;
pub mod entry;
pub mod list;

pub use cache::FileInfoCache;
pub use entry::{FileAttributes, FileInfo, FileKind, User};
pub use list::{FileList, Segment, SegmentBuilder, StubDirectory};
