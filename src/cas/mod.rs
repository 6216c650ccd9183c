//! Content-addressable store readers
//!
//! Blob reads over the bytestream API and directory tree resolution, either
//! paged through `GetTree` or walked breadth-first one blob at a time.

pub mod bytestream;
pub mod tree;

pub use bytestream::BytestreamFetcher;
pub use tree::{DirectoryEntry, DirectoryMap, TreeFetcher, TreeWalk};
