//! # pcache: keyed pipeline library
//!
//! A thread-safe, named collection of [`pcache_core`] pipeline blobs, with
//! table-of-contents-first serialization to a single flat byte range —
//! the layout a memory-mapped cache file wants, so a reader can validate
//! the library and locate any one pipeline's bytes before paging in the
//! rest of the file.
pub mod entry;
pub mod library;
pub mod toc;

pub use entry::BlobRef;
pub use library::PipelineLibrary;
pub use pcache_core::device::DeviceIdentity;
pub use pcache_core::error::{Error, Result};
pub use pcache_core::PipelineState;
