//! # pcache-core: pipeline cache blob codec
//!
//! Low-level, self-contained codec for a single cached graphics pipeline's
//! state: a compact varint encoding for SPIR-V word streams, and a
//! versioned, checksummed TLV container tying a driver pipeline-cache blob
//! and one or more SPIR-V bodies to a device identity and a root-signature
//! compatibility hash.
//!
//! This crate has no notion of a *collection* of pipelines — that's
//! `pcache`, built on top of this one the way `spirq` is built on top of
//! `spirq-core`.
pub mod blob;
pub mod checksum;
pub mod dedup;
pub mod device;
pub mod error;
pub mod varint;

pub use blob::{ChunkKind, PipelineState, StageCode};
pub use device::{DeviceIdentity, DriverCache, NullDriverCache, ShaderMeta, ShaderMetaFlags, ShaderStage};
pub use error::{Error, Result};
