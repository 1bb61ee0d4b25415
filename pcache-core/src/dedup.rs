//! The internal deduplicated blob: the container stored as each value in
//! a pipeline library's `spirv_cache_map` and `driver_cache_map` (spec.md
//! §3), distinct from the self-contained, self-checksummed pipeline blob
//! of [`crate::blob`]. Grounded on `cache.c`'s
//! `vkd3d_pipeline_blob_internal`: a 4-byte checksum followed by either
//! raw driver-cache bytes or a single `VARINT_SPIRV` chunk body.
//!
//! Unlike [`crate::blob::PIPELINE_BLOB_MAGIC`]'s header, this container
//! carries no version tag or device identity of its own — dedup entries
//! only ever travel inside a pipeline library, which has already checked
//! those at the library header.

use crate::checksum;
use crate::error::{Error, Result};

const CHECKSUM_LEN: usize = 4;

/// Wraps `data` as `{checksum:u32, data[]}`, computing the checksum the
/// same way [`crate::checksum::checksum`] protects a standalone pipeline
/// blob's payload.
pub fn wrap(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(CHECKSUM_LEN + data.len());
    out.extend_from_slice(&checksum::checksum(data).to_le_bytes());
    out.extend_from_slice(data);
    out
}

/// Verifies the checksum prefix written by [`wrap`] and returns the
/// unwrapped `data` slice. Too-short input or a checksum mismatch is
/// `Error::BAD_DEDUP_CHECKSUM` — the same "corruption reported as a
/// version-stale cache, not a generic invalid argument" policy
/// `blob::validate` applies to the standalone blob checksum.
pub fn verify(blob: &[u8]) -> Result<&[u8]> {
    if blob.len() < CHECKSUM_LEN {
        return Err(Error::BAD_DEDUP_CHECKSUM);
    }
    let (checksum_bytes, data) = blob.split_at(CHECKSUM_LEN);
    let stored = u32::from_le_bytes(checksum_bytes.try_into().unwrap());
    if checksum::checksum(data) != stored {
        log::warn!("corrupt internal deduplicated blob found (checksum mismatch)");
        return Err(Error::BAD_DEDUP_CHECKSUM);
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn round_trip() {
        let data = vec![1u8, 2, 3, 4, 5, 6, 7];
        let wrapped = wrap(&data);
        assert_eq!(verify(&wrapped).unwrap(), &data[..]);
    }

    #[test]
    fn empty_data_round_trips() {
        let wrapped = wrap(&[]);
        assert_eq!(verify(&wrapped).unwrap(), &[] as &[u8]);
    }

    #[test]
    fn bit_flip_is_rejected() {
        let data = vec![9u8, 8, 7, 6];
        let mut wrapped = wrap(&data);
        let last = wrapped.len() - 1;
        wrapped[last] ^= 0x01;
        assert_eq!(verify(&wrapped), Err(Error::BAD_DEDUP_CHECKSUM));
    }

    #[test]
    fn too_short_is_rejected() {
        assert_eq!(verify(&[0u8, 1, 2]), Err(Error::BAD_DEDUP_CHECKSUM));
    }
}
