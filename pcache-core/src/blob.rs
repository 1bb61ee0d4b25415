//! Single-pipeline blob codec: a versioned, checksummed TLV container for
//! one pipeline's cached state (§4.2 of the design).
//!
//! Layout: a fixed 48-byte header, followed by a sequence of 8-byte-aligned
//! chunks. Chunk type is `kind (low 16 bits) | stage bits (high 16 bits)`.

use log::warn;

use crate::checksum;
use crate::device::{DeviceIdentity, ShaderMeta, ShaderMetaFlags, ShaderStage};
use crate::error::{Error, Result};
use crate::varint;

const fn make_magic(a: u8, b: u8, c: u8, d: u8) -> u32 {
    (a as u32) | ((b as u32) << 8) | ((c as u32) << 16) | ((d as u32) << 24)
}

/// `'V' 'K' 'B' 3`, packed little-endian.
pub const PIPELINE_BLOB_MAGIC: u32 = make_magic(b'V', b'K', b'B', 3);

pub const HEADER_LEN: usize = 48;
const CHUNK_HEADER_LEN: usize = 8;
const CHUNK_ALIGN: usize = 8;

/// TLV chunk kind, packed into the low 16 bits of a chunk's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ChunkKind {
    PipelineCache = 0,
    VarintSpirv = 1,
    /// Reserved: references a deduplicated driver blob by hash. Accepted
    /// on read; this crate's serializer does not emit it (see DESIGN.md).
    PipelineCacheLink = 2,
    /// Reserved: references a deduplicated SPIR-V blob by hash. Accepted
    /// on read, not emitted (see DESIGN.md).
    VarintSpirvLink = 3,
    ShaderMeta = 4,
    PsoCompat = 5,
}

fn align8(n: usize) -> usize {
    (n + (CHUNK_ALIGN - 1)) & !(CHUNK_ALIGN - 1)
}

/// Packs a chunk kind and an optional stage bit mask into a chunk type.
pub fn chunk_type(kind: ChunkKind, stage: ShaderStage) -> u32 {
    (kind as u32) | ((stage.bits() as u32) << 16)
}

/// One shader stage's code and metadata, as handed to [`serialize`].
#[derive(Debug, Clone)]
pub struct StageCode {
    pub stage: ShaderStage,
    pub spirv: Vec<u32>,
    pub meta: ShaderMeta,
}

/// Everything needed to serialize one pipeline's cached state.
#[derive(Debug, Clone)]
pub struct PipelineState {
    pub root_signature_compat_hash: u64,
    /// Driver-produced opaque pipeline cache blob, if the driver handed
    /// one back. Standalone mode always inlines this.
    pub driver_cache: Option<Vec<u8>>,
    pub stages: Vec<StageCode>,
}

fn chunk_total_len(payload_len: usize) -> usize {
    CHUNK_HEADER_LEN + align8(payload_len)
}

fn write_chunk(buf: &mut Vec<u8>, ty: u32, payload: &[u8]) {
    buf.extend_from_slice(&ty.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    let pad = align8(payload.len()) - payload.len();
    buf.resize(buf.len() + pad, 0);
}

fn emitted_stages(state: &PipelineState) -> impl Iterator<Item = &StageCode> {
    state
        .stages
        .iter()
        .filter(|s| !s.meta.flags.contains(ShaderMetaFlags::REPLACED))
}

/// Computes the exact serialized size of `state` without writing anything
/// (the "measure" half of §4.2.1's two-phase serialize).
pub fn serialized_size(state: &PipelineState) -> usize {
    let mut payload_len = chunk_total_len(8); // PSO_COMPAT
    if let Some(cache) = &state.driver_cache {
        payload_len += chunk_total_len(cache.len());
    }
    for stage in emitted_stages(state) {
        let varint_len = varint::sizeof_varint(&stage.spirv);
        payload_len += chunk_total_len(8 + varint_len);
        payload_len += chunk_total_len(ShaderMeta::PACKED_LEN);
    }
    HEADER_LEN + payload_len
}

/// Writes `state` into `buf` (the "emit" half of §4.2.1). Returns the
/// number of bytes written, or `Error::Incomplete` if `buf` is too small.
/// Emission order is fixed: `PSO_COMPAT`, then `PIPELINE_CACHE` (if
/// present), then each non-`REPLACED` stage's `VARINT_SPIRV` followed by
/// its `SHADER_META`, all 8-byte padded with zero so identical logical
/// content always produces identical bytes.
pub fn serialize_into(
    state: &PipelineState,
    identity: &DeviceIdentity,
    buf: &mut [u8],
) -> Result<usize> {
    let total = serialized_size(state);
    if buf.len() < total {
        return Err(Error::Incomplete);
    }

    let mut payload = Vec::with_capacity(total - HEADER_LEN);

    write_chunk(
        &mut payload,
        chunk_type(ChunkKind::PsoCompat, ShaderStage::empty()),
        &state.root_signature_compat_hash.to_le_bytes(),
    );

    if let Some(cache) = &state.driver_cache {
        write_chunk(
            &mut payload,
            chunk_type(ChunkKind::PipelineCache, ShaderStage::empty()),
            cache,
        );
    }

    for stage in emitted_stages(state) {
        let varint_bytes = varint::encode_to_vec(&stage.spirv);
        let mut spirv_payload =
            Vec::with_capacity(8 + varint_bytes.len());
        spirv_payload.extend_from_slice(&((stage.spirv.len() * 4) as u32).to_le_bytes());
        spirv_payload.extend_from_slice(&(varint_bytes.len() as u32).to_le_bytes());
        spirv_payload.extend_from_slice(&varint_bytes);
        write_chunk(
            &mut payload,
            chunk_type(ChunkKind::VarintSpirv, stage.stage),
            &spirv_payload,
        );

        write_chunk(
            &mut payload,
            chunk_type(ChunkKind::ShaderMeta, stage.stage),
            &stage.meta.to_bytes(),
        );
    }

    debug_assert_eq!(payload.len(), total - HEADER_LEN);

    buf[..HEADER_LEN].fill(0);
    buf[HEADER_LEN..total].copy_from_slice(&payload);

    let checksum = checksum::checksum(&payload);
    buf[0..4].copy_from_slice(&PIPELINE_BLOB_MAGIC.to_le_bytes());
    buf[4..8].copy_from_slice(&identity.vendor_id.to_le_bytes());
    buf[8..12].copy_from_slice(&identity.device_id.to_le_bytes());
    buf[12..16].copy_from_slice(&checksum.to_le_bytes());
    buf[16..24].copy_from_slice(&identity.build.to_le_bytes());
    buf[24..32].copy_from_slice(&identity.shader_interface_key.to_le_bytes());
    buf[32..48].copy_from_slice(&identity.cache_uuid);

    Ok(total)
}

/// Convenience wrapper over [`serialize_into`] that allocates its own
/// output buffer, sized exactly by [`serialized_size`].
pub fn serialize(state: &PipelineState, identity: &DeviceIdentity) -> Vec<u8> {
    let mut buf = vec![0u8; serialized_size(state)];
    serialize_into(state, identity, &mut buf).expect("buffer sized by serialized_size");
    buf
}

/// Locates the first chunk matching `ty` by a linear walk from the start
/// of `payload`. Returns `None` both when no chunk matches and when the
/// walk hits a chunk whose aligned size would run past the end of
/// `payload` — a malformed payload is treated as "chunk absent", not as a
/// panic or out-of-bounds read.
pub fn find_chunk(payload: &[u8], ty: u32) -> Option<&[u8]> {
    let mut offset = 0usize;
    while offset + CHUNK_HEADER_LEN <= payload.len() {
        let chunk_ty = u32::from_le_bytes(payload[offset..offset + 4].try_into().unwrap());
        let size = u32::from_le_bytes(payload[offset + 4..offset + 8].try_into().unwrap()) as usize;
        let aligned = chunk_total_len(size);
        if offset + aligned > payload.len() {
            return None;
        }
        let data_start = offset + CHUNK_HEADER_LEN;
        if chunk_ty == ty {
            return Some(&payload[data_start..data_start + size]);
        }
        offset += aligned;
    }
    None
}

/// Returns the blob's raw chunk payload (everything after the header).
pub fn payload(blob: &[u8]) -> &[u8] {
    &blob[HEADER_LEN..]
}

/// Validates `blob` against `identity` and `expected_root_signature_hash`,
/// per the ordered check table of §4.2.2. Each failure returns
/// immediately with the listed error; corruption (a bad checksum) is
/// reported as `DriverVersionMismatch`, not `Invalid`, by policy — some
/// callers handle version-mismatch by recompiling but mishandle a generic
/// invalid-argument from the cache path.
pub fn validate(
    blob: &[u8],
    identity: &DeviceIdentity,
    expected_root_signature_hash: u64,
) -> Result<()> {
    if blob.len() < HEADER_LEN {
        return Err(Error::BAD_HEADER_LEN);
    }
    let version = u32::from_le_bytes(blob[0..4].try_into().unwrap());
    if version != PIPELINE_BLOB_MAGIC {
        return Err(Error::BAD_MAGIC);
    }

    let vendor_id = u32::from_le_bytes(blob[4..8].try_into().unwrap());
    let device_id = u32::from_le_bytes(blob[8..12].try_into().unwrap());
    if vendor_id != identity.vendor_id || device_id != identity.device_id {
        return Err(Error::BAD_VENDOR);
    }

    let build = u64::from_le_bytes(blob[16..24].try_into().unwrap());
    let shader_interface_key = u64::from_le_bytes(blob[24..32].try_into().unwrap());
    let cache_uuid = &blob[32..48];
    if build != identity.build
        || shader_interface_key != identity.shader_interface_key
        || cache_uuid != identity.cache_uuid
    {
        return Err(Error::BAD_BUILD);
    }

    let stored_checksum = u32::from_le_bytes(blob[12..16].try_into().unwrap());
    let data = payload(blob);
    let recomputed = checksum::checksum(data);
    if recomputed != stored_checksum {
        warn!("corrupt pipeline cache blob entry found (checksum mismatch)");
        return Err(Error::BAD_CHECKSUM);
    }

    let compat_chunk = find_chunk(
        data,
        chunk_type(ChunkKind::PsoCompat, ShaderStage::empty()),
    )
    .ok_or(Error::MISSING_PSO_COMPAT)?;
    if compat_chunk.len() != 8 {
        return Err(Error::MISSING_PSO_COMPAT);
    }
    let stored_hash = u64::from_le_bytes(compat_chunk.try_into().unwrap());
    if stored_hash != expected_root_signature_hash {
        warn!("root signature compatibility hash mismatch");
        return Err(Error::BAD_ROOT_SIGNATURE_HASH);
    }

    Ok(())
}

/// Locates the `PIPELINE_CACHE` chunk and returns its raw bytes, if any.
pub fn extract_driver_cache(blob: &[u8]) -> Option<&[u8]> {
    find_chunk(
        payload(blob),
        chunk_type(ChunkKind::PipelineCache, ShaderStage::empty()),
    )
}

/// Extracts a stage's SPIR-V and metadata, verifying that `dxbc_hash`
/// matches the hash recorded when the cache entry was built. A missing
/// `SHADER_META` or `VARINT_SPIRV` chunk for `stage` is `Error::Fail`,
/// not `Error::Invalid` — the stage simply isn't cached, which is a
/// different failure than a cached stage whose content doesn't check out.
pub fn extract_spirv(
    blob: &[u8],
    stage: ShaderStage,
    dxbc_hash: u64,
) -> Result<(Vec<u32>, ShaderMeta)> {
    let data = payload(blob);

    let meta_chunk =
        find_chunk(data, chunk_type(ChunkKind::ShaderMeta, stage)).ok_or(Error::MISSING_SHADER_META)?;
    let meta = ShaderMeta::from_bytes(meta_chunk).ok_or(Error::MISSING_SHADER_META)?;
    if meta.dxbc_hash != dxbc_hash {
        return Err(Error::DXBC_HASH_MISMATCH);
    }

    let spirv_chunk =
        find_chunk(data, chunk_type(ChunkKind::VarintSpirv, stage)).ok_or(Error::MISSING_SPIRV)?;
    if spirv_chunk.len() < 8 {
        return Err(Error::MISSING_SPIRV);
    }
    let decompressed_size = u32::from_le_bytes(spirv_chunk[0..4].try_into().unwrap()) as usize;
    let compressed_size = u32::from_le_bytes(spirv_chunk[4..8].try_into().unwrap()) as usize;
    if decompressed_size % 4 != 0 {
        return Err(Error::Invalid("decompressed_size is not a multiple of 4"));
    }
    let varint_bytes = spirv_chunk
        .get(8..8 + compressed_size)
        .ok_or(Error::Invalid("compressed_size overflows the chunk"))?;

    let words = varint::decode_to_vec(decompressed_size / 4, varint_bytes)
        .map_err(|_| Error::Invalid("failed to decode varint-encoded SPIR-V"))?;

    Ok((words, meta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn identity() -> DeviceIdentity {
        DeviceIdentity {
            vendor_id: 0x10de,
            device_id: 0x2684,
            build: 0xdead_beef_0000_0001,
            shader_interface_key: 0x1234_5678_9abc_def0,
            cache_uuid: [7u8; 16],
        }
    }

    fn sample_state() -> PipelineState {
        PipelineState {
            root_signature_compat_hash: 0xaaaa_bbbb_cccc_dddd,
            driver_cache: Some(vec![1, 2, 3, 4, 5]),
            stages: vec![
                StageCode {
                    stage: ShaderStage::VERTEX,
                    spirv: vec![0x0302_3203, 1, 2, 300, 70000],
                    meta: ShaderMeta {
                        flags: ShaderMetaFlags::empty(),
                        dxbc_hash: 0x1111,
                        workgroup_size: [0, 0, 0],
                    },
                },
                StageCode {
                    stage: ShaderStage::FRAGMENT,
                    spirv: vec![9, 9, 9],
                    meta: ShaderMeta {
                        flags: ShaderMetaFlags::empty(),
                        dxbc_hash: 0x2222,
                        workgroup_size: [0, 0, 0],
                    },
                },
            ],
        }
    }

    #[test]
    fn round_trip_validates_and_extracts() {
        let state = sample_state();
        let identity = identity();
        let blob = serialize(&state, &identity);

        validate(&blob, &identity, state.root_signature_compat_hash).unwrap();

        let cache = extract_driver_cache(&blob).unwrap();
        assert_eq!(cache, &[1, 2, 3, 4, 5]);

        let (spirv, meta) = extract_spirv(&blob, ShaderStage::VERTEX, 0x1111).unwrap();
        assert_eq!(spirv, vec![0x0302_3203, 1, 2, 300, 70000]);
        assert_eq!(meta.dxbc_hash, 0x1111);

        let (spirv, _meta) = extract_spirv(&blob, ShaderStage::FRAGMENT, 0x2222).unwrap();
        assert_eq!(spirv, vec![9, 9, 9]);
    }

    #[test]
    fn measure_matches_emit() {
        let state = sample_state();
        let identity = identity();
        assert_eq!(serialized_size(&state), serialize(&state, &identity).len());
    }

    #[test]
    fn replaced_stage_is_omitted() {
        let mut state = sample_state();
        state.stages[1].meta.flags = ShaderMetaFlags::REPLACED;
        let identity = identity();
        let blob = serialize(&state, &identity);
        assert!(extract_spirv(&blob, ShaderStage::FRAGMENT, 0x2222).is_err());
        let (spirv, _) = extract_spirv(&blob, ShaderStage::VERTEX, 0x1111).unwrap();
        assert_eq!(spirv, vec![0x0302_3203, 1, 2, 300, 70000]);
    }

    #[test]
    fn checksum_flip_is_driver_version_mismatch() {
        let state = sample_state();
        let identity = identity();
        let mut blob = serialize(&state, &identity);
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert_eq!(
            validate(&blob, &identity, state.root_signature_compat_hash),
            Err(Error::BAD_CHECKSUM)
        );
    }

    #[test]
    fn wrong_vendor_is_adapter_not_found() {
        let state = sample_state();
        let identity = identity();
        let blob = serialize(&state, &identity);
        let mut other = identity;
        other.vendor_id = 0xDEAD_BEEF;
        assert_eq!(
            validate(&blob, &other, state.root_signature_compat_hash),
            Err(Error::BAD_VENDOR)
        );
    }

    #[test]
    fn wrong_build_is_driver_version_mismatch() {
        let state = sample_state();
        let identity = identity();
        let blob = serialize(&state, &identity);
        let mut other = identity;
        other.build += 1;
        assert_eq!(
            validate(&blob, &other, state.root_signature_compat_hash),
            Err(Error::BAD_BUILD)
        );
    }

    #[test]
    fn wrong_root_signature_hash_is_invalid() {
        let state = sample_state();
        let identity = identity();
        let blob = serialize(&state, &identity);
        assert_eq!(
            validate(&blob, &identity, state.root_signature_compat_hash ^ 1),
            Err(Error::BAD_ROOT_SIGNATURE_HASH)
        );
        validate(&blob, &identity, state.root_signature_compat_hash).unwrap();
    }

    #[test]
    fn missing_stage_is_fail() {
        let state = sample_state();
        let identity = identity();
        let blob = serialize(&state, &identity);
        // No COMPUTE stage was ever serialized.
        assert_eq!(
            extract_spirv(&blob, ShaderStage::COMPUTE, 0),
            Err(Error::MISSING_SHADER_META)
        );
    }

    #[test]
    fn dxbc_hash_mismatch_rejects_extraction() {
        let state = sample_state();
        let identity = identity();
        let blob = serialize(&state, &identity);
        assert_eq!(
            extract_spirv(&blob, ShaderStage::VERTEX, 0xffff),
            Err(Error::DXBC_HASH_MISMATCH)
        );
    }

    #[test]
    fn find_chunk_rejects_truncated_payload() {
        let state = sample_state();
        let identity = identity();
        let blob = serialize(&state, &identity);
        // Truncate mid-payload: the walk must stop cleanly, not panic.
        let truncated = &blob[..blob.len() - 3];
        assert_eq!(
            find_chunk(
                payload(truncated),
                chunk_type(ChunkKind::ShaderMeta, ShaderStage::FRAGMENT)
            ),
            None
        );
    }

    #[test]
    fn too_short_blob_is_driver_version_mismatch() {
        let identity = identity();
        assert_eq!(
            validate(&[0u8; 4], &identity, 0),
            Err(Error::BAD_HEADER_LEN)
        );
    }
}
