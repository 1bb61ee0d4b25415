//! Device identity and the small set of external collaborator interfaces
//! this crate consumes (driver pipeline cache, DXBC hashing). Device/driver
//! enumeration itself is out of scope; callers construct these from
//! whatever device-property source they already have.

use bitflags::bitflags;

/// Everything a pipeline blob or library header keys its validity on.
/// Two identities that don't compare equal mean the cache must be rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub vendor_id: u32,
    pub device_id: u32,
    /// Opaque build/version identity of the layer producing the cache.
    pub build: u64,
    /// Digest of whatever configuration affects generated SPIR-V
    /// (extension availability, feature toggles, ...).
    pub shader_interface_key: u64,
    /// Driver-reported pipeline cache UUID.
    pub cache_uuid: [u8; 16],
}

bitflags! {
    /// Shader stage bit mask, packed into the upper 16 bits of a chunk
    /// type. Bit positions are an on-disk contract; do not renumber.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStage: u16 {
        const VERTEX = 0x0001;
        const TESS_CONTROL = 0x0002;
        const TESS_EVAL = 0x0004;
        const GEOMETRY = 0x0008;
        const FRAGMENT = 0x0010;
        const COMPUTE = 0x0020;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ShaderMetaFlags: u32 {
        /// Code was replaced with a developer override; serializers must
        /// omit the stage entirely rather than emit its SPIR-V/meta chunks.
        const REPLACED = 0x1;
    }
}

/// Per-stage shader metadata stored in a `SHADER_META` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderMeta {
    pub flags: ShaderMetaFlags,
    /// Hash of the DXBC source this SPIR-V was compiled from; gates
    /// `extract_spirv` against a caller supplying a different shader.
    pub dxbc_hash: u64,
    pub workgroup_size: [u32; 3],
}
impl ShaderMeta {
    pub(crate) const PACKED_LEN: usize = 4 + 8 + 4 * 3;

    pub(crate) fn to_bytes(self) -> [u8; Self::PACKED_LEN] {
        let mut out = [0u8; Self::PACKED_LEN];
        out[0..4].copy_from_slice(&self.flags.bits().to_le_bytes());
        out[4..12].copy_from_slice(&self.dxbc_hash.to_le_bytes());
        for (i, word) in self.workgroup_size.iter().enumerate() {
            let start = 12 + i * 4;
            out[start..start + 4].copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::PACKED_LEN {
            return None;
        }
        let flags = ShaderMetaFlags::from_bits_truncate(u32::from_le_bytes(
            bytes[0..4].try_into().ok()?,
        ));
        let dxbc_hash = u64::from_le_bytes(bytes[4..12].try_into().ok()?);
        let mut workgroup_size = [0u32; 3];
        for (i, slot) in workgroup_size.iter_mut().enumerate() {
            let start = 12 + i * 4;
            *slot = u32::from_le_bytes(bytes[start..start + 4].try_into().ok()?);
        }
        Some(ShaderMeta {
            flags,
            dxbc_hash,
            workgroup_size,
        })
    }
}

/// Stands in for the driver's opaque pipeline cache object: a blob the
/// driver can size, read out, and reconstruct a live handle from.
pub trait DriverCache {
    type Handle;

    fn query_size(&self) -> usize;
    fn read_bytes(&self, out: &mut [u8]);
    fn create_from_bytes(&self, bytes: &[u8]) -> Self::Handle;
}

/// A trivial [`DriverCache`] that carries no bytes; used by tests and by
/// callers who have no live driver object (e.g. the CLI inspecting a file
/// on disk).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDriverCache;
impl DriverCache for NullDriverCache {
    type Handle = ();

    fn query_size(&self) -> usize {
        0
    }
    fn read_bytes(&self, _out: &mut [u8]) {}
    fn create_from_bytes(&self, _bytes: &[u8]) {}
}
