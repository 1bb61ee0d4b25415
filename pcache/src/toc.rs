//! On-disk layout of a serialized pipeline library: header, table of
//! contents, name table, blob data (§4.3.2). Header and TOC entries are
//! plain old data, so they're read and written via `bytemuck` casts rather
//! than hand-rolled byte slicing.

use bytemuck::{Pod, Zeroable};

use pcache_core::error::{Error, Result};

const fn make_magic(a: u8, b: u8, c: u8, d: u8) -> u32 {
    (a as u32) | ((b as u32) << 8) | ((c as u32) << 16) | ((d as u32) << 24)
}

/// `'V' 'K' 'L' 3`, packed little-endian. Distinct from the single-blob
/// magic so a blob can never be mistaken for a library or vice versa.
pub const LIBRARY_MAGIC: u32 = make_magic(b'V', b'K', b'L', 3);

pub const BLOB_ALIGN: usize = 8;

pub fn align8(n: usize) -> usize {
    (n + (BLOB_ALIGN - 1)) & !(BLOB_ALIGN - 1)
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq, Eq)]
pub struct RawHeader {
    pub version: u32,
    pub vendor_id: u32,
    pub device_id: u32,
    pub spirv_count: u32,
    pub driver_cache_count: u32,
    pub pipeline_count: u32,
    pub build: u64,
    pub shader_interface_key: u64,
    pub cache_uuid: [u8; 16],
}
pub const HEADER_LEN: usize = std::mem::size_of::<RawHeader>();
const _: () = assert!(HEADER_LEN == 56);

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq, Eq)]
pub struct RawTocEntry {
    pub blob_offset: u64,
    pub name_length: u32,
    pub blob_length: u32,
}
pub const TOC_ENTRY_LEN: usize = std::mem::size_of::<RawTocEntry>();
const _: () = assert!(TOC_ENTRY_LEN == 16);

pub fn read_header(bytes: &[u8]) -> Result<&RawHeader> {
    bytemuck::try_from_bytes(bytes.get(..HEADER_LEN).ok_or(Error::BAD_HEADER_LEN)?)
        .map_err(|_| Error::BAD_HEADER_LEN)
}

pub fn read_toc_entries(bytes: &[u8], count: usize) -> Result<&[RawTocEntry]> {
    let len = count * TOC_ENTRY_LEN;
    let slice = bytes.get(..len).ok_or(Error::TOC_OVERFLOW)?;
    bytemuck::try_cast_slice(slice).map_err(|_| Error::TOC_OVERFLOW)
}
