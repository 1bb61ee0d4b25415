//! Error and result reported by pipeline cache procedures.
use std::error;
use std::fmt;

#[derive(PartialEq, Eq, Clone, Debug)]
pub enum Error {
    /// The blob or library's header, magic, device identity, or checksum
    /// doesn't match what's current. The caller should discard the cache
    /// and rebuild it; this is also what a corrupt payload maps to, on
    /// purpose (see `DRIVER_VERSION_MISMATCH` policy below).
    DriverVersionMismatch(&'static str),
    /// `vendor_id`/`device_id` don't match the current device.
    AdapterNotFound(&'static str),
    /// Well-formed but semantically wrong: a hash didn't match, a varint
    /// stream didn't decode, or a table-of-contents entry ran out of
    /// bounds.
    Invalid(&'static str),
    /// A chunk required by the operation is missing or the wrong size:
    /// `PSO_COMPAT` during `validate`, or `SHADER_META`/`VARINT_SPIRV`
    /// during `extract_spirv`.
    Fail(&'static str),
    /// `store` was called with a name that's already present.
    AlreadyExists,
    /// Allocation or map growth failed.
    OutOfMemory,
    /// The caller's output buffer is smaller than the measured size.
    Incomplete,
}
impl Error {
    pub const BAD_HEADER_LEN: Self =
        Self::DriverVersionMismatch("blob is shorter than the fixed header");
    pub const BAD_MAGIC: Self = Self::DriverVersionMismatch("magic/version tag doesn't match");
    pub const BAD_BUILD: Self =
        Self::DriverVersionMismatch("build, shader interface key, or cache uuid doesn't match");
    pub const BAD_CHECKSUM: Self =
        Self::DriverVersionMismatch("checksum does not match recomputed payload checksum");
    pub const BAD_VENDOR: Self = Self::AdapterNotFound("vendor_id or device_id doesn't match");

    pub const MISSING_PSO_COMPAT: Self = Self::Fail("PSO_COMPAT chunk is absent or malformed");

    pub const BAD_ROOT_SIGNATURE_HASH: Self =
        Self::Invalid("stored root signature compat hash does not match the expected one");
    pub const MALFORMED_VARINT: Self = Self::Invalid("varint stream is truncated or overlong");
    pub const MISSING_SHADER_META: Self =
        Self::Fail("SHADER_META chunk for the requested stage is absent or malformed");
    pub const MISSING_SPIRV: Self =
        Self::Fail("VARINT_SPIRV chunk for the requested stage is absent");
    pub const DXBC_HASH_MISMATCH: Self =
        Self::Invalid("cached entry was produced from a different source shader");
    pub const TOC_OVERFLOW: Self =
        Self::Invalid("table of contents entry overflows the serialized byte range");
    pub const BAD_DEDUP_CHECKSUM: Self = Self::DriverVersionMismatch(
        "internal deduplicated blob checksum does not match recomputed payload checksum",
    );
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Error::*;
        match self {
            DriverVersionMismatch(msg) => write!(f, "driver version mismatch: {}", msg),
            AdapterNotFound(msg) => write!(f, "adapter not found: {}", msg),
            Invalid(msg) => write!(f, "invalid argument: {}", msg),
            Fail(msg) => write!(f, "operation failed: {}", msg),
            AlreadyExists => write!(f, "an entry with this name already exists"),
            OutOfMemory => write!(f, "allocation failed"),
            Incomplete => write!(f, "output buffer is too small"),
        }
    }
}
impl error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
