use thiserror::Error;

/// Failures surfaced to callers of the locking subsystem.
///
/// Contention is never an error: it is resolved by blocking. Contract violations (double release,
/// re-entrant administrative locks, ...) panic instead of being reported here.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    #[error("all {capacity} accessor slots are in use")]
    RegistryFull { capacity: usize },

    #[error("accessor {id} is not registered as a memory accessor")]
    NotRegistered { id: u32 },
}

/// Rejected [`crate::AddressSpaceConfig`] values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_accessors must be at least 1")]
    NoAccessors,

    #[error("address space size 0x{size:x} is not a non-zero multiple of the 64 KiB chunk size")]
    SizeNotChunkAligned { size: u64 },

    #[error("address space size 0x{size:x} exceeds the 32-bit address space")]
    SizeTooLarge { size: u64 },

    #[error("writer granule {granule} is not a power of two")]
    GranuleNotPowerOfTwo { granule: u32 },

    #[error("writer granule {granule} exceeds the largest encodable lock size")]
    GranuleTooLarge { granule: u32 },
}
