use std::fmt;

/// Board reset reason codes reported when the allocator hits a fatal condition.
///
/// Values match the reset reason register encoding so a supervisor can tell
/// allocator faults apart after the board comes back up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ResetReason {
    /// A zero-byte allocation was requested.
    AllocNull = 0x0202,
    /// No pool had a free slot large enough.
    AllocFail = 0x0203,
    /// Attempt to free a buffer that is not a live allocation.
    FreeInvalid = 0x0204,
    /// The boundary tag of a buffer was overwritten.
    FreeBoundary = 0x0205,
}

impl ResetReason {
    /// Raw reason code.
    pub fn code(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for ResetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResetReason::AllocNull => "ALLOC_NULL",
            ResetReason::AllocFail => "ALLOC_FAIL",
            ResetReason::FreeInvalid => "FREE_INVALID",
            ResetReason::FreeBoundary => "FREE_BOUNDARY",
        };
        write!(f, "{name} (0x{:04x})", self.code())
    }
}

/// Errors raised by the pool allocator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// A zero-byte allocation was requested.
    #[error("zero-byte allocation requested")]
    ZeroSize,

    /// No pool could satisfy the request.
    #[error("out of buffers for {size} byte request")]
    Exhausted { size: usize },

    /// The buffer id does not name a live allocation.
    #[error("invalid free of buffer (pool {pool}, slot {slot})")]
    InvalidFree { pool: usize, slot: usize },

    /// The header or trailer magic of the buffer was overwritten.
    #[error("boundary corrupted on buffer (pool {pool}, slot {slot})")]
    BoundaryCorrupted { pool: usize, slot: usize },

    /// An access went past the allocated size of a buffer.
    #[error("access of {len} bytes at offset {offset} exceeds allocation of {size} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },

    /// The pool table is unusable.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}

impl PoolError {
    /// The reset reason this error escalates to under the fail-fast policy.
    ///
    /// Configuration and bounds errors are caller bugs caught before any
    /// pool state changed; they are reported as an invalid free.
    pub fn reset_reason(&self) -> ResetReason {
        match self {
            PoolError::ZeroSize => ResetReason::AllocNull,
            PoolError::Exhausted { .. } => ResetReason::AllocFail,
            PoolError::BoundaryCorrupted { .. } => ResetReason::FreeBoundary,
            PoolError::InvalidFree { .. }
            | PoolError::OutOfBounds { .. }
            | PoolError::InvalidConfig(_) => ResetReason::FreeInvalid,
        }
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;
