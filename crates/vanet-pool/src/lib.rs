//! Fixed-size-class buffer pools for the VANET daughterboard.
//!
//! Every variable-size buffer on the board (bus messages, UART scratch
//! space) comes from a small table of size classes. Allocation picks the
//! smallest class that fits; when boundary checking is enabled each buffer is
//! bracketed by magic tags that are verified on free, so overruns surface as
//! a reset with a distinct reason instead of silent corruption.

pub mod config;
pub mod error;
pub mod fatal;
pub mod pool;

pub use config::{PoolClass, PoolConfig};
pub use error::{PoolError, ResetReason, Result};
pub use fatal::{FatalHandler, PanicReset};
pub use pool::{BufferId, PoolAllocator, PoolStats, BOUNDARY_MAGIC};
