//! Fail-fast escalation for unrecoverable allocator faults.

use tracing::error;

use crate::error::ResetReason;

/// Escalation hook invoked when the allocator cannot continue safely.
///
/// On the board this records the reason and resets the CPU. Implementations
/// must not return.
pub trait FatalHandler: Send + Sync {
    fn reset(&self, reason: ResetReason) -> !;
}

/// Hosted stand-in for a board reset: logs the reason and panics.
#[derive(Debug, Default, Clone, Copy)]
pub struct PanicReset;

impl FatalHandler for PanicReset {
    fn reset(&self, reason: ResetReason) -> ! {
        error!(%reason, "fatal allocator fault, resetting");
        panic!("board reset: {reason}");
    }
}
