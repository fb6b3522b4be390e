use std::sync::{Mutex, MutexGuard, PoisonError};

/// Scheduler preemption lock.
///
/// While a [`SchedGuard`] is alive no other publisher can start a fan-out,
/// so deliveries from successive publishes reach every queue in the same
/// order. Receivers are never blocked by it.
#[derive(Debug, Default)]
pub struct SchedLock {
    inner: Mutex<()>,
}

/// Held for the duration of one fan-out.
pub struct SchedGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl SchedLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> SchedGuard<'_> {
        SchedGuard {
            _guard: self.inner.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}
