use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Tick rate of the board's RTC-driven system tick.
pub const DEFAULT_TICK_HZ: u32 = 32;

/// Source of scheduler ticks.
pub trait Clock: Send + Sync {
    /// Ticks since an arbitrary epoch. Wraps.
    fn ticks(&self) -> u32;

    /// Ticks per second.
    fn tick_hz(&self) -> u32;

    /// Convert milliseconds to ticks, rounding down.
    fn ms_to_ticks(&self, ms: u32) -> u32 {
        (u64::from(ms) * u64::from(self.tick_hz()) / 1000) as u32
    }

    /// Length of one tick.
    fn tick_period(&self) -> Duration {
        Duration::from_secs(1) / self.tick_hz().max(1)
    }
}

/// Monotonic clock derived from [`Instant`].
#[derive(Debug, Clone)]
pub struct SystemClock {
    epoch: Instant,
    hz: u32,
}

impl SystemClock {
    pub fn new(hz: u32) -> Self {
        Self {
            epoch: Instant::now(),
            hz: hz.max(1),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_HZ)
    }
}

impl Clock for SystemClock {
    fn ticks(&self) -> u32 {
        let elapsed = self.epoch.elapsed();
        (elapsed.as_millis() as u64 * u64::from(self.hz) / 1000) as u32
    }

    fn tick_hz(&self) -> u32 {
        self.hz
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    ticks: AtomicU32,
    hz: u32,
}

impl ManualClock {
    pub fn new(hz: u32) -> Self {
        Self {
            ticks: AtomicU32::new(0),
            hz: hz.max(1),
        }
    }

    pub fn advance(&self, ticks: u32) {
        self.ticks.fetch_add(ticks, Ordering::AcqRel);
    }

    pub fn set(&self, ticks: u32) {
        self.ticks.store(ticks, Ordering::Release);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_HZ)
    }
}

impl Clock for ManualClock {
    fn ticks(&self) -> u32 {
        self.ticks.load(Ordering::Acquire)
    }

    fn tick_hz(&self) -> u32 {
        self.hz
    }
}
