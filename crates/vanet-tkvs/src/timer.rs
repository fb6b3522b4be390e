//! Bus timers: expiry is announced as a bus event.
//!
//! A timer publishes `publish_immediate(target, event, id)` when it fires,
//! so a task waits for timeouts on the same mailbox as everything else.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::{debug, trace};

use crate::bus::Bus;
use crate::clock::Clock;
use crate::error::{BusError, Result};
use crate::source::{clock_event, CLOCK};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    OneShot,
    Periodic,
}

/// Timer definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BusTimer {
    pub kind: TimerKind,
    /// Carried in the immediate byte of the expiry event.
    pub id: u8,
    /// Source the expiry event is published on.
    pub target: u8,
    pub event: u16,
    /// Period or delay in ticks.
    pub timeout: u32,
}

impl BusTimer {
    pub fn one_shot(id: u8, target: u8, event: u16, timeout: u32) -> Self {
        Self {
            kind: TimerKind::OneShot,
            id,
            target,
            event,
            timeout,
        }
    }

    pub fn periodic(id: u8, target: u8, event: u16, timeout: u32) -> Self {
        Self {
            kind: TimerKind::Periodic,
            id,
            target,
            event,
            timeout,
        }
    }
}

/// Handle returned by [`TimerService::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(usize);

struct Slot {
    timer: BusTimer,
    active: bool,
    deadline: u32,
}

/// Drives a set of [`BusTimer`]s off a [`Clock`].
pub struct TimerService {
    bus: Arc<Bus>,
    clock: Arc<dyn Clock>,
    slots: Mutex<Vec<Slot>>,
}

fn expired(now: u32, deadline: u32) -> bool {
    (now.wrapping_sub(deadline) as i32) >= 0
}

impl TimerService {
    pub fn new(bus: Arc<Bus>, clock: Arc<dyn Clock>) -> Self {
        Self {
            bus,
            clock,
            slots: Mutex::new(Vec::new()),
        }
    }

    /// Register a timer. It stays idle until [`start`](Self::start).
    pub fn add(&self, timer: BusTimer) -> TimerHandle {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.push(Slot {
            timer,
            active: false,
            deadline: 0,
        });
        TimerHandle(slots.len() - 1)
    }

    /// Add and start the periodic one-second tick on [`CLOCK`].
    pub fn start_second_tick(&self) -> Result<TimerHandle> {
        let handle = self.add(BusTimer::periodic(
            0,
            CLOCK,
            clock_event::TICK_1S,
            self.clock.tick_hz(),
        ));
        self.start(handle)?;
        Ok(handle)
    }

    /// Arm a timer from now. Restarting an active timer re-arms it.
    pub fn start(&self, handle: TimerHandle) -> Result<()> {
        let now = self.clock.ticks();
        self.with_slot(handle, |slot| {
            slot.active = true;
            slot.deadline = now.wrapping_add(slot.timer.timeout.max(1));
            debug!(id = slot.timer.id, timeout = slot.timer.timeout, "timer started");
        })
    }

    /// Disarm a timer without firing it.
    pub fn stop(&self, handle: TimerHandle) -> Result<()> {
        self.with_slot(handle, |slot| slot.active = false)
    }

    /// Change the timeout. Takes effect on the next start.
    pub fn set_timeout(&self, handle: TimerHandle, ticks: u32) -> Result<()> {
        self.with_slot(handle, |slot| slot.timer.timeout = ticks)
    }

    pub fn timeout(&self, handle: TimerHandle) -> Result<u32> {
        self.with_slot(handle, |slot| slot.timer.timeout)
    }

    pub fn is_active(&self, handle: TimerHandle) -> Result<bool> {
        self.with_slot(handle, |slot| slot.active)
    }

    /// Fire every timer due at the clock's current tick.
    pub fn poll(&self) -> usize {
        self.poll_at(self.clock.ticks())
    }

    /// Fire every timer due at `now`. Returns the number fired.
    pub fn poll_at(&self, now: u32) -> usize {
        let due: Vec<BusTimer> = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots
                .iter_mut()
                .filter(|slot| slot.active && expired(now, slot.deadline))
                .map(|slot| {
                    match slot.timer.kind {
                        TimerKind::OneShot => slot.active = false,
                        TimerKind::Periodic => {
                            let period = slot.timer.timeout.max(1);
                            slot.deadline = slot.deadline.wrapping_add(period);
                            if expired(now, slot.deadline) {
                                // Fell behind; skip the missed periods.
                                slot.deadline = now.wrapping_add(period);
                            }
                        }
                    }
                    slot.timer
                })
                .collect()
        };

        for timer in &due {
            trace!(id = timer.id, target = timer.target, "timer fired");
            self.bus
                .publish_immediate(timer.target, timer.event, timer.id);
        }
        due.len()
    }

    /// Poll once per tick until `stop` is set.
    pub fn run(&self, stop: &AtomicBool) {
        let period = self.clock.tick_period();
        while !stop.load(Ordering::Acquire) {
            std::thread::sleep(period);
            self.poll();
        }
    }

    fn with_slot<R>(&self, handle: TimerHandle, f: impl FnOnce(&mut Slot) -> R) -> Result<R> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .get_mut(handle.0)
            .map(f)
            .ok_or(BusError::UnknownTimer(handle.0))
    }
}

impl std::fmt::Debug for TimerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("TimerService")
            .field("timers", &slots.len())
            .field("active", &slots.iter().filter(|s| s.active).count())
            .finish()
    }
}
