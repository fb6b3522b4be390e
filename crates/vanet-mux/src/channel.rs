//! DLCI assignments and per-channel state.
//!
//! DLCI 0 is the control channel: no other channel can open until it is.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

/// Control channel.
pub const CONTROL: u8 = 0;
/// Time synchronisation with the main board.
pub const TIMESYNC: u8 = 1;
/// Unified command channel.
pub const UNIFIED: u8 = 2;
/// Raw accelerometer telemetry.
pub const ACCEL_RAW: u8 = 3;
/// Raw GPS telemetry.
pub const GPS_RAW: u8 = 4;
/// Loopback channel answered by the mux task itself.
pub const ECHO: u8 = 5;
/// Number of DLCIs, including the control channel.
pub const NUM_DLCIS: u8 = 6;

/// Human-readable name for a DLCI.
pub fn channel_name(dlci: u8) -> &'static str {
    match dlci {
        CONTROL => "CONTROL",
        TIMESYNC => "TIMESYNC",
        UNIFIED => "UNIFIED",
        ACCEL_RAW => "ACCEL_RAW",
        GPS_RAW => "GPS_RAW",
        ECHO => "ECHO",
        _ => "UNKNOWN",
    }
}

/// Connection state of one DLCI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ChannelState {
    Closed = 0,
    Opened = 1,
    OpenPending = 2,
    ClosePending = 3,
}

impl ChannelState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => ChannelState::Opened,
            2 => ChannelState::OpenPending,
            3 => ChannelState::ClosePending,
            _ => ChannelState::Closed,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ChannelState::Closed => "Closed",
            ChannelState::Opened => "Opened",
            ChannelState::OpenPending => "Open Pending",
            ChannelState::ClosePending => "Close Pending",
        }
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Channel states shared between the mux task and senders on other tasks.
#[derive(Debug)]
pub struct ChannelTable {
    states: [AtomicU8; NUM_DLCIS as usize],
}

impl Default for ChannelTable {
    fn default() -> Self {
        Self {
            states: std::array::from_fn(|_| AtomicU8::new(ChannelState::Closed as u8)),
        }
    }
}

impl ChannelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// State of `dlci`; out-of-range DLCIs read as closed.
    pub fn get(&self, dlci: u8) -> ChannelState {
        self.states
            .get(dlci as usize)
            .map(|s| ChannelState::from_raw(s.load(Ordering::Acquire)))
            .unwrap_or(ChannelState::Closed)
    }

    /// Set the state of `dlci`. Returns `false` for an out-of-range DLCI.
    pub fn set(&self, dlci: u8, state: ChannelState) -> bool {
        match self.states.get(dlci as usize) {
            Some(slot) => {
                slot.store(state as u8, Ordering::Release);
                true
            }
            None => false,
        }
    }

    pub fn is_open(&self, dlci: u8) -> bool {
        self.get(dlci) == ChannelState::Opened
    }

    /// Close every channel.
    pub fn reset(&self) {
        for slot in &self.states {
            slot.store(ChannelState::Closed as u8, Ordering::Release);
        }
    }
}

/// One row of [`Mux::channel_report`](crate::Mux::channel_report).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelReport {
    pub dlci: u8,
    pub name: &'static str,
    pub subscribed: bool,
    pub state: ChannelState,
}

pub fn in_range(dlci: u8) -> bool {
    dlci < NUM_DLCIS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_starts_closed() {
        let table = ChannelTable::new();
        for dlci in 0..NUM_DLCIS {
            assert_eq!(table.get(dlci), ChannelState::Closed);
        }
    }

    #[test]
    fn out_of_range_is_ignored() {
        let table = ChannelTable::new();
        assert!(!table.set(NUM_DLCIS, ChannelState::Opened));
        assert_eq!(table.get(NUM_DLCIS), ChannelState::Closed);
        assert!(!in_range(NUM_DLCIS));
    }

    #[test]
    fn reset_closes_everything() {
        let table = ChannelTable::new();
        table.set(CONTROL, ChannelState::Opened);
        table.set(ECHO, ChannelState::ClosePending);
        table.reset();
        assert!(!table.is_open(CONTROL));
        assert_eq!(table.get(ECHO), ChannelState::Closed);
    }

    #[test]
    fn names() {
        assert_eq!(channel_name(ECHO), "ECHO");
        assert_eq!(channel_name(9), "UNKNOWN");
        assert_eq!(ChannelState::OpenPending.to_string(), "Open Pending");
    }
}
