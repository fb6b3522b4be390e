//! Bus source ids and the events each source publishes.
//!
//! The numbering is shared with the main board, so it is fixed here rather
//! than configurable.

/// Clock and bus timers. See [`crate::timer`].
pub const CLOCK: u8 = 0;

/// Termios service control traffic.
pub const TERMIOS_INTERNAL: u8 = 1;
/// First termios port. Port `n` publishes on `TERMIOS_PORT_START + n`.
pub const TERMIOS_PORT_START: u8 = 2;
/// Number of termios ports.
pub const TERMIOS_PORT_COUNT: u8 = 4;
pub const TERMIOS_PORT_END: u8 = TERMIOS_PORT_START + TERMIOS_PORT_COUNT - 1;

/// Mux service control traffic.
pub const MUX_INTERNAL: u8 = TERMIOS_PORT_END + 1;
/// First DLCI source. DLCI `n` publishes on `MUX_DLCI_START + n`.
pub const MUX_DLCI_START: u8 = MUX_INTERNAL + 1;
/// Number of DLCI sources.
pub const MUX_DLCI_COUNT: u8 = 6;
pub const MUX_DLCI_END: u8 = MUX_DLCI_START + MUX_DLCI_COUNT - 1;

/// Console service.
pub const STI_INTERNAL: u8 = MUX_DLCI_END + 1;
/// Pin change notifications.
pub const PIN: u8 = STI_INTERNAL + 1;

/// First application source.
pub const APP_START: u8 = PIN + 1;
pub const GPS: u8 = APP_START;
pub const PDG: u8 = APP_START + 1;
pub const ACCEL: u8 = APP_START + 2;

/// Match every event of a source.
pub const ALL_EVENTS: u16 = 0xFFFF;

/// Events published on [`CLOCK`].
pub mod clock_event {
    pub const TICK_1S: u16 = 0x0001;
    pub const UPDATE: u16 = 0x0002;
    pub const TIMER: u16 = 0x0004;
}

/// Events published on a termios port source.
pub mod termios_event {
    pub const INPUT_READY: u16 = 0x0001;
    /// Raw bytes received; the payload carries them.
    pub const INPUT_RX: u16 = 0x0002;
    pub const INPUT_SIGNAL: u16 = 0x0004;
}

/// Source id for a termios port, if the port exists.
pub fn termios_port(port: u8) -> Option<u8> {
    (port < TERMIOS_PORT_COUNT).then(|| TERMIOS_PORT_START + port)
}

/// Source id for a DLCI, if the DLCI exists.
pub fn mux_dlci(dlci: u8) -> Option<u8> {
    (dlci < MUX_DLCI_COUNT).then(|| MUX_DLCI_START + dlci)
}

/// Human-readable source name.
pub fn source_name(source: u8) -> &'static str {
    match source {
        CLOCK => "CLOCK",
        TERMIOS_INTERNAL => "TERMIOS",
        TERMIOS_PORT_START..=TERMIOS_PORT_END => "TERMIOS_PORT",
        MUX_INTERNAL => "MUX",
        MUX_DLCI_START..=MUX_DLCI_END => "MUX_DLCI",
        STI_INTERNAL => "STI",
        PIN => "PIN",
        GPS => "GPS",
        PDG => "PDG",
        ACCEL => "ACCEL",
        _ => "APP",
    }
}
