use serde::{Deserialize, Serialize};

use crate::parser::LengthMode;

/// Mux task tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxConfig {
    /// Decoding of two-octet length fields. Defaults to
    /// [`LengthMode::Combined`]; set [`LengthMode::FirstByteOnly`] for a peer
    /// that follows the firmware length rule.
    pub length_mode: LengthMode,
    /// A partial frame older than this is discarded.
    pub frame_timeout_ms: u32,
    /// Termios port carrying the link to the main board.
    pub termios_port: u8,
    /// Depth of the mux task mailbox.
    pub mailbox_depth: usize,
    /// Receive ring length in bytes.
    pub rx_ring: usize,
    /// Loop data received on the echo DLCI back to the sender.
    pub echo: bool,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            length_mode: LengthMode::default(),
            frame_timeout_ms: 2000,
            termios_port: 0,
            mailbox_depth: 32,
            rx_ring: vanet_transport::DEFAULT_RX_RING,
            echo: true,
        }
    }
}
