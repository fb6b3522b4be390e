//! Events the mux publishes.

/// Published on a DLCI source when the peer opens the channel.
pub const CONNECT: u16 = 0x0001;
/// Published on a DLCI source when the peer closes the channel.
pub const DISCONNECT: u16 = 0x0002;
/// Published on a DLCI source with the information field of a UIH frame.
pub const DATA_RCVD: u16 = 0x0004;

/// Internal: bytes arrived from the UART.
pub const UART_RX: u16 = 0x1000;
/// Internal: the UART transmitter drained.
pub const UART_TX: u16 = 0x2000;
/// Internal: transmit the payload on the DLCI in the immediate byte.
pub const DLCI_SEND: u16 = 0x4000;
