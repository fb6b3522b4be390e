//! Byte-level plumbing between the daughterboard and the main board.
//!
//! - [`CircBuffer`]: interrupt-safe byte ring with non-consuming iterators
//! - [`LinkStream`] / [`UnixLink`]: the serial link, carried over a Unix
//!   domain socket on hosted builds
//! - [`SerialTx`] / [`TxPump`]: transmit ring with bounded drain waits
//!
//! Everything above (framing, the message bus) builds on these types.

pub mod circ;
pub mod config;
pub mod error;
pub mod link;
pub mod serial;

#[cfg(unix)]
pub mod uds;

pub use circ::{CircBuffer, CircIter};
pub use config::{LinkConfig, DEFAULT_RX_RING, DEFAULT_TX_RING};
pub use error::{Result, TransportError};
pub use link::LinkStream;
pub use serial::{SerialTx, TxPump};

#[cfg(unix)]
pub use uds::UnixLink;
