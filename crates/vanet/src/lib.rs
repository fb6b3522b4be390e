//! Service core of the VANET telemetry daughterboard.
//!
//! The board talks to the vehicle's main board over one serial link,
//! multiplexed into logical channels with GSM 27.010 framing. Received
//! channel data is routed to application tasks through a publish/subscribe
//! bus whose messages live in fixed-size buffer pools.
//!
//! # Crate Structure
//!
//! - [`pool`]: size-class buffer pools with boundary tags
//! - [`transport`]: interrupt-safe ring buffer and the hosted serial link
//! - [`bus`]: message bus, mailboxes, clocks and timers
//! - [`mux`]: 27.010 codec, parser, channel table and mux task

/// Re-export pool allocator types.
pub mod pool {
    pub use vanet_pool::*;
}

/// Re-export transport types.
pub mod transport {
    pub use vanet_transport::*;
}

/// Re-export message bus types.
pub mod bus {
    pub use vanet_tkvs::*;
}

/// Re-export multiplexer types.
pub mod mux {
    pub use vanet_mux::*;
}
