//! GSM 27.010 basic-option multiplexer for the main-board serial link.
//!
//! - [`codec`]: frame constants, FCS and the transmit encoder
//! - [`Parser`]: incremental receive state machine with stale-frame timeout
//! - [`FrameWriter`]: writes frames to any `Write` link
//! - [`Mux`]: channel table and frame dispatch onto the message bus
//! - [`MuxTask`]: the task that owns the mux and serializes all transmit
//!
//! Enable the `async` feature for a `tokio_util` codec.

pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod mux;
pub mod parser;
pub mod task;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;

pub use channel::{channel_name, ChannelReport, ChannelState, ChannelTable, NUM_DLCIS};
pub use codec::{encode_frame, Frame, FrameStatus, FrameType};
pub use config::MuxConfig;
pub use error::{MuxError, Result};
pub use mux::{Mux, MuxHandle};
pub use parser::{LengthMode, Parser, ParserState, ParserStats};
pub use task::{MuxTask, RxPump};
pub use writer::FrameWriter;

#[cfg(feature = "async")]
pub use async_codec::MuxCodec;

#[cfg(test)]
pub(crate) mod testutil {
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};

    use crate::codec::Frame;
    use crate::parser::{LengthMode, Parser};

    /// Link sink whose contents the test can take while the mux owns a clone.
    #[derive(Debug, Clone, Default)]
    pub struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl SharedSink {
        pub fn take(&self) -> Vec<u8> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    pub fn parse_wire(bytes: &[u8]) -> Vec<Frame> {
        let mut parser = Parser::new(LengthMode::Combined, u32::MAX);
        bytes.iter().filter_map(|&b| parser.push(b, 0)).collect()
    }
}
