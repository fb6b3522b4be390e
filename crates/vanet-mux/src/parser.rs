use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use vanet_transport::CircBuffer;

use crate::codec::{calc_fcs, check_fcs, Frame, FrameStatus, EA, FLAG, MAX_INFO_LEN};

/// How a two-octet length field is decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthMode {
    /// `(len1 >> 1) | (len2 << 7)`: the inverse of what the encoder emits.
    #[default]
    Combined,
    /// Firmware length rule: only `len1 >> 1` counts and the second octet is
    /// read and ignored. Parsing then continues with the information field;
    /// the firmware's stall in the second length state until the frame
    /// timeout is not reproduced.
    FirstByteOnly,
}

/// Receive state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParserState {
    OpenFlag,
    AddressField,
    ControlField,
    LenByte1,
    LenByte2,
    Information,
    FcsField,
    CloseFlag,
}

/// Parser counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParserStats {
    pub frames: u32,
    pub fcs_errors: u32,
    pub oversize: u32,
    pub bad_close: u32,
    pub timeouts: u32,
}

/// Incremental 27.010 frame decoder.
///
/// Bytes can arrive in any chunking; a frame is produced once its closing
/// flag is seen. A frame left incomplete for longer than the timeout is
/// discarded when the next byte arrives (or on [`Parser::expire`]).
#[derive(Debug)]
pub struct Parser {
    state: ParserState,
    mode: LengthMode,
    timeout_ticks: u32,
    start_tick: u32,
    address: u8,
    control: u8,
    len1: u8,
    len2: Option<u8>,
    info_len: usize,
    received: usize,
    info: BytesMut,
    fcs: u8,
    stats: ParserStats,
}

impl Parser {
    pub fn new(mode: LengthMode, timeout_ticks: u32) -> Self {
        Self {
            state: ParserState::OpenFlag,
            mode,
            timeout_ticks,
            start_tick: 0,
            address: 0,
            control: 0,
            len1: 0,
            len2: None,
            info_len: 0,
            received: 0,
            info: BytesMut::with_capacity(MAX_INFO_LEN),
            fcs: 0,
            stats: ParserStats::default(),
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn mode(&self) -> LengthMode {
        self.mode
    }

    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    /// Drop any partial frame.
    pub fn reset(&mut self) {
        self.state = ParserState::OpenFlag;
        self.address = 0;
        self.control = 0;
        self.len1 = 0;
        self.len2 = None;
        self.info_len = 0;
        self.received = 0;
        self.info.clear();
        self.fcs = 0;
    }

    /// Discard a stale partial frame. Returns `true` if one was dropped.
    pub fn expire(&mut self, now: u32) -> bool {
        if self.state != ParserState::OpenFlag
            && now.wrapping_sub(self.start_tick) > self.timeout_ticks
        {
            debug!(state = ?self.state, "frame timeout, discarding partial frame");
            self.stats.timeouts += 1;
            self.reset();
            true
        } else {
            false
        }
    }

    /// Feed one byte received at tick `now`.
    pub fn push(&mut self, byte: u8, now: u32) -> Option<Frame> {
        self.expire(now);

        match self.state {
            ParserState::OpenFlag => {
                if byte == FLAG {
                    self.start_tick = now;
                    self.state = ParserState::AddressField;
                }
            }
            ParserState::AddressField => {
                // A second flag here is the tail of a frame we lost sync on.
                if byte != FLAG {
                    self.address = byte;
                    self.state = ParserState::ControlField;
                }
            }
            ParserState::ControlField => {
                self.control = byte;
                self.state = ParserState::LenByte1;
            }
            ParserState::LenByte1 => {
                self.len1 = byte;
                self.len2 = None;
                if byte & EA != 0 {
                    self.begin_information((byte >> 1) as usize);
                } else {
                    self.state = ParserState::LenByte2;
                }
            }
            ParserState::LenByte2 => {
                self.len2 = Some(byte);
                let len = match self.mode {
                    LengthMode::Combined => ((self.len1 >> 1) as usize) | ((byte as usize) << 7),
                    LengthMode::FirstByteOnly => (self.len1 >> 1) as usize,
                };
                self.begin_information(len);
            }
            ParserState::Information => {
                if self.received < MAX_INFO_LEN {
                    self.info.extend_from_slice(&[byte]);
                }
                self.received += 1;
                if self.received == self.info_len {
                    self.state = ParserState::FcsField;
                }
            }
            ParserState::FcsField => {
                self.fcs = byte;
                self.state = ParserState::CloseFlag;
            }
            ParserState::CloseFlag => {
                let frame = (byte == FLAG).then(|| self.finish());
                if frame.is_none() {
                    debug!(byte, "missing close flag, dropping frame");
                    self.stats.bad_close += 1;
                }
                self.reset();
                return frame;
            }
        }
        None
    }

    /// Scan the unread bytes of `ring` without consuming them, then consume
    /// exactly the bytes that were processed. Stops after the first complete
    /// frame so the caller can dispatch it before parsing further.
    pub fn find_frame(&mut self, ring: &CircBuffer, now: u32) -> (usize, Option<Frame>) {
        let mut iter = ring.begin();
        let mut processed = 0;
        let mut frame = None;
        while let Some(byte) = ring.peek_byte(iter) {
            iter = ring.advance(iter, 1);
            processed += 1;
            if let Some(found) = self.push(byte, now) {
                frame = Some(found);
                break;
            }
        }
        ring.consume(processed);
        trace!(processed, state = ?self.state, "scanned receive ring");
        (processed, frame)
    }

    fn begin_information(&mut self, len: usize) {
        self.info_len = len;
        self.received = 0;
        self.info.clear();
        self.state = if len == 0 {
            ParserState::FcsField
        } else {
            ParserState::Information
        };
    }

    fn finish(&mut self) -> Frame {
        let mut frame = Frame {
            address: self.address,
            control: self.control,
            len1: self.len1,
            len2: self.len2,
            info_len: self.info_len,
            info: self.info.split().freeze(),
            fcs: self.fcs,
            status: FrameStatus::Valid,
        };
        frame.status = if frame.info_len > MAX_INFO_LEN {
            self.stats.oversize += 1;
            FrameStatus::Oversize
        } else if !check_fcs(calc_fcs(&frame.header(), 0xFF), frame.fcs) {
            self.stats.fcs_errors += 1;
            FrameStatus::InvalidFcs
        } else {
            self.stats.frames += 1;
            FrameStatus::Valid
        };
        frame
    }
}
