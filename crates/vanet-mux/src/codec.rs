use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{MuxError, Result};

/// Basic-option boundary flag opening and closing every frame.
pub const FLAG: u8 = 0xF9;

/// Extended address bit: set on the last octet of a field.
pub const EA: u8 = 0x01;
/// Command/response bit of the address field.
pub const CR: u8 = 0x02;
/// Poll/final bit of the control field.
pub const PF: u8 = 0x10;

/// Largest information field the frame buffer holds.
pub const MAX_INFO_LEN: usize = 128;

/// Information lengths above this need a second length octet.
pub const SHORT_LEN_MAX: usize = 127;

/// Value the FCS check reduces to for an intact frame.
pub const FCS_GOOD: u8 = 0xCF;

/// Reversed CRC-8 table (polynomial x^8 + x^2 + x + 1) used for the FCS.
pub const REVERSE_CRC_TABLE: [u8; 256] = [
    0x00, 0x91, 0xE3, 0x72, 0x07, 0x96, 0xE4, 0x75,
    0x0E, 0x9F, 0xED, 0x7C, 0x09, 0x98, 0xEA, 0x7B,
    0x1C, 0x8D, 0xFF, 0x6E, 0x1B, 0x8A, 0xF8, 0x69,
    0x12, 0x83, 0xF1, 0x60, 0x15, 0x84, 0xF6, 0x67,
    0x38, 0xA9, 0xDB, 0x4A, 0x3F, 0xAE, 0xDC, 0x4D,
    0x36, 0xA7, 0xD5, 0x44, 0x31, 0xA0, 0xD2, 0x43,
    0x24, 0xB5, 0xC7, 0x56, 0x23, 0xB2, 0xC0, 0x51,
    0x2A, 0xBB, 0xC9, 0x58, 0x2D, 0xBC, 0xCE, 0x5F,
    0x70, 0xE1, 0x93, 0x02, 0x77, 0xE6, 0x94, 0x05,
    0x7E, 0xEF, 0x9D, 0x0C, 0x79, 0xE8, 0x9A, 0x0B,
    0x6C, 0xFD, 0x8F, 0x1E, 0x6B, 0xFA, 0x88, 0x19,
    0x62, 0xF3, 0x81, 0x10, 0x65, 0xF4, 0x86, 0x17,
    0x48, 0xD9, 0xAB, 0x3A, 0x4F, 0xDE, 0xAC, 0x3D,
    0x46, 0xD7, 0xA5, 0x34, 0x41, 0xD0, 0xA2, 0x33,
    0x54, 0xC5, 0xB7, 0x26, 0x53, 0xC2, 0xB0, 0x21,
    0x5A, 0xCB, 0xB9, 0x28, 0x5D, 0xCC, 0xBE, 0x2F,
    0xE0, 0x71, 0x03, 0x92, 0xE7, 0x76, 0x04, 0x95,
    0xEE, 0x7F, 0x0D, 0x9C, 0xE9, 0x78, 0x0A, 0x9B,
    0xFC, 0x6D, 0x1F, 0x8E, 0xFB, 0x6A, 0x18, 0x89,
    0xF2, 0x63, 0x11, 0x80, 0xF5, 0x64, 0x16, 0x87,
    0xD8, 0x49, 0x3B, 0xAA, 0xDF, 0x4E, 0x3C, 0xAD,
    0xD6, 0x47, 0x35, 0xA4, 0xD1, 0x40, 0x32, 0xA3,
    0xC4, 0x55, 0x27, 0xB6, 0xC3, 0x52, 0x20, 0xB1,
    0xCA, 0x5B, 0x29, 0xB8, 0xCD, 0x5C, 0x2E, 0xBF,
    0x90, 0x01, 0x73, 0xE2, 0x97, 0x06, 0x74, 0xE5,
    0x9E, 0x0F, 0x7D, 0xEC, 0x99, 0x08, 0x7A, 0xEB,
    0x8C, 0x1D, 0x6F, 0xFE, 0x8B, 0x1A, 0x68, 0xF9,
    0x82, 0x13, 0x61, 0xF0, 0x85, 0x14, 0x66, 0xF7,
    0xA8, 0x39, 0x4B, 0xDA, 0xAF, 0x3E, 0x4C, 0xDD,
    0xA6, 0x37, 0x45, 0xD4, 0xA1, 0x30, 0x42, 0xD3,
    0xB4, 0x25, 0x57, 0xC6, 0xB3, 0x22, 0x50, 0xC1,
    0xBA, 0x2B, 0x59, 0xC8, 0xBD, 0x2C, 0x5E, 0xCF,
];

/// Frame types carried in the control field (with the PF bit masked off).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Set asynchronous balanced mode: open request.
    Sabm = 0x2F,
    /// Unnumbered acknowledgement.
    Ua = 0x63,
    /// Disconnected mode.
    Dm = 0x0F,
    /// Disconnect request.
    Disc = 0x43,
    /// Unnumbered information with header check: data.
    Uih = 0xEF,
    /// Unnumbered information.
    Ui = 0x03,
}

impl FrameType {
    /// Decode a control byte, ignoring the PF bit.
    pub fn from_control(control: u8) -> Option<Self> {
        match control & !PF {
            0x2F => Some(FrameType::Sabm),
            0x63 => Some(FrameType::Ua),
            0x0F => Some(FrameType::Dm),
            0x43 => Some(FrameType::Disc),
            0xEF => Some(FrameType::Uih),
            0x03 => Some(FrameType::Ui),
            _ => None,
        }
    }

    pub fn control(self) -> u8 {
        self as u8
    }

    /// Control byte with the PF bit set.
    pub fn with_pf(self) -> u8 {
        self as u8 | PF
    }

    pub fn name(self) -> &'static str {
        match self {
            FrameType::Sabm => "SABM",
            FrameType::Ua => "UA",
            FrameType::Dm => "DM",
            FrameType::Disc => "DISC",
            FrameType::Uih => "UIH",
            FrameType::Ui => "UI",
        }
    }
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of validating a received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameStatus {
    Valid,
    /// Header checksum mismatch.
    InvalidFcs,
    /// Information field longer than [`MAX_INFO_LEN`]; the excess was skipped.
    Oversize,
}

/// A complete frame as seen on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub address: u8,
    pub control: u8,
    pub len1: u8,
    /// Second length octet, when `len1` had EA clear.
    pub len2: Option<u8>,
    /// Decoded information field length.
    pub info_len: usize,
    /// Stored information bytes (at most [`MAX_INFO_LEN`]).
    pub info: Bytes,
    pub fcs: u8,
    pub status: FrameStatus,
}

impl Frame {
    pub fn dlci(&self) -> u8 {
        self.address >> 2
    }

    pub fn frame_type(&self) -> Option<FrameType> {
        FrameType::from_control(self.control)
    }

    pub fn pf(&self) -> bool {
        self.control & PF != 0
    }

    pub fn is_valid(&self) -> bool {
        self.status == FrameStatus::Valid
    }

    /// Header octets the FCS covers.
    pub fn header(&self) -> Vec<u8> {
        let mut header = vec![self.address, self.control, self.len1];
        header.extend(self.len2);
        header
    }
}

/// Run the FCS over `bytes` starting from `start`.
pub fn calc_fcs(bytes: &[u8], start: u8) -> u8 {
    bytes
        .iter()
        .fold(start, |fcs, &b| REVERSE_CRC_TABLE[(fcs ^ b) as usize])
}

/// Whether a received FCS matches the running value over the header.
pub fn check_fcs(calc: u8, fcs: u8) -> bool {
    REVERSE_CRC_TABLE[(calc ^ fcs) as usize] == FCS_GOOD
}

/// Address octet for `channel`: DLCI in bits 2..7, EA and C/R set.
pub fn address(channel: u8) -> u8 {
    ((channel & 0x3F) << 2) | EA | CR
}

/// Frame header (flag, address, control, one or two length octets) and FCS
/// for a payload of `len` bytes.
pub fn encode_header(channel: u8, control: u8, len: usize) -> Result<(Vec<u8>, u8)> {
    if len > MAX_INFO_LEN {
        return Err(MuxError::PayloadTooLarge {
            size: len,
            max: MAX_INFO_LEN,
        });
    }
    let mut header = Vec::with_capacity(5);
    header.push(FLAG);
    header.push(address(channel));
    header.push(control);
    if len > SHORT_LEN_MAX {
        header.push(((len & 0x7F) << 1) as u8);
        header.push(((len & 0x7F80) >> 7) as u8);
    } else {
        header.push(EA | ((len as u8) << 1));
    }
    let fcs = 0xFF - calc_fcs(&header[1..], 0xFF);
    Ok((header, fcs))
}

/// Encode a complete frame into `dst`.
///
/// Wire format:
/// ```text
/// ┌──────┬──────┬──────┬────────────┬──────────┬─────┬──────┐
/// │ 0xF9 │ addr │ ctrl │ len1 [len2]│ payload  │ fcs │ 0xF9 │
/// └──────┴──────┴──────┴────────────┴──────────┴─────┴──────┘
/// ```
pub fn encode_frame(channel: u8, control: u8, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let (header, fcs) = encode_header(channel, control, payload.len())?;
    dst.reserve(header.len() + payload.len() + 2);
    dst.put_slice(&header);
    dst.put_slice(payload);
    dst.put_u8(fcs);
    dst.put_u8(FLAG);
    Ok(())
}
