use std::io::{ErrorKind, Write};

use tracing::trace;

use crate::codec::{encode_header, FrameType, FLAG};
use crate::error::{MuxError, Result};

/// Writes complete frames to any `Write` link.
///
/// A frame goes out as three writes (header, information, FCS and closing
/// flag) followed by a flush, so the information field is never copied.
pub struct FrameWriter<T> {
    inner: T,
    frames: u32,
}

impl<T: Write> FrameWriter<T> {
    pub fn new(inner: T) -> Self {
        Self { inner, frames: 0 }
    }

    /// Write one frame on `channel` with raw control octet `control`.
    pub fn write_frame(&mut self, channel: u8, control: u8, payload: &[u8]) -> Result<()> {
        let (header, fcs) = encode_header(channel, control, payload.len())?;
        self.write_all(&header)?;
        self.write_all(payload)?;
        self.write_all(&[fcs, FLAG])?;
        self.flush()?;
        self.frames = self.frames.wrapping_add(1);
        trace!(channel, control, len = payload.len(), "frame written");
        Ok(())
    }

    /// Send a UIH data frame.
    pub fn send(&mut self, channel: u8, payload: &[u8]) -> Result<()> {
        self.write_frame(channel, FrameType::Uih.control(), payload)
    }

    /// Flush the underlying link.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(MuxError::Io(err)),
            }
        }
    }

    /// Frames written so far.
    pub fn frames_written(&self) -> u32 {
        self.frames
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            match self.inner.write(buf) {
                Ok(0) => return Err(MuxError::ConnectionClosed),
                Ok(n) => buf = &buf[n..],
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(MuxError::Io(err)),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::codec::{FrameStatus, PF};
    use crate::parser::{LengthMode, Parser};

    fn parse_all(bytes: &[u8]) -> Vec<crate::codec::Frame> {
        let mut parser = Parser::new(LengthMode::Combined, 64);
        bytes.iter().filter_map(|&b| parser.push(b, 0)).collect()
    }

    #[test]
    fn frames_round_trip_through_parser() {
        let mut writer = FrameWriter::new(Vec::new());
        for len in [0usize, 1, 127, 128] {
            let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();
            writer.send(3, &payload).unwrap();
        }
        let frames = parse_all(writer.get_ref());
        assert_eq!(frames.len(), 4);
        for (frame, len) in frames.iter().zip([0usize, 1, 127, 128]) {
            assert_eq!(frame.status, FrameStatus::Valid);
            assert_eq!(frame.dlci(), 3);
            assert_eq!(frame.info.len(), len);
        }
        assert_eq!(writer.frames_written(), 4);
    }

    #[test]
    fn control_frame_keeps_pf() {
        let mut writer = FrameWriter::new(Vec::new());
        writer.write_frame(0, FrameType::Ua.with_pf(), &[]).unwrap();
        let frames = parse_all(&writer.into_inner());
        assert_eq!(frames[0].frame_type(), Some(FrameType::Ua));
        assert_eq!(frames[0].control & PF, PF);
    }

    #[test]
    fn payload_too_large_rejected() {
        let mut writer = FrameWriter::new(Vec::new());
        let err = writer.send(1, &[0u8; 129]).unwrap_err();
        assert!(matches!(err, MuxError::PayloadTooLarge { size: 129, .. }));
        assert!(writer.get_ref().is_empty());
    }

    #[test]
    fn three_writes_then_flush() {
        let sink = CountingWriter::default();
        let writes = Arc::clone(&sink.writes);
        let flushes = Arc::clone(&sink.flushes);
        let mut writer = FrameWriter::new(sink);
        writer.send(2, b"payload").unwrap();
        assert_eq!(writes.load(Ordering::SeqCst), 3);
        assert_eq!(flushes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_payload_skips_information_write() {
        let sink = CountingWriter::default();
        let writes = Arc::clone(&sink.writes);
        let mut writer = FrameWriter::new(sink);
        writer.write_frame(0, FrameType::Disc.with_pf(), &[]).unwrap();
        assert_eq!(writes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn handles_interrupted_and_would_block() {
        let mut writer = FrameWriter::new(FlakyWriter {
            fail_next: true,
            kind: ErrorKind::Interrupted,
            data: Vec::new(),
        });
        writer.send(1, b"retry").unwrap();
        assert_eq!(parse_all(&writer.into_inner().data).len(), 1);

        let mut writer = FrameWriter::new(FlakyWriter {
            fail_next: true,
            kind: ErrorKind::WouldBlock,
            data: Vec::new(),
        });
        writer.send(1, b"retry").unwrap();
        assert_eq!(parse_all(&writer.into_inner().data).len(), 1);
    }

    #[test]
    fn connection_closed_when_write_returns_zero() {
        let mut writer = FrameWriter::new(ZeroWriter);
        let err = writer.send(1, b"x").unwrap_err();
        assert!(matches!(err, MuxError::ConnectionClosed));
    }

    #[test]
    fn other_errors_propagate() {
        let mut writer = FrameWriter::new(FlakyWriter {
            fail_next: true,
            kind: ErrorKind::BrokenPipe,
            data: Vec::new(),
        });
        let err = writer.send(1, b"x").unwrap_err();
        assert!(matches!(err, MuxError::Io(ref e) if e.kind() == ErrorKind::BrokenPipe));
    }

    #[derive(Default)]
    struct CountingWriter {
        writes: Arc<AtomicUsize>,
        flushes: Arc<AtomicUsize>,
    }

    impl Write for CountingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FlakyWriter {
        fail_next: bool,
        kind: ErrorKind,
        data: Vec<u8>,
    }

    impl Write for FlakyWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail_next {
                self.fail_next = false;
                return Err(io::Error::new(self.kind, "flaky"));
            }
            // Short writes exercise the resume path.
            let n = buf.len().min(4);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
