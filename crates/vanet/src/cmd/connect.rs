use std::io::{ErrorKind, Read};
use std::time::{Duration, Instant};

use tracing::debug;
use vanet_mux::channel::{in_range, CONTROL, ECHO};
use vanet_mux::{FrameType, FrameWriter, LengthMode, Parser};
use vanet_transport::UnixLink;

use crate::cmd::{parse_duration, ConnectArgs};
use crate::exit::{io_error, mux_error, transport_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_frames, OutputFormat};

const READ_POLL: Duration = Duration::from_millis(50);

pub fn run(args: ConnectArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    if !in_range(args.dlci) {
        return Err(CliError::new(USAGE, format!("DLCI {} out of range", args.dlci)));
    }

    let stream = UnixLink::connect(&args.path).map_err(|err| transport_error("connect failed", err))?;
    stream
        .set_read_timeout(Some(READ_POLL))
        .map_err(|err| transport_error("link setup failed", err))?;
    let mut reader = stream
        .try_clone()
        .map_err(|err| transport_error("link setup failed", err))?;
    let mut writer = FrameWriter::new(stream);

    // Control channel first: the board refuses every other channel until it is open.
    let mut expected = 1;
    writer
        .write_frame(CONTROL, FrameType::Sabm.with_pf(), &[])
        .map_err(|err| mux_error("send failed", err))?;
    if args.dlci != CONTROL {
        writer
            .write_frame(args.dlci, FrameType::Sabm.with_pf(), &[])
            .map_err(|err| mux_error("send failed", err))?;
        expected += 1;
    }
    if let Some(data) = &args.data {
        writer
            .send(args.dlci, data.as_bytes())
            .map_err(|err| mux_error("send failed", err))?;
        if args.dlci == ECHO {
            expected += 1;
        }
    }

    let mut parser = Parser::new(LengthMode::Combined, u32::MAX);
    let mut frames = Vec::new();
    let mut buf = [0u8; 256];
    let deadline = Instant::now() + timeout;
    while frames.len() < expected && Instant::now() < deadline {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => frames.extend(buf[..n].iter().filter_map(|&b| parser.push(b, 0))),
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(io_error("receive failed", err)),
        }
    }
    debug!(received = frames.len(), expected, "reply collection done");

    if frames.is_empty() {
        return Err(CliError::new(TIMEOUT, "no reply from link"));
    }
    print_frames(&frames, format);
    Ok(SUCCESS)
}
