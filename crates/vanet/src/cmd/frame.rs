use vanet_mux::{FrameType, FrameWriter, LengthMode, Parser};

use crate::cmd::{parse_hex, DecodeArgs, EncodeArgs};
use crate::exit::{mux_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_encoded, print_frames, OutputFormat};

pub fn encode(args: EncodeArgs, format: OutputFormat) -> CliResult<i32> {
    let payload = match (&args.data, &args.hex) {
        (Some(data), _) => data.as_bytes().to_vec(),
        (None, Some(hex)) => parse_hex(hex)?,
        (None, None) => Vec::new(),
    };
    let kind = FrameType::from(args.kind);
    let control = if args.pf { kind.with_pf() } else { kind.control() };

    let mut writer = FrameWriter::new(Vec::new());
    writer
        .write_frame(args.dlci, control, &payload)
        .map_err(|err| mux_error("encode failed", err))?;

    print_encoded(
        args.dlci,
        kind.name(),
        payload.len(),
        writer.get_ref(),
        format,
    );
    Ok(SUCCESS)
}

pub fn decode(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let mode = if args.legacy_length {
        LengthMode::FirstByteOnly
    } else {
        LengthMode::Combined
    };
    let mut parser = Parser::new(mode, u32::MAX);
    let mut frames = Vec::new();
    for chunk in &args.hex {
        for byte in parse_hex(chunk)? {
            frames.extend(parser.push(byte, 0));
        }
    }

    if frames.is_empty() {
        return Err(CliError::new(DATA_INVALID, "no complete frame in input"));
    }
    print_frames(&frames, format);
    Ok(SUCCESS)
}
