use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use vanet_mux::FrameType;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod connect;
pub mod frame;
pub mod link;
pub mod pools;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Encode or decode 27.010 frames.
    #[command(subcommand)]
    Frame(FrameCommand),
    /// Show the buffer pool table.
    Pools(PoolsArgs),
    /// Serve the daughterboard side of the mux on a Unix socket.
    Link(LinkArgs),
    /// Act as the main board: open channels on a link and print replies.
    Connect(ConnectArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Frame(FrameCommand::Encode(args)) => frame::encode(args, format),
        Command::Frame(FrameCommand::Decode(args)) => frame::decode(args, format),
        Command::Pools(args) => pools::run(args, format),
        Command::Link(args) => link::run(args, format),
        Command::Connect(args) => connect::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Subcommand, Debug)]
pub enum FrameCommand {
    /// Print the wire bytes of one frame as hex.
    Encode(EncodeArgs),
    /// Parse hex wire bytes and print every complete frame.
    Decode(DecodeArgs),
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum FrameKind {
    Sabm,
    Ua,
    Dm,
    Disc,
    Uih,
    Ui,
}

impl From<FrameKind> for FrameType {
    fn from(kind: FrameKind) -> Self {
        match kind {
            FrameKind::Sabm => FrameType::Sabm,
            FrameKind::Ua => FrameType::Ua,
            FrameKind::Dm => FrameType::Dm,
            FrameKind::Disc => FrameType::Disc,
            FrameKind::Uih => FrameType::Uih,
            FrameKind::Ui => FrameType::Ui,
        }
    }
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Channel (DLCI).
    #[arg(long, short = 'd', default_value = "0")]
    pub dlci: u8,
    /// Frame type.
    #[arg(long = "type", short = 't', value_enum, default_value = "uih")]
    pub kind: FrameKind,
    /// Set the poll/final bit.
    #[arg(long)]
    pub pf: bool,
    /// String payload.
    #[arg(long, conflicts_with = "hex")]
    pub data: Option<String>,
    /// Hex payload.
    #[arg(long, conflicts_with = "data")]
    pub hex: Option<String>,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Wire bytes as hex. Several arguments are one continuous stream.
    #[arg(required = true)]
    pub hex: Vec<String>,
    /// Decode two-octet lengths from the first octet only.
    #[arg(long)]
    pub legacy_length: bool,
}

#[derive(Args, Debug)]
pub struct PoolsArgs {
    /// Board configuration file (JSON).
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Allocate buffers of these sizes before reporting (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub alloc: Vec<usize>,
}

#[derive(Args, Debug)]
pub struct LinkArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Board configuration file (JSON).
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// DLCIs to monitor (comma-separated). Default: all.
    #[arg(long, value_delimiter = ',')]
    pub channels: Option<Vec<u8>>,
    /// Exit after printing N channel events.
    #[arg(long)]
    pub count: Option<usize>,
    /// Print the channel table on exit.
    #[arg(long)]
    pub report: bool,
}

#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Channel to open after the control channel.
    #[arg(long, short = 'd', default_value = "5")]
    pub dlci: u8,
    /// Data to send once the channel is open.
    #[arg(long)]
    pub data: Option<String>,
    /// How long to collect replies (e.g. 2s, 500ms).
    #[arg(long, default_value = "2s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(num) => (num, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

pub(crate) fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let digits: Vec<u8> = input
        .bytes()
        .filter(|b| !b.is_ascii_whitespace() && *b != b':')
        .collect();
    if digits.len() % 2 != 0 {
        return Err(CliError::new(
            crate::exit::DATA_INVALID,
            format!("odd number of hex digits: {input}"),
        ));
    }
    digits
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or_else(|| {
                    CliError::new(crate::exit::DATA_INVALID, format!("invalid hex: {input}"))
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn parse_hex_accepts_separators() {
        assert_eq!(parse_hex("f9 03:3F").unwrap(), vec![0xF9, 0x03, 0x3F]);
        assert!(parse_hex("f90").is_err());
        assert!(parse_hex("zz").is_err());
    }
}
