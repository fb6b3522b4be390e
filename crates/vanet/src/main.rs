mod cmd;
mod config;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "vanet", version, about = "VANET service core diagnostics")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    match cmd::run(cli.command, format) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::FrameCommand;

    #[test]
    fn parses_frame_encode() {
        let cli = Cli::try_parse_from([
            "vanet", "frame", "encode", "--dlci", "2", "--type", "sabm", "--pf",
        ])
        .expect("encode args should parse");
        match cli.command {
            Command::Frame(FrameCommand::Encode(args)) => {
                assert_eq!(args.dlci, 2);
                assert!(args.pf);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "vanet", "frame", "encode", "--data", "x", "--hex", "00",
        ])
        .expect_err("conflicting args should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn decode_requires_input() {
        let err = Cli::try_parse_from(["vanet", "frame", "decode"]).expect_err("needs hex");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn parses_link_channels() {
        let cli = Cli::try_parse_from([
            "vanet", "link", "/tmp/vanet.sock", "--channels", "0,5", "--count", "3",
        ])
        .expect("link args should parse");
        match cli.command {
            Command::Link(args) => {
                assert_eq!(args.channels, Some(vec![0, 5]));
                assert_eq!(args.count, Some(3));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
