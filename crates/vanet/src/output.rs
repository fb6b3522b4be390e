use std::fmt::Write as _;
use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use vanet_mux::{channel_name, ChannelReport, Frame, FrameStatus, FrameType};
use vanet_pool::PoolStats;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
pub struct FrameOutput {
    pub dlci: u8,
    pub channel: &'static str,
    pub kind: &'static str,
    pub pf: bool,
    pub len: usize,
    pub status: &'static str,
    pub payload: String,
}

impl From<&Frame> for FrameOutput {
    fn from(frame: &Frame) -> Self {
        Self {
            dlci: frame.dlci(),
            channel: channel_name(frame.dlci()),
            kind: frame.frame_type().map_or("UNKNOWN", FrameType::name),
            pf: frame.pf(),
            len: frame.info_len,
            status: match frame.status {
                FrameStatus::Valid => "valid",
                FrameStatus::InvalidFcs => "invalid_fcs",
                FrameStatus::Oversize => "oversize",
            },
            payload: payload_preview(&frame.info),
        }
    }
}

/// Channel event seen by the link monitor.
#[derive(Serialize)]
pub struct EventOutput {
    pub dlci: u8,
    pub channel: &'static str,
    pub event: &'static str,
    pub len: usize,
    pub payload: String,
}

pub fn print_frames(frames: &[Frame], format: OutputFormat) {
    let rows: Vec<FrameOutput> = frames.iter().map(FrameOutput::from).collect();
    match format {
        OutputFormat::Json => {
            for row in &rows {
                print_json(row);
            }
        }
        OutputFormat::Table => {
            let mut table = new_table(vec!["DLCI", "CHANNEL", "TYPE", "PF", "LEN", "STATUS", "PAYLOAD"]);
            for row in &rows {
                table.add_row(vec![
                    row.dlci.to_string(),
                    row.channel.to_string(),
                    row.kind.to_string(),
                    row.pf.to_string(),
                    row.len.to_string(),
                    row.status.to_string(),
                    row.payload.clone(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for row in &rows {
                println!(
                    "dlci={} ({}) type={} pf={} len={} status={} payload={}",
                    row.dlci, row.channel, row.kind, row.pf, row.len, row.status, row.payload
                );
            }
        }
    }
}

pub fn print_event(event: &EventOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(event),
        OutputFormat::Table | OutputFormat::Pretty => println!(
            "dlci={} ({}) event={} len={} payload={}",
            event.dlci, event.channel, event.event, event.len, event.payload
        ),
    }
}

#[derive(Serialize)]
struct EncodedOutput<'a> {
    dlci: u8,
    kind: &'a str,
    len: usize,
    hex: String,
}

pub fn print_encoded(dlci: u8, kind: &str, len: usize, wire: &[u8], format: OutputFormat) {
    let out = EncodedOutput {
        dlci,
        kind,
        len,
        hex: to_hex(wire),
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let mut table = new_table(vec!["DLCI", "TYPE", "LEN", "HEX"]);
            table.add_row(vec![
                out.dlci.to_string(),
                out.kind.to_string(),
                out.len.to_string(),
                out.hex.clone(),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{}", out.hex),
    }
}

pub fn print_pools(stats: &[PoolStats], boundary_check: bool, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            #[derive(Serialize)]
            struct PoolsOutput<'a> {
                boundary_check: bool,
                pools: &'a [PoolStats],
            }
            print_json(&PoolsOutput {
                boundary_check,
                pools: stats,
            });
        }
        OutputFormat::Table => {
            let mut table = new_table(vec!["POOL", "BUFSIZE", "COUNT", "IN USE", "MAX USED", "ALLOCS", "FREES"]);
            for (index, pool) in stats.iter().enumerate() {
                table.add_row(vec![
                    index.to_string(),
                    pool.bufsize.to_string(),
                    pool.count.to_string(),
                    pool.in_use.to_string(),
                    pool.max_used.to_string(),
                    pool.allocs.to_string(),
                    pool.frees.to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for (index, pool) in stats.iter().enumerate() {
                println!(
                    "pool {index}: {} x {} bytes, in use {}, max used {}",
                    pool.count, pool.bufsize, pool.in_use, pool.max_used
                );
            }
        }
    }
}

pub fn print_report(report: &[ChannelReport], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Table => {
            let mut table = new_table(vec!["DLCI", "CHANNEL", "SUBSCRIBED", "STATE"]);
            for row in report {
                table.add_row(vec![
                    row.dlci.to_string(),
                    row.name.to_string(),
                    if row.subscribed { "Yes" } else { "No" }.to_string(),
                    row.state.label().to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for row in report {
                println!(
                    "{:>4} {:<10} {:<3} {}",
                    row.dlci,
                    row.name,
                    if row.subscribed { "Yes" } else { "No" },
                    row.state
                );
            }
        }
    }
}

pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

pub fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_is_lowercase_pairs() {
        assert_eq!(to_hex(&[0xF9, 0x03, 0x0a]), "f9030a");
        assert_eq!(to_hex(&[]), "");
    }

    #[test]
    fn binary_payload_is_summarized() {
        assert_eq!(payload_preview(b"ping"), "ping");
        assert_eq!(payload_preview(&[0xff, 0xfe]), "<binary 2 bytes>");
    }
}
