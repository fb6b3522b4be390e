#![cfg(feature = "cli")]

use std::process::{Command, Output};

fn vanet(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_vanet"))
        .args(["--log-level", "error"])
        .args(args)
        .output()
        .expect("vanet should run")
}

#[test]
fn encode_sabm_on_control_channel() {
    let output = vanet(&[
        "--format", "pretty", "frame", "encode", "--dlci", "0", "--type", "sabm", "--pf",
    ]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "f9033f011cf9");
}

#[test]
fn encode_json_reports_length() {
    let output = vanet(&["--format", "json", "frame", "encode", "--dlci", "5", "--data", "ping"]);
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["dlci"], 5);
    assert_eq!(value["kind"], "UIH");
    assert_eq!(value["len"], 4);
}

#[test]
fn encode_oversize_payload_is_data_invalid() {
    let data = "x".repeat(129);
    let output = vanet(&["frame", "encode", "--data", &data]);
    assert_eq!(output.status.code(), Some(60));
}

#[test]
fn decode_split_hex_arguments() {
    let output = vanet(&["--format", "json", "frame", "decode", "f9 03 73", "01 d7 f9"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let value: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(value["kind"], "UA");
    assert_eq!(value["pf"], true);
    assert_eq!(value["status"], "valid");
}

#[test]
fn decode_flags_bad_checksum() {
    let output = vanet(&["--format", "json", "frame", "decode", "f9033f0100f9"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("\"status\":\"invalid_fcs\""));
}

#[test]
fn decode_without_complete_frame_fails() {
    let output = vanet(&["frame", "decode", "f9033f"]);
    assert_eq!(output.status.code(), Some(60));
    assert!(String::from_utf8_lossy(&output.stderr).contains("no complete frame"));
}

#[test]
fn pools_default_table() {
    let output = vanet(&["--format", "json", "pools", "--alloc", "10,100"]);
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["boundary_check"], true);
    let pools = value["pools"].as_array().unwrap();
    assert_eq!(pools.len(), 3);
    assert_eq!(pools[0]["bufsize"], 64);
    assert_eq!(pools[0]["in_use"], 1);
    assert_eq!(pools[1]["in_use"], 1);
}

#[test]
fn pools_exhaustion_fails() {
    let output = vanet(&["pools", "--alloc", "4000"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn version_prints_name() {
    let output = vanet(&["version"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("vanet "));
}
