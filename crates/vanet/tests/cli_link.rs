#![cfg(all(unix, feature = "cli"))]

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/vanetcli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let start = Instant::now();
    while !path.exists() {
        if start.elapsed() >= timeout {
            panic!("socket never appeared");
        }
        thread::sleep(Duration::from_millis(25));
    }
}

#[test]
fn connect_opens_channels_and_gets_echo() {
    let dir = unique_temp_dir("echo");
    let sock_path = dir.join("link.sock");

    let server = Command::new(env!("CARGO_BIN_EXE_vanet"))
        .args(["--log-level", "error", "--format", "json", "link"])
        .arg(&sock_path)
        .args(["--count", "3"])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("link command should start");

    wait_for_socket(&sock_path, Duration::from_secs(3));

    let client = Command::new(env!("CARGO_BIN_EXE_vanet"))
        .args(["--log-level", "error", "--format", "json", "connect"])
        .arg(&sock_path)
        .args(["--dlci", "5", "--data", "ping", "--timeout", "3s"])
        .output()
        .expect("connect should run");

    assert!(client.status.success());
    let replies: Vec<serde_json::Value> = String::from_utf8_lossy(&client.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(replies.len(), 3);
    assert_eq!(replies[0]["kind"], "UA");
    assert_eq!(replies[0]["dlci"], 0);
    assert_eq!(replies[1]["kind"], "UA");
    assert_eq!(replies[1]["dlci"], 5);
    assert_eq!(replies[2]["kind"], "UIH");
    assert_eq!(replies[2]["payload"], "ping");

    let server = server.wait_with_output().expect("link should exit");
    assert!(server.status.success());
    let events = String::from_utf8_lossy(&server.stdout);
    assert!(events.contains("\"event\":\"connect\""));
    assert!(events.contains("\"payload\":\"ping\""));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn connect_without_server_is_transport_error() {
    let dir = unique_temp_dir("missing");
    let output = Command::new(env!("CARGO_BIN_EXE_vanet"))
        .args(["--log-level", "error", "connect"])
        .arg(dir.join("absent.sock"))
        .output()
        .expect("connect should run");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("connect failed"));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn connect_rejects_out_of_range_dlci() {
    let output = Command::new(env!("CARGO_BIN_EXE_vanet"))
        .args(["connect", "/tmp/unused.sock", "--dlci", "9"])
        .output()
        .expect("connect should run");
    assert_eq!(output.status.code(), Some(64));
}
