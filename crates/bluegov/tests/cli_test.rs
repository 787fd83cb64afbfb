//! Integration tests for the `bluegov` CLI binary.
//!
//! Radio-bound commands run against the simulated radio described in
//! `fixtures/radio.toml`; nothing touches real hardware or the user's
//! configuration.
#![allow(clippy::unwrap_used)]

use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

const THERMOMETER_BATTERY: &str = "/11:22:33:44:55:66/AA:BB:CC:DD:EE:FF/2a19";

// ── Helpers ─────────────────────────────────────────────────────────

fn fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/radio.toml")
}

/// Build a [`Command`] for the `bluegov` binary with env isolation.
///
/// Clears all `BLUEGOV_*` env vars and points config directories at a
/// nonexistent path so tests never touch the user's real configuration.
fn bluegov_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("bluegov");
    cmd.env("HOME", "/tmp/bluegov-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/bluegov-cli-test-nonexistent")
        .env("BLUEGOV_CONFIG", "/tmp/bluegov-cli-test-nonexistent/config.toml")
        .env_remove("BLUEGOV_FIXTURE")
        .env_remove("BLUEGOV_OUTPUT")
        .env_remove("RUST_LOG");
    cmd
}

/// Same as [`bluegov_cmd`] with the test radio attached.
fn radio_cmd() -> assert_cmd::Command {
    let mut cmd = bluegov_cmd();
    cmd.arg("--fixture").arg(fixture()).args(["--color", "never"]);
    cmd
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = bluegov_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    bluegov_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("Bluetooth")
            .and(predicate::str::contains("scan"))
            .and(predicate::str::contains("devices"))
            .and(predicate::str::contains("read")),
    );
}

#[test]
fn test_version_flag() {
    bluegov_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("bluegov"));
}

#[test]
fn test_completions_bash() {
    bluegov_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("bluegov"));
}

// ── Radio commands ──────────────────────────────────────────────────

#[test]
fn test_adapters_without_fixture() {
    bluegov_cmd()
        .arg("adapters")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("No radio fixture"));
}

#[test]
fn test_adapters_lists_fixture_radio() {
    radio_cmd().args(["adapters", "-o", "plain"]).assert().success().stdout(
        predicate::str::contains("/11:22:33:44:55:66")
            .and(predicate::str::contains("/11:22:33:44:55:77")),
    );
}

#[test]
fn test_devices_table() {
    radio_cmd().arg("devices").assert().success().stdout(
        predicate::str::contains("Thermometer")
            .and(predicate::str::contains("Beacon"))
            .and(predicate::str::contains("dBm")),
    );
}

#[test]
fn test_devices_combined_json() {
    let output = radio_cmd()
        .args(["devices", "--combined-devices", "-o", "json"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));

    let devices: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let devices = devices.as_array().unwrap();
    let thermometers: Vec<_> = devices
        .iter()
        .filter(|d| d["name"] == "Thermometer")
        .collect();
    assert_eq!(thermometers.len(), 1, "combined once: {devices:?}");
    assert_eq!(thermometers[0]["combined"], true);
}

#[test]
fn test_read_characteristic() {
    radio_cmd()
        .args(["read", THERMOMETER_BATTERY, "-o", "plain"])
        .assert()
        .success()
        .stdout(predicate::str::diff("64\n"));
}

#[test]
fn test_read_rejects_device_url() {
    radio_cmd()
        .args(["read", "/11:22:33:44:55:66/AA:BB:CC:DD:EE:FF"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid bluetooth URL"));
}

#[test]
fn test_read_malformed_url() {
    radio_cmd()
        .args(["read", "not-a-url"])
        .assert()
        .code(2);
}

#[test]
fn test_read_missing_device() {
    radio_cmd()
        .args(["read", "/11:22:33:44:55:66/00:00:00:00:00:01/2a19", "--timeout", "1"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_scan_streams_discoveries() {
    radio_cmd()
        .args(["scan", "--duration", "1", "-o", "plain"])
        .assert()
        .success()
        .stdout(predicate::str::contains("discovered /11:22:33:44:55:66"));
}

#[test]
fn test_scan_rejects_zero_duration() {
    radio_cmd()
        .args(["scan", "--duration", "0"])
        .assert()
        .code(2);
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_init_then_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    bluegov_cmd()
        .arg("--config")
        .arg(&path)
        .args(["config", "init"])
        .assert()
        .success();
    assert!(path.exists());

    bluegov_cmd()
        .arg("--config")
        .arg(&path)
        .args(["config", "init"])
        .assert()
        .code(6)
        .stderr(predicate::str::contains("already exists"));

    bluegov_cmd()
        .arg("--config")
        .arg(&path)
        .args(["config", "init", "--force"])
        .assert()
        .success();
}

#[test]
fn test_config_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bluegov.toml");
    bluegov_cmd()
        .arg("--config")
        .arg(&path)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("bluegov.toml"));
}

#[test]
fn test_config_show_reads_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[manager]\ndiscovery_rate = 3\n").unwrap();

    bluegov_cmd()
        .arg("--config")
        .arg(&path)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("discovery_rate = 3"));
}

#[test]
fn test_config_zero_rate_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[manager]\nrefresh_rate = 0\n").unwrap();

    radio_cmd()
        .arg("--config")
        .arg(&path)
        .arg("adapters")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("refresh_rate"));
}
