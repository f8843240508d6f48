//! Integration tests for the `polsync` binary.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `polsync` binary with env isolation.
///
/// Points config directories at a nonexistent path and clears the
/// variables the binary reads so tests never see the user's setup.
fn polsync_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("polsync");
    cmd.env("HOME", "/tmp/polsync-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/polsync-cli-test-nonexistent")
        .env_remove("POLSYNC_CONFIG")
        .env_remove("POLSYNC_SYNCER__ERROR_THRESHOLD")
        .env_remove("POLSYNC_DATASTORE__TYPE")
        .env_remove("RUST_LOG");
    cmd
}

fn write(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

const TWO_NODES: &str = r#"[
  { "key": "/polsync/v3/nodes/node-b", "value": { "asn": 64512 } },
  { "key": "/polsync/v3/nodes/node-a", "value": { "asn": 64513 } }
]"#;

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn no_args_shows_help() {
    let output = polsync_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Usage"));
}

#[test]
fn version_flag() {
    polsync_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("polsync"));
}

// ── Replay ──────────────────────────────────────────────────────────

#[test]
fn replay_prints_updates_and_exits_in_sync() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "input.json", TWO_NODES);
    let config = dir.path().join("config.toml");

    let output = polsync_cmd()
        .arg("--config")
        .arg(&config)
        .arg("replay")
        .arg(&input)
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");

    let stdout = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<serde_json::Value> = stdout
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|l| l["update_type"] == "new"));
    assert!(
        lines
            .iter()
            .any(|l| l["key"] == "/polsync/v3/nodes/node-a" && l["value"]["asn"] == 64513)
    );

    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("status: InSync"), "{stderr}");
    assert!(stderr.contains("2 entries mirrored"), "{stderr}");
}

#[test]
fn replay_ignores_keys_outside_the_watched_set() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(
        dir.path(),
        "input.json",
        r#"[{ "key": "/elsewhere/thing", "value": 1 }]"#,
    );

    polsync_cmd()
        .arg("--config")
        .arg(dir.path().join("config.toml"))
        .arg("replay")
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("0 entries mirrored"));
}

#[test]
fn replay_rejects_malformed_input() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "input.json", "{ not json");

    polsync_cmd()
        .arg("--config")
        .arg(dir.path().join("config.toml"))
        .arg("replay")
        .arg(&input)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid replay file"));
}

#[test]
fn replay_reports_missing_file() {
    let dir = tempfile::tempdir().unwrap();

    polsync_cmd()
        .arg("--config")
        .arg(dir.path().join("config.toml"))
        .arg("replay")
        .arg(dir.path().join("absent.json"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Could not read"));
}

#[test]
fn replay_rejects_invalid_config() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "input.json", TWO_NODES);
    let config = write(dir.path(), "config.toml", "[syncer]\nresults_buffer = 0\n");

    polsync_cmd()
        .arg("--config")
        .arg(&config)
        .arg("replay")
        .arg(&input)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("syncer.results_buffer"));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn config_path_honours_flag() {
    polsync_cmd()
        .args(["--config", "/tmp/somewhere/polsync.toml", "config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/tmp/somewhere/polsync.toml"));
}

#[test]
fn config_show_redacts_password() {
    let dir = tempfile::tempdir().unwrap();
    let config = write(
        dir.path(),
        "config.toml",
        "[datastore.etcd]\nusername = \"felix\"\npassword = \"hunter2\"\n",
    );

    polsync_cmd()
        .arg("--config")
        .arg(&config)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("felix")
                .and(predicate::str::contains("hunter2").not())
                .and(predicate::str::contains("error_threshold = 15")),
        );
}

#[test]
fn config_init_refuses_to_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("nested").join("config.toml");

    polsync_cmd()
        .arg("--config")
        .arg(&config)
        .args(["config", "init"])
        .assert()
        .success();
    assert!(config.exists());

    polsync_cmd()
        .arg("--config")
        .arg(&config)
        .args(["config", "init"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("already exists"));

    polsync_cmd()
        .arg("--config")
        .arg(&config)
        .args(["config", "init", "--force"])
        .assert()
        .success();
}
