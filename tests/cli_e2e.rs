//! End-to-end CLI tests for the dlmanager binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

mod support;
use support::payload;
use support::range_server::RangeServer;
use support::socket_guard::should_skip_socket_bound_test;

/// Runs the binary with config and state isolated in `home`.
fn dlmanager(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("dlmanager").unwrap();
    cmd.env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("XDG_STATE_HOME", home.path().join("state"))
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_binary_help_displays_usage() {
    let home = TempDir::new().unwrap();
    dlmanager(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Resumable HTTP download manager"))
        .stdout(predicate::str::contains("serve"));
}

#[test]
fn test_binary_version_displays_version() {
    let home = TempDir::new().unwrap();
    dlmanager(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("dlmanager"));
}

#[test]
fn test_binary_invalid_flag_returns_error() {
    let home = TempDir::new().unwrap();
    dlmanager(&home)
        .arg("--invalid-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_binary_without_urls_exits_cleanly() {
    let home = TempDir::new().unwrap();
    dlmanager(&home).arg("-q").assert().success();
}

#[test]
fn test_binary_rejects_bad_config_file() {
    let home = TempDir::new().unwrap();
    let config_dir = home.path().join("config").join("dlmanager");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(config_dir.join("config.toml"), "max_active = 0\n").unwrap();

    dlmanager(&home)
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_active"));
}

#[test]
fn test_binary_invalid_url_fails_run() {
    let home = TempDir::new().unwrap();
    dlmanager(&home)
        .args(["--no-persist", "-q", "not-a-url"])
        .assert()
        .code(1);
}

#[test]
fn test_serve_answers_commands_as_json_lines() {
    let home = TempDir::new().unwrap();
    let input = concat!(
        "{\"cmd\":\"add\",\"url\":\"ftp://example.com/x\"}\n",
        "{\"cmd\":\"frontEndReady\"}\n",
        "{\"cmd\":\"delete\",\"url\":\"http://example.com/missing\"}\n",
    );
    dlmanager(&home)
        .args(["serve", "--no-persist", "-q"])
        .write_stdin(input)
        .assert()
        .success()
        .stdout(predicate::str::contains(
            r#""event":"commandResult","cmd":"add""#,
        ))
        .stdout(predicate::str::contains(r#""errorKind":"invalidUrl""#))
        .stdout(predicate::str::contains(r#""errorKind":"notFound""#))
        .stdout(predicate::str::contains(r#""event":"updateDownloads""#))
        .stdout(predicate::str::contains(r#""URL":"ftp://example.com/x""#));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_batch_download_saves_into_save_dir() {
    if should_skip_socket_bound_test() {
        return;
    }
    let body = payload(4096);
    let server = RangeServer::start(body.clone(), true, None).await.unwrap();
    let home = TempDir::new().unwrap();
    let out = home.path().join("out");
    let url = server.url("batch.bin");

    let mut cmd = dlmanager(&home);
    cmd.args(["-q", "--save-dir"]).arg(&out).arg(&url);
    let assert = tokio::task::spawn_blocking(move || cmd.assert())
        .await
        .unwrap();
    assert.success();
    assert_eq!(std::fs::read(out.join("batch.bin")).unwrap(), body);

    // Second run: the download is already complete and the file exists, so
    // the save is refused and the run counts as partial.
    let mut cmd = dlmanager(&home);
    cmd.args(["-q", "--save-dir"]).arg(&out).arg(&url);
    let assert = tokio::task::spawn_blocking(move || cmd.assert())
        .await
        .unwrap();
    assert.code(2);

    let mut cmd = dlmanager(&home);
    cmd.args(["-q", "--overwrite", "--save-dir"]).arg(&out).arg(&url);
    let assert = tokio::task::spawn_blocking(move || cmd.assert())
        .await
        .unwrap();
    assert.success();
}
