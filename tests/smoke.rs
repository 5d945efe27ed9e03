//! Smoke tests -- verify the binary runs and its subcommands parse.

use assert_cmd::Command;

#[test]
fn test_cli_help() {
    Command::cargo_bin("cloud-e2e")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("End-to-end harness"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("cloud-e2e")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("cloud-e2e"));
}

#[test]
fn test_serve_subcommand_exists() {
    Command::cargo_bin("cloud-e2e")
        .unwrap()
        .args(["serve", "--help"])
        .assert()
        .success()
        .stdout(predicates::str::contains("--bind"));
}

#[test]
fn test_check_config_prints_defaults() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("cloud-e2e")
        .unwrap()
        .current_dir(dir.path())
        .env_remove("E2E_CONFIG")
        .arg("check-config")
        .assert()
        .success()
        .stdout(predicates::str::contains("capacity = 25"))
        .stdout(predicates::str::contains("bind = \"127.0.0.1:3000\""));
}

#[test]
fn test_check_config_reads_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("e2e.toml");
    std::fs::write(&path, "[results]\ncapacity = 5\n").unwrap();

    Command::cargo_bin("cloud-e2e")
        .unwrap()
        .arg("--config")
        .arg(&path)
        .arg("check-config")
        .assert()
        .success()
        .stdout(predicates::str::contains("capacity = 5"));
}

#[test]
fn test_missing_config_file_fails() {
    Command::cargo_bin("cloud-e2e")
        .unwrap()
        .args(["--config", "/nonexistent/e2e.toml", "check-config"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("failed to read config file"));
}

#[test]
fn test_unreadable_env_config_warns_and_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("cloud-e2e")
        .unwrap()
        .current_dir(dir.path())
        .env("E2E_CONFIG", dir.path().join("missing.toml"))
        .env_remove("RUST_LOG")
        .arg("check-config")
        .assert()
        .success()
        .stdout(predicates::str::contains("capacity = 25"))
        .stderr(predicates::str::contains("E2E_CONFIG set but file could not be loaded"));
}

#[test]
fn test_zero_poll_interval_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("e2e.toml");
    std::fs::write(&path, "[poll]\ninterval_sec = 0\n").unwrap();

    Command::cargo_bin("cloud-e2e")
        .unwrap()
        .arg("--config")
        .arg(&path)
        .arg("check-config")
        .assert()
        .failure()
        .stderr(predicates::str::contains("poll.interval_sec"));
}
