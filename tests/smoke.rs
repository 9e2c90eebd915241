//! Smoke tests -- verify the binary runs and configuration is enforced.

use assert_cmd::Command;
use predicates::prelude::*;

fn runner() -> Command {
    let mut cmd = Command::cargo_bin("pipermail-runner").unwrap();
    for var in [
        "PIPERMAIL_CONFIG",
        "PIPERMAIL_SOURCE",
        "PIPERMAIL_DATABASE",
        "PIPERMAIL_RAVEN",
        "PIPERMAIL_MONTHS",
        "PIPERMAIL_PARALLEL",
        "PIPERMAIL_COMMAND",
        "PIPERMAIL_LOG_FORMAT",
        "PORT",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn test_cli_help() {
    runner()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Perpetual pipermail archive ingestion runner"));
}

#[test]
fn test_cli_version() {
    runner()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("pipermail-runner"));
}

#[test]
fn test_serve_without_source_does_not_start() {
    runner()
        .args(["serve", "--database", "unused.db"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("source"));
}

#[test]
fn test_serve_without_database_does_not_start() {
    runner()
        .env("PIPERMAIL_SOURCE", "https://lists.example.org/pipermail/dev/")
        .arg("serve")
        .assert()
        .failure()
        .stderr(predicate::str::contains("database"));
}

#[test]
fn test_zero_parallel_is_rejected() {
    runner()
        .args([
            "serve",
            "--source",
            "https://lists.example.org/pipermail/dev/",
            "--database",
            "unused.db",
            "--parallel",
            "0",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("parallel must be at least 1"));
}

#[test]
fn test_bad_config_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runner.toml");
    std::fs::write(&path, "months = \"many\"").unwrap();

    runner()
        .arg("--config")
        .arg(&path)
        .arg("serve")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config file"));
}

/// Create an empty run log the way `serve` would.
fn empty_run_log(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let db = dir.path().join("runner.db");
    pipermail_runner::storage::Store::open(db.to_str().unwrap()).unwrap();
    db
}

#[test]
fn test_runs_on_empty_log() {
    let dir = tempfile::tempdir().unwrap();
    let db = empty_run_log(&dir);

    runner()
        .arg("runs")
        .arg("--database")
        .arg(&db)
        .assert()
        .success()
        .stdout(predicate::str::contains("No runs recorded."));
}

#[test]
fn test_runs_json_on_empty_log() {
    let dir = tempfile::tempdir().unwrap();
    let db = empty_run_log(&dir);

    runner()
        .args(["runs", "--json", "--database"])
        .arg(&db)
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

#[test]
fn test_runs_on_missing_database_creates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("runnner").join("runner.db");

    runner()
        .arg("runs")
        .arg("--database")
        .arg(&db)
        .assert()
        .failure()
        .stderr(predicate::str::contains("no run log database"));

    assert!(!dir.path().join("runnner").exists());
}

#[test]
fn test_help_describes_tracker_endpoint() {
    runner()
        .args(["serve", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("not a Sentry"));
}
