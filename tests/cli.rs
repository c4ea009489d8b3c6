//! Binary-level smoke tests.

use assert_cmd::Command;
use predicates::prelude::*;

fn catsync() -> Command {
    let mut cmd = Command::cargo_bin("catsync").unwrap();
    cmd.env_remove("CATSYNC_TOKEN");
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    catsync()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("health"));
}

#[test]
fn test_version_prints_name() {
    catsync()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("catsync"));
}

#[test]
fn test_run_without_required_flags_fails() {
    catsync()
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--catalog"));
}

#[test]
fn test_run_without_token_reports_config_error() {
    let catalog = tempfile::tempdir().unwrap();
    catsync()
        .args([
            "run",
            "--catalog",
            catalog.path().to_str().unwrap(),
            "--base-url",
            "http://127.0.0.1:9/",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("CATSYNC_TOKEN"));
}

#[test]
fn test_health_against_unreachable_endpoint_fails() {
    catsync()
        .args([
            "health",
            "--base-url",
            "http://127.0.0.1:9/",
            "--token",
            "test-token",
            "-r",
            "1",
            "--timeout",
            "1",
        ])
        .assert()
        .failure();
}

#[test]
fn test_run_empty_catalog_succeeds_with_empty_report() {
    let catalog = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    catsync()
        .args([
            "run",
            "--catalog",
            catalog.path().to_str().unwrap(),
            "--state-dir",
            state.path().to_str().unwrap(),
            "--base-url",
            "http://127.0.0.1:9/",
            "--token",
            "test-token",
        ])
        .assert()
        .success();
}

#[test]
fn test_run_missing_catalog_root_fails() {
    let state = tempfile::tempdir().unwrap();
    catsync()
        .args([
            "run",
            "--catalog",
            "/nonexistent/catalog",
            "--state-dir",
            state.path().to_str().unwrap(),
            "--base-url",
            "http://127.0.0.1:9/",
            "--token",
            "test-token",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("catalog root"));
}
