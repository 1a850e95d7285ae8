//! Integration tests driving the servus binary end to end.

#[path = "common/mod.rs"]
mod common;

use std::fs;

use common::{free_port, servus_cmd};
use predicates::prelude::*;
use tempfile::tempdir;

#[test]
fn help_lists_the_command_surface() {
    servus_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("start"))
        .stdout(predicate::str::contains("stop"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("reload"))
        .stdout(predicate::str::contains("monitor"));
}

#[test]
fn status_reports_not_running_in_a_fresh_project() {
    let dir = tempdir().expect("tempdir");
    fs::write(
        dir.path().join("servus.yaml"),
        format!("port: {}\n", free_port()),
    )
    .expect("write manifest");

    servus_cmd()
        .arg("status")
        .current_dir(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("not running"));
}

#[test]
fn status_json_is_machine_readable() {
    let dir = tempdir().expect("tempdir");
    fs::write(
        dir.path().join("servus.yaml"),
        format!("port: {}\n", free_port()),
    )
    .expect("write manifest");

    let output = servus_cmd()
        .args(["status", "--json"])
        .current_dir(dir.path())
        .output()
        .expect("run status --json");

    assert!(output.status.success());
    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(report["running"], serde_json::Value::Bool(false));
    assert!(report["port"].is_number());
}

#[test]
fn stop_without_a_server_is_a_normal_outcome() {
    let dir = tempdir().expect("tempdir");
    fs::write(
        dir.path().join("servus.yaml"),
        format!("port: {}\n", free_port()),
    )
    .expect("write manifest");

    servus_cmd()
        .arg("stop")
        .current_dir(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("No server is running"));
}

#[test]
fn config_shows_the_resolved_environment_overlay() {
    let dir = tempdir().expect("tempdir");
    fs::write(
        dir.path().join("servus.yaml"),
        r#"
port: 9000
workers: 3
envs:
  prod:
    workers: 8
"#,
    )
    .expect("write manifest");

    servus_cmd()
        .args(["config", "--env", "prod"])
        .current_dir(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("port: 9000"))
        .stdout(predicate::str::contains("workers: 8"))
        .stdout(predicate::str::contains("env_name: prod"));
}

#[test]
fn selecting_an_unknown_environment_fails() {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("servus.yaml"), "port: 9000\n").expect("write manifest");

    servus_cmd()
        .args(["config", "--env", "qa"])
        .current_dir(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("qa"));
}

#[test]
fn invalid_backend_kind_is_rejected_at_parse_time() {
    servus_cmd()
        .args(["start", "--backend", "threads"])
        .assert()
        .failure();
}

#[test]
fn logs_handles_a_missing_log_file() {
    let dir = tempdir().expect("tempdir");
    fs::write(
        dir.path().join("servus.yaml"),
        format!("port: {}\n", free_port()),
    )
    .expect("write manifest");

    servus_cmd()
        .arg("logs")
        .current_dir(dir.path())
        .assert()
        .success();
}

#[test]
fn clean_reports_nothing_to_do_without_runtime_state() {
    let dir = tempdir().expect("tempdir");
    fs::write(
        dir.path().join("servus.yaml"),
        format!("port: {}\n", free_port()),
    )
    .expect("write manifest");

    servus_cmd()
        .args(["clean", "--yes"])
        .current_dir(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to clean").or(
            predicate::str::contains("Runtime directory does not exist"),
        ));
}
