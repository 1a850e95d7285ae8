//! Integration tests covering the six-layer configuration merge.

#[path = "common/mod.rs"]
mod common;

use std::{env, fs};

use servus::config::{self, BackendKind, ConfigOverlay};
use tempfile::tempdir;

#[test]
fn layers_override_in_documented_order() {
    let _guard = servus::test_utils::env_lock();

    let dir = tempdir().expect("tempdir");
    fs::write(
        dir.path().join("servus.yaml"),
        r#"
port: 8000
workers: 1
log_level: warn
envs:
  prod:
    workers: 8
    daemon: true
"#,
    )
    .expect("write manifest");
    fs::write(dir.path().join(".env"), "SERVUS_LOG_LEVEL=debug\n").expect("write .env");

    unsafe {
        env::set_var("SERVUS_WORKERS", "2");
    }

    let cli = ConfigOverlay {
        port: Some(9001),
        ..ConfigOverlay::default()
    };
    let result = config::resolve(dir.path(), &cli, Some("prod"));

    unsafe {
        env::remove_var("SERVUS_WORKERS");
    }

    let config = result.expect("resolve");
    assert_eq!(config.port, 9001, "CLI overrides everything below it");
    assert_eq!(config.workers, 2, "process env overrides the env section");
    assert!(config.daemon, "env section survives unrelated overrides");
    assert_eq!(config.log_level, "debug", ".env overrides the manifest");
    assert_eq!(config.env_name.as_deref(), Some("prod"));
}

#[test]
fn base_and_environment_scenario_resolves_as_specified() {
    let _guard = servus::test_utils::env_lock();

    let dir = tempdir().expect("tempdir");
    fs::write(
        dir.path().join("servus.yaml"),
        r#"
port: 8000
workers: 1
envs:
  prod:
    workers: 8
    daemon: true
"#,
    )
    .expect("write manifest");

    let config = config::resolve(dir.path(), &ConfigOverlay::default(), Some("prod"))
        .expect("resolve");

    assert_eq!(config.port, 8000);
    assert_eq!(config.workers, 8);
    assert!(config.daemon);
}

#[test]
fn absent_cli_daemon_flag_does_not_mask_env_var_true() {
    let _guard = servus::test_utils::env_lock();

    let dir = tempdir().expect("tempdir");

    unsafe {
        env::set_var("SERVUS_DAEMON", "true");
    }
    let result = config::resolve(dir.path(), &ConfigOverlay::default(), None);
    unsafe {
        env::remove_var("SERVUS_DAEMON");
    }

    let config = result.expect("resolve");
    assert!(
        config.daemon,
        "daemon=true from the environment must survive an unset CLI flag"
    );
}

#[test]
fn selecting_missing_environment_fails_even_with_no_envs_at_all() {
    let _guard = servus::test_utils::env_lock();

    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("servus.yaml"), "port: 8000\n").expect("write manifest");

    let err = config::resolve(dir.path(), &ConfigOverlay::default(), Some("staging"))
        .expect_err("must fail");

    match err {
        servus::error::SupervisorError::UnknownEnvironment { name, available } => {
            assert_eq!(name, "staging");
            assert!(available.is_empty());
        }
        other => panic!("expected UnknownEnvironment, got {other:?}"),
    }
}

#[test]
fn env_section_inherits_unset_fields_through_every_layer() {
    let _guard = servus::test_utils::env_lock();

    let dir = tempdir().expect("tempdir");
    fs::write(
        dir.path().join("servus.yaml"),
        r#"
host: 0.0.0.0
port: 8443
backend: prefork
worker_class: threads
envs:
  staging:
    workers: 4
"#,
    )
    .expect("write manifest");

    let config = config::resolve(dir.path(), &ConfigOverlay::default(), Some("staging"))
        .expect("resolve");

    assert_eq!(config.host, "0.0.0.0");
    assert_eq!(config.port, 8443);
    assert_eq!(config.backend, BackendKind::Prefork);
    assert_eq!(config.workers, 4);
    assert_eq!(config.worker_class.as_deref(), Some("threads"));
}
