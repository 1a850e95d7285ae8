//! Integration tests covering backend launching against a fake server.

#[path = "common/mod.rs"]
mod common;

use std::{net::TcpListener, thread, time::Duration};

use common::{free_port, wait_until, write_script};
use servus::{
    config::{self, ConfigOverlay},
    control::{self, StopOutcome},
    error::SupervisorError,
    launcher,
    registry::{Registry, process_alive},
};
use tempfile::tempdir;

fn overlay_for(script: &std::path::Path, port: u16) -> ConfigOverlay {
    ConfigOverlay {
        app: Some("demo:app".to_string()),
        program: Some(script.to_string_lossy().into_owned()),
        host: Some("127.0.0.1".to_string()),
        port: Some(port),
        ..ConfigOverlay::default()
    }
}

#[test]
fn launch_records_the_confirmed_child() {
    let dir = tempdir().expect("tempdir");
    let script = write_script(dir.path(), "fake_server.sh", "#!/bin/sh\nsleep 30\n");

    let config = config::resolve(dir.path(), &overlay_for(&script, free_port()), None)
        .expect("resolve");
    let registry = Registry::new(&config.runtime_dir);

    let launched = launcher::launch(&config, &registry, false).expect("launch");
    let pid = launched.record.pid;

    // Reap on the side so the post-stop liveness probe sees a real death.
    let mut child = launched.child;
    let reaper = thread::spawn(move || {
        let _ = child.wait();
    });

    let live = registry
        .read_live()
        .expect("read_live")
        .expect("record must be live right after launch");
    assert_eq!(live.pid, pid);
    assert!(!live.command_digest.is_empty());

    let outcome =
        control::graceful_stop(&registry, Duration::from_secs(5)).expect("stop");
    assert_eq!(outcome, StopOutcome::Clean);
    assert!(registry.read().expect("read").is_none());
    assert!(wait_until(Duration::from_secs(2), || !process_alive(pid)));

    reaper.join().expect("join reaper");
}

#[test]
fn early_exit_is_a_launch_failure_and_writes_no_record() {
    let dir = tempdir().expect("tempdir");
    let script = write_script(
        dir.path(),
        "crashing_server.sh",
        "#!/bin/sh\necho 'could not import demo:app' >&2\nexit 3\n",
    );

    let config = config::resolve(dir.path(), &overlay_for(&script, free_port()), None)
        .expect("resolve");
    let registry = Registry::new(&config.runtime_dir);

    let err = launcher::launch(&config, &registry, false).expect_err("must fail");

    match err {
        SupervisorError::LaunchFailure { detail, .. } => {
            assert!(detail.contains("status 3"), "detail was: {detail}");
        }
        other => panic!("expected LaunchFailure, got {other:?}"),
    }
    assert!(
        !registry.pid_path().exists(),
        "a failed launch must not leave a PID record behind"
    );
}

#[test]
fn missing_program_is_a_launch_failure() {
    let dir = tempdir().expect("tempdir");

    let overlay = ConfigOverlay {
        app: Some("demo:app".to_string()),
        program: Some(
            dir.path()
                .join("no_such_server")
                .to_string_lossy()
                .into_owned(),
        ),
        port: Some(free_port()),
        ..ConfigOverlay::default()
    };
    let config = config::resolve(dir.path(), &overlay, None).expect("resolve");
    let registry = Registry::new(&config.runtime_dir);

    let err = launcher::launch(&config, &registry, false).expect_err("must fail");
    assert!(matches!(err, SupervisorError::LaunchFailure { .. }));
    assert!(!registry.pid_path().exists());
}

#[test]
fn occupied_port_is_surfaced_before_any_spawn() {
    let dir = tempdir().expect("tempdir");
    let script = write_script(dir.path(), "fake_server.sh", "#!/bin/sh\nsleep 30\n");

    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();

    let config =
        config::resolve(dir.path(), &overlay_for(&script, port), None).expect("resolve");
    let registry = Registry::new(&config.runtime_dir);

    let err = launcher::launch(&config, &registry, false).expect_err("must fail");

    match err {
        SupervisorError::PortConflict {
            port: reported, ..
        } => assert_eq!(reported, port),
        other => panic!("expected PortConflict, got {other:?}"),
    }
    assert!(!registry.pid_path().exists());

    drop(listener);
}
