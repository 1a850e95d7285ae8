//! Integration tests covering graceful shutdown, forced kills, and stale
//! record self-healing.

#[path = "common/mod.rs"]
mod common;

use std::{
    thread,
    time::{Duration, Instant},
};

use common::{SupervisedChild, record_for, wait_until, write_script};
use servus::{
    config::BackendKind,
    control::{self, ReloadOutcome, StopOutcome},
    registry::{Registry, command_digest, process_alive},
};
use tempfile::tempdir;

#[test]
fn graceful_stop_reports_clean_for_a_cooperative_server() {
    let dir = tempdir().expect("tempdir");
    let registry = Registry::new(dir.path());

    let child = SupervisedChild::spawn("sleep", &["30"]);
    registry
        .record(&record_for(child.pid, BackendKind::Single, 1))
        .expect("record");

    let outcome =
        control::graceful_stop(&registry, Duration::from_secs(5)).expect("stop");

    assert_eq!(outcome, StopOutcome::Clean);
    assert!(
        !registry.pid_path().exists(),
        "stop must clear the PID record"
    );
    assert!(wait_until(Duration::from_secs(2), || !process_alive(
        child.pid
    )));

    child.join();
}

#[test]
fn stubborn_server_is_killed_at_timeout_and_reported_forced() {
    let dir = tempdir().expect("tempdir");
    let registry = Registry::new(dir.path());

    let script = write_script(
        dir.path(),
        "stubborn.sh",
        "#!/bin/sh\ntrap '' TERM\nwhile true; do\n  sleep 1\ndone\n",
    );
    let child = SupervisedChild::spawn(script.to_str().unwrap(), &[]);

    // Give the script a moment to install its trap before asking it to die.
    thread::sleep(Duration::from_millis(300));

    registry
        .record(&record_for(child.pid, BackendKind::Single, 1))
        .expect("record");

    let timeout = Duration::from_secs(2);
    let started = Instant::now();
    let outcome = control::graceful_stop(&registry, timeout).expect("stop");
    let elapsed = started.elapsed();

    assert_eq!(
        outcome,
        StopOutcome::Forced,
        "an ignored SIGTERM must be reported as a forced stop, not a plain success"
    );
    assert!(
        elapsed >= timeout,
        "escalation must wait out the graceful timeout (took {elapsed:?})"
    );
    assert!(
        elapsed < timeout + Duration::from_secs(5),
        "escalation must not wait unboundedly (took {elapsed:?})"
    );
    assert!(!registry.pid_path().exists());

    child.join();
}

#[test]
fn record_held_by_an_unrelated_process_is_purged_as_stale() {
    let dir = tempdir().expect("tempdir");
    let registry = Registry::new(dir.path());

    // Our own PID with a fabricated start time simulates PID reuse: the PID
    // is alive but it is not the process we recorded.
    registry
        .record(&servus::registry::ProcessRecord {
            pid: std::process::id(),
            started_at: 1,
            command_digest: command_digest(&["helper".to_string()]),
            backend: BackendKind::Single,
            workers: 1,
        })
        .expect("record");

    let outcome =
        control::graceful_stop(&registry, Duration::from_secs(1)).expect("stop");

    assert_eq!(outcome, StopOutcome::NotRunning);
    assert!(
        !registry.pid_path().exists(),
        "the reused PID must never be treated as the supervised process"
    );
    assert!(
        process_alive(std::process::id()),
        "the unrelated process must not be signaled"
    );
}

#[test]
fn force_stop_kills_without_waiting() {
    let dir = tempdir().expect("tempdir");
    let registry = Registry::new(dir.path());

    let script = write_script(
        dir.path(),
        "stubborn.sh",
        "#!/bin/sh\ntrap '' TERM\nwhile true; do\n  sleep 1\ndone\n",
    );
    let child = SupervisedChild::spawn(script.to_str().unwrap(), &[]);
    thread::sleep(Duration::from_millis(300));

    registry
        .record(&record_for(child.pid, BackendKind::Single, 1))
        .expect("record");

    let started = Instant::now();
    let outcome = control::force_stop(&registry).expect("force stop");

    assert_eq!(outcome, StopOutcome::Forced);
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(!registry.pid_path().exists());

    child.join();
}

#[test]
fn reload_delivers_the_hint_to_a_live_server() {
    let dir = tempdir().expect("tempdir");
    let registry = Registry::new(dir.path());

    let child = SupervisedChild::spawn("sleep", &["30"]);
    registry
        .record(&record_for(child.pid, BackendKind::Single, 1))
        .expect("record");

    let outcome = control::send_reload(&registry).expect("reload");
    assert_eq!(outcome, ReloadOutcome::Sent(child.pid));

    // `sleep` has no SIGHUP handler, so delivery is observable as its death.
    assert!(wait_until(Duration::from_secs(2), || !process_alive(
        child.pid
    )));

    child.join();
}

#[test]
fn reload_without_a_server_reports_not_running() {
    let dir = tempdir().expect("tempdir");
    let registry = Registry::new(dir.path());

    let outcome = control::send_reload(&registry).expect("reload");
    assert_eq!(outcome, ReloadOutcome::NotRunning);
}
