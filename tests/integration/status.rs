//! Integration tests covering worker discovery and status snapshots.

#[path = "common/mod.rs"]
mod common;

use std::{thread, time::Duration};

use common::{SupervisedChild, record_for, wait_until, write_script};
use servus::{
    config::BackendKind,
    control::{self, SignalKind},
    monitor,
    registry::process_alive,
};
use tempfile::tempdir;

#[test]
fn snapshot_discovers_worker_children() {
    let dir = tempdir().expect("tempdir");
    let script = write_script(
        dir.path(),
        "master.sh",
        "#!/bin/sh\nsleep 30 &\nsleep 30 &\nwait\n",
    );

    let master = SupervisedChild::spawn(script.to_str().unwrap(), &[]);
    thread::sleep(Duration::from_millis(300));

    let record = record_for(master.pid, BackendKind::Single, 2);
    let snap = monitor::snapshot(&record).expect("master must be visible");

    assert_eq!(snap.master.pid, master.pid);
    assert!(
        snap.workers.len() >= 2,
        "expected both sleep children, found {:?}",
        snap.workers
    );
    for worker in &snap.workers {
        assert!(worker.uptime_secs < 30);
        assert!(
            worker.requests_handled.is_none(),
            "request counts must be absent, never zero-by-default"
        );
    }

    // Kill the whole helper tree before reaping the master.
    for worker in &snap.workers {
        let _ = control::send(worker.pid, SignalKind::Kill);
    }
    let _ = control::send(master.pid, SignalKind::Kill);
    assert!(wait_until(Duration::from_secs(2), || !process_alive(
        master.pid
    )));
    master.join();
}

#[test]
fn snapshot_of_a_dead_master_is_none() {
    let child = SupervisedChild::spawn("true", &[]);
    let pid = child.pid;
    assert!(wait_until(Duration::from_secs(2), || !process_alive(pid)));
    child.join();

    let record = servus::registry::ProcessRecord {
        pid,
        started_at: 1,
        command_digest: String::new(),
        backend: BackendKind::Single,
        workers: 1,
    };
    assert!(monitor::snapshot(&record).is_none());
}

#[test]
fn childless_master_has_an_empty_worker_list() {
    let child = SupervisedChild::spawn("sleep", &["30"]);
    thread::sleep(Duration::from_millis(100));

    let record = record_for(child.pid, BackendKind::Single, 1);
    let snap = monitor::snapshot(&record).expect("master must be visible");

    assert_eq!(snap.master.pid, child.pid);
    assert!(snap.workers.is_empty());

    let _ = control::send(child.pid, SignalKind::Kill);
    child.join();
}
