#![allow(dead_code)]

use std::{
    fs,
    net::TcpListener,
    path::{Path, PathBuf},
    process::Command,
    thread,
    time::{Duration, Instant},
};

use servus::{
    config::BackendKind,
    control::{self, SignalKind},
    registry::{ProcessRecord, command_digest, process_start_time},
};

/// A spawned helper process with a background reaper thread, so liveness
/// probes observe a real death instead of a lingering zombie.
pub struct SupervisedChild {
    pub pid: u32,
    reaper: Option<thread::JoinHandle<()>>,
}

impl SupervisedChild {
    pub fn spawn(program: &str, args: &[&str]) -> Self {
        let mut child = Command::new(program)
            .args(args)
            .spawn()
            .expect("failed to spawn helper process");
        let pid = child.id();
        let reaper = thread::spawn(move || {
            let _ = child.wait();
        });

        Self {
            pid,
            reaper: Some(reaper),
        }
    }

    /// Blocks until the reaper has collected the child.
    pub fn join(mut self) {
        if let Some(handle) = self.reaper.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SupervisedChild {
    fn drop(&mut self) {
        let _ = control::send(self.pid, SignalKind::Kill);
        if let Some(handle) = self.reaper.take() {
            let _ = handle.join();
        }
    }
}

/// Builds a registry record for a live helper process, sampling its real
/// start time.
pub fn record_for(pid: u32, backend: BackendKind, workers: u32) -> ProcessRecord {
    ProcessRecord {
        pid,
        started_at: process_start_time(pid).expect("helper process start time"),
        command_digest: command_digest(&["helper".to_string()]),
        backend,
        workers,
    }
}

/// Writes an executable shell script and returns its path.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).expect("failed to write script");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mut perms = fs::metadata(&path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("chmod script");
    }

    path
}

/// Picks a TCP port that nothing is listening on.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind probe listener");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    port
}

/// Polls a predicate until it holds or the deadline passes.
pub fn wait_until(timeout: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if pred() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(50));
    }
}

/// Command handle on the servus binary under test.
pub fn servus_cmd() -> assert_cmd::Command {
    assert_cmd::Command::from_std(Command::new(env!("CARGO_BIN_EXE_servus")))
}
