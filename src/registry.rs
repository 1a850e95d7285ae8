//! Durable record of the currently supervised process.
//!
//! Commands are independent short-lived invocations, so the record lives on
//! disk rather than in process-wide state. Writes replace the file atomically
//! and every read staleness-checks the recorded PID against the live process
//! table, purging records that point at dead or unrelated processes.
use nix::{errno::Errno, sys::signal, unistd::Pid};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{fs, path::PathBuf};
use sysinfo::{Pid as SysPid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, warn};

use crate::config::BackendKind;
use crate::error::{PidFileError, SupervisorError};

/// PID record file name under the runtime directory.
pub const PID_FILE: &str = "servus.pid";

/// Environment-name hint file under the runtime directory.
pub const ENV_HINT_FILE: &str = "servus.env";

/// Slack allowed between the recorded and observed process start times.
/// Anything beyond this means the PID was reused by an unrelated process.
const START_TIME_TOLERANCE_SECS: i64 = 2;

/// Persisted identity of the supervised master process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecord {
    /// Master process ID.
    pub pid: u32,
    /// Process start time, seconds since the Unix epoch.
    pub started_at: i64,
    /// Digest of the launch argv, the launch-time expectation tag.
    pub command_digest: String,
    /// Backend strategy the process was launched with.
    pub backend: BackendKind,
    /// Worker count the process was launched with.
    pub workers: u32,
}

/// Handle on the PID record and environment hint under a runtime directory.
pub struct Registry {
    runtime_dir: PathBuf,
}

impl Registry {
    /// Creates a registry rooted at the given runtime directory.
    pub fn new(runtime_dir: impl Into<PathBuf>) -> Self {
        Self {
            runtime_dir: runtime_dir.into(),
        }
    }

    /// Path of the PID record file.
    pub fn pid_path(&self) -> PathBuf {
        self.runtime_dir.join(PID_FILE)
    }

    fn env_hint_path(&self) -> PathBuf {
        self.runtime_dir.join(ENV_HINT_FILE)
    }

    /// Persists the record, replacing any previous one atomically so a
    /// concurrent reader never observes a half-written file.
    pub fn record(&self, record: &ProcessRecord) -> Result<(), SupervisorError> {
        fs::create_dir_all(&self.runtime_dir).map_err(PidFileError::Read)?;

        let payload =
            serde_json::to_string_pretty(record).map_err(PidFileError::Parse)?;
        let path = self.pid_path();
        let tmp = path.with_extension("pid.tmp");
        fs::write(&tmp, payload).map_err(PidFileError::Read)?;
        fs::rename(&tmp, &path).map_err(PidFileError::Read)?;

        debug!("Recorded supervised process {} in {:?}", record.pid, path);
        Ok(())
    }

    /// Reads the record if one exists. Unparseable contents are treated as
    /// stale and purged rather than surfaced to the caller.
    pub fn read(&self) -> Result<Option<ProcessRecord>, SupervisorError> {
        let path = self.pid_path();
        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&path).map_err(PidFileError::Read)?;
        match serde_json::from_str::<ProcessRecord>(&contents) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                warn!("Purging unparseable PID record {:?}: {err}", path);
                self.clear()?;
                Ok(None)
            }
        }
    }

    /// Reads the record and verifies it still describes the originally
    /// supervised process. Dead or reused PIDs self-heal: the record is
    /// cleared before reporting "not running".
    pub fn read_live(&self) -> Result<Option<ProcessRecord>, SupervisorError> {
        let Some(record) = self.read()? else {
            return Ok(None);
        };

        if self.is_live(&record) {
            return Ok(Some(record));
        }

        debug!(
            "PID record for {} is stale; clearing {:?}",
            record.pid,
            self.pid_path()
        );
        self.clear()?;
        Ok(None)
    }

    /// Whether the recorded PID is alive *and* its observed start time
    /// matches the recorded one, rejecting PID-reuse false positives.
    pub fn is_live(&self, record: &ProcessRecord) -> bool {
        if !process_alive(record.pid) {
            return false;
        }

        match process_start_time(record.pid) {
            Some(observed) => {
                (observed - record.started_at).abs() <= START_TIME_TOLERANCE_SECS
            }
            // Alive per kill(0) but absent from the process table: not
            // recognizable as the supervised process.
            None => false,
        }
    }

    /// Removes the PID record. Idempotent.
    pub fn clear(&self) -> Result<(), SupervisorError> {
        let path = self.pid_path();
        if path.exists() {
            fs::remove_file(&path).map_err(PidFileError::Read)?;
        }
        Ok(())
    }

    /// Persists the environment name the server was started with, so
    /// follow-up commands default to the same named environment.
    pub fn write_env_hint(&self, name: &str) -> Result<(), SupervisorError> {
        fs::create_dir_all(&self.runtime_dir)?;
        fs::write(self.env_hint_path(), name)?;
        Ok(())
    }

    /// Reads the persisted environment name, if any.
    pub fn read_env_hint(&self) -> Option<String> {
        let contents = fs::read_to_string(self.env_hint_path()).ok()?;
        let trimmed = contents.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /// Removes the environment hint. Idempotent.
    pub fn clear_env_hint(&self) -> Result<(), SupervisorError> {
        let path = self.env_hint_path();
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// OS-level existence check via the null signal.
pub fn process_alive(pid: u32) -> bool {
    match signal::kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => true,
        Err(Errno::ESRCH) => false,
        // EPERM and friends mean the process exists but is not ours.
        Err(_) => true,
    }
}

/// Observed start time of a process in seconds since the Unix epoch.
pub fn process_start_time(pid: u32) -> Option<i64> {
    let sys_pid = SysPid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[sys_pid]),
        true,
        ProcessRefreshKind::everything(),
    );

    system.process(sys_pid).map(|p| p.start_time() as i64)
}

/// Digest of a launch argv, used to tag the launch expectation.
pub fn command_digest(argv: &[String]) -> String {
    let mut hasher = Sha256::new();
    for arg in argv {
        hasher.update(arg.as_bytes());
        hasher.update([0]);
    }
    format!("{:x}", hasher.finalize())
}
