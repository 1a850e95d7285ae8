//! Control-signal delivery and graceful shutdown.
//!
//! Terminate and interrupt both ask the supervised process to shut down
//! gracefully; kill is unconditional; hangup asks it to re-read code and
//! configuration without a full restart. Signaling a process that is no
//! longer alive is a normal outcome, never an error.
use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::Pid,
};
use std::{
    io, thread,
    time::{Duration, Instant},
};
use strum_macros::{AsRefStr, Display, EnumString};
use tracing::{debug, warn};

use crate::error::SupervisorError;
use crate::registry::{Registry, process_alive};

/// Liveness poll cadence while waiting out a graceful shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Grace allowed for the kernel to reap a force-killed process.
const KILL_CONFIRM_TIMEOUT: Duration = Duration::from_secs(3);

/// Control signals understood by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr, Display)]
#[strum(serialize_all = "lowercase")]
pub enum SignalKind {
    /// Graceful shutdown request (SIGTERM).
    Terminate,
    /// Graceful shutdown request (SIGINT); equivalent to terminate here.
    Interrupt,
    /// Unconditional, immediate termination (SIGKILL).
    Kill,
    /// Reload hint (SIGHUP): re-read code/config without a full restart.
    Hangup,
}

impl SignalKind {
    fn as_signal(&self) -> Signal {
        match self {
            SignalKind::Terminate => Signal::SIGTERM,
            SignalKind::Interrupt => Signal::SIGINT,
            SignalKind::Kill => Signal::SIGKILL,
            SignalKind::Hangup => Signal::SIGHUP,
        }
    }
}

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The process exited within the graceful timeout.
    Clean,
    /// The process ignored the graceful request and was killed at timeout.
    /// A forced stop is still a successful stop, not an error.
    Forced,
    /// No live supervised process to stop.
    NotRunning,
}

/// Result of a reload request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// The reload hint was delivered to the given PID.
    Sent(u32),
    /// No live supervised process to reload.
    NotRunning,
}

/// Sends a signal to a process. Returns `Ok(false)` when the process is
/// already gone.
pub fn send(pid: u32, kind: SignalKind) -> Result<bool, SupervisorError> {
    debug!("Sending {kind} to process {pid}");
    match signal::kill(Pid::from_raw(pid as i32), Some(kind.as_signal())) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(err) => Err(err.into()),
    }
}

/// Requests a graceful stop of the recorded process, escalating to SIGKILL
/// once `timeout` expires. The registry is cleared in every path that
/// confirms the process dead.
pub fn graceful_stop(
    registry: &Registry,
    timeout: Duration,
) -> Result<StopOutcome, SupervisorError> {
    let Some(record) = registry.read_live()? else {
        return Ok(StopOutcome::NotRunning);
    };

    stop_pid(registry, record.pid, timeout)
}

/// Unconditionally kills the recorded process.
pub fn force_stop(registry: &Registry) -> Result<StopOutcome, SupervisorError> {
    let Some(record) = registry.read_live()? else {
        return Ok(StopOutcome::NotRunning);
    };

    if !send(record.pid, SignalKind::Kill)? {
        registry.clear()?;
        return Ok(StopOutcome::NotRunning);
    }

    confirm_death(record.pid)?;
    registry.clear()?;
    Ok(StopOutcome::Forced)
}

/// Sends the reload hint to the recorded process.
pub fn send_reload(registry: &Registry) -> Result<ReloadOutcome, SupervisorError> {
    let Some(record) = registry.read_live()? else {
        return Ok(ReloadOutcome::NotRunning);
    };

    if !send(record.pid, SignalKind::Hangup)? {
        registry.clear()?;
        return Ok(ReloadOutcome::NotRunning);
    }

    Ok(ReloadOutcome::Sent(record.pid))
}

fn stop_pid(
    registry: &Registry,
    pid: u32,
    timeout: Duration,
) -> Result<StopOutcome, SupervisorError> {
    if !send(pid, SignalKind::Terminate)? {
        registry.clear()?;
        return Ok(StopOutcome::NotRunning);
    }

    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        thread::sleep(POLL_INTERVAL);
        if !process_alive(pid) {
            registry.clear()?;
            return Ok(StopOutcome::Clean);
        }
    }

    warn!("Process {pid} did not exit within {timeout:?}; sending SIGKILL");
    send(pid, SignalKind::Kill)?;
    confirm_death(pid)?;
    registry.clear()?;
    Ok(StopOutcome::Forced)
}

/// Waits for a killed process to disappear from the process table. A process
/// that survives SIGKILL (unkillable kernel state) is an error: reporting
/// success while it still runs would break the stop contract.
fn confirm_death(pid: u32) -> Result<(), SupervisorError> {
    let deadline = Instant::now() + KILL_CONFIRM_TIMEOUT;
    while Instant::now() < deadline {
        if !process_alive(pid) {
            return Ok(());
        }
        thread::sleep(POLL_INTERVAL);
    }

    Err(SupervisorError::Io(io::Error::other(format!(
        "process {pid} is still alive after SIGKILL"
    ))))
}
