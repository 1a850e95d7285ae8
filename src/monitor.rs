//! Worker status monitoring for the supervised process tree.
//!
//! Snapshots are recomputed on every query and never persisted. CPU figures
//! are instantaneous: the process table is refreshed twice across a short
//! sampling window rather than read from a cumulative counter.
use serde::Serialize;
use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};
use strum_macros::{AsRefStr, Display};
use sysinfo::{Pid as SysPid, ProcessesToUpdate, System};
use tracing::debug;

use crate::error::SupervisorError;
use crate::registry::{ProcessRecord, Registry};

/// Workers younger than this are still starting regardless of CPU.
const STARTING_GRACE_SECS: u64 = 3;

/// CPU percentage below which a worker counts as idle over the window.
const IDLE_CPU_THRESHOLD: f32 = 0.5;

/// Classified activity state of a worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WorkerState {
    /// Recently spawned, still inside the startup grace period.
    Starting,
    /// Actively burning CPU over the sampling window.
    Running,
    /// Alive but near-zero CPU over the sampling window.
    Idle,
}

/// Sampled metrics for one worker process.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerInfo {
    /// Worker process ID.
    pub pid: u32,
    /// Instantaneous CPU percentage over the sampling window.
    pub cpu_percent: f32,
    /// Resident memory in bytes.
    pub memory_bytes: u64,
    /// Seconds since the worker started.
    pub uptime_secs: u64,
    /// Classified activity state.
    pub state: WorkerState,
    /// Requests handled, only when the backend exposes the count. Absent
    /// means "unknown"; a zero here would falsely imply "no traffic".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests_handled: Option<u64>,
}

/// Sampled metrics for the master process.
#[derive(Debug, Clone, Serialize)]
pub struct MasterInfo {
    /// Master process ID.
    pub pid: u32,
    /// Instantaneous CPU percentage over the sampling window.
    pub cpu_percent: f32,
    /// Resident memory in bytes.
    pub memory_bytes: u64,
    /// Seconds since the master started.
    pub uptime_secs: u64,
    /// Command line of the master process.
    pub command: String,
}

/// One ephemeral status sample of the supervised process tree.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    /// Master process metrics.
    pub master: MasterInfo,
    /// Worker entries, ordered by PID.
    pub workers: Vec<WorkerInfo>,
}

/// Samples the process tree rooted at the recorded master. Returns `None`
/// when the master is no longer in the process table.
pub fn snapshot(record: &ProcessRecord) -> Option<WorkerSnapshot> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    system.refresh_processes(ProcessesToUpdate::All, true);

    let master_pid = SysPid::from_u32(record.pid);
    let master_proc = system.process(master_pid)?;
    let now = chrono::Utc::now().timestamp();

    let master = MasterInfo {
        pid: record.pid,
        cpu_percent: master_proc.cpu_usage(),
        memory_bytes: master_proc.memory(),
        uptime_secs: elapsed_secs(now, master_proc.start_time()),
        command: command_line(&system, master_pid),
    };

    let mut worker_pids = descendants(&system, master_pid);

    // Pre-fork workers are forked images of the master; anything in the tree
    // with a different process name (a shell helper, a spawned tool) is not
    // one of ours. Fall back to the raw tree when the name filter would hide
    // everything, since some servers re-exec their workers.
    if record.backend == crate::config::BackendKind::Prefork {
        let master_name = master_proc.name().to_os_string();
        let named: Vec<SysPid> = worker_pids
            .iter()
            .copied()
            .filter(|pid| {
                system
                    .process(*pid)
                    .map(|p| p.name() == master_name.as_os_str())
                    .unwrap_or(false)
            })
            .collect();
        if !named.is_empty() {
            worker_pids = named;
        }
    }

    debug!(
        "Discovered {} worker candidate(s) under master {}",
        worker_pids.len(),
        record.pid
    );

    let workers = worker_pids
        .into_iter()
        .filter_map(|pid| {
            let process = system.process(pid)?;
            let uptime_secs = elapsed_secs(now, process.start_time());
            let cpu_percent = process.cpu_usage();
            Some(WorkerInfo {
                pid: pid.as_u32(),
                cpu_percent,
                memory_bytes: process.memory(),
                uptime_secs,
                state: classify(uptime_secs, cpu_percent),
                requests_handled: None,
            })
        })
        .collect();

    Some(WorkerSnapshot { master, workers })
}

/// Interactive monitoring loop: re-samples and prints until Ctrl+C. This is
/// the only cancellable operation the supervisor exposes.
pub fn watch(registry: &Registry, interval: Duration) -> Result<(), SupervisorError> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
        .map_err(|e| io::Error::other(e.to_string()))?;

    println!("Press Ctrl+C to exit");

    while running.load(Ordering::SeqCst) {
        match registry.read_live()? {
            None => println!("○ Server is not running"),
            Some(record) => match snapshot(&record) {
                Some(snap) => print_snapshot(&snap),
                None => println!("○ Server is not running"),
            },
        }

        // Sleep in short slices so Ctrl+C stays responsive.
        let mut remaining = interval;
        while running.load(Ordering::SeqCst) && !remaining.is_zero() {
            let slice = remaining.min(Duration::from_millis(100));
            thread::sleep(slice);
            remaining -= slice;
        }
    }

    println!("Monitor stopped");
    Ok(())
}

/// Prints one snapshot in a compact fixed layout.
pub fn print_snapshot(snap: &WorkerSnapshot) {
    println!(
        "● master {}  cpu {:.1}%  mem {}  up {}  workers {}",
        snap.master.pid,
        snap.master.cpu_percent,
        format_memory(snap.master.memory_bytes),
        format_uptime(snap.master.uptime_secs),
        snap.workers.len(),
    );

    for worker in &snap.workers {
        println!(
            "    ├─ {} {:<8}  cpu {:.1}%  mem {}  up {}",
            worker.pid,
            worker.state,
            worker.cpu_percent,
            format_memory(worker.memory_bytes),
            format_uptime(worker.uptime_secs),
        );
    }
}

/// Collects all descendants of `pid`, depth first, ordered by PID within
/// each generation.
fn descendants(system: &System, pid: SysPid) -> Vec<SysPid> {
    let mut result = Vec::new();

    let mut children: Vec<SysPid> = system
        .processes()
        .iter()
        .filter(|(_, process)| process.parent() == Some(pid))
        .map(|(child_pid, _)| *child_pid)
        .collect();
    children.sort_by_key(|p| p.as_u32());

    for child in children {
        result.push(child);
        result.extend(descendants(system, child));
    }

    result
}

fn command_line(system: &System, pid: SysPid) -> String {
    system
        .process(pid)
        .map(|p| {
            p.cmd()
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default()
}

fn elapsed_secs(now: i64, start_time: u64) -> u64 {
    (now - start_time as i64).max(0) as u64
}

fn classify(uptime_secs: u64, cpu_percent: f32) -> WorkerState {
    if uptime_secs < STARTING_GRACE_SECS {
        WorkerState::Starting
    } else if cpu_percent < IDLE_CPU_THRESHOLD {
        WorkerState::Idle
    } else {
        WorkerState::Running
    }
}

/// Formats an uptime in the largest two or three useful units.
pub fn format_uptime(total_seconds: u64) -> String {
    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3_600;
    let minutes = (total_seconds % 3_600) / 60;
    let seconds = total_seconds % 60;

    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

fn format_memory(bytes: u64) -> String {
    format!("{:.1}M", bytes as f64 / (1024.0 * 1024.0))
}
