//! Backend launching: building and starting the supervised server process.
//!
//! Two interchangeable strategies share one contract: exactly one child
//! process implementing the HTTP server role. The single strategy runs one
//! optionally self-reloading process; the pre-fork strategy runs a master
//! that forks and babysits N workers. Watching, reloading, and worker
//! retirement all happen inside the external server; the launcher only
//! configures them.
use std::{
    process::{Child, Command},
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

use crate::config::{BackendKind, EffectiveConfig};
use crate::control::{self, SignalKind};
use crate::error::SupervisorError;
use crate::logs::{self, LogPaths};
use crate::port;
use crate::registry::{self, ProcessRecord, Registry};

/// Budget for the child to prove it survives startup.
const READY_MAX_WAIT: Duration = Duration::from_secs(5);

/// Poll cadence for the readiness probe.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Grace allowed for a taken-over occupant to die after SIGKILL.
const TAKEOVER_KILL_WAIT: Duration = Duration::from_secs(3);

/// A confirmed-started backend: its durable record plus the live child
/// handle (waited on in foreground mode, dropped in daemon mode).
#[derive(Debug)]
pub struct LaunchedBackend {
    /// The record that was written to the registry.
    pub record: ProcessRecord,
    /// Handle on the spawned server process.
    pub child: Child,
}

/// Builds the server argv for the selected backend strategy.
pub fn build_argv(config: &EffectiveConfig) -> Result<Vec<String>, SupervisorError> {
    let Some(app) = config.app.as_deref() else {
        return Err(SupervisorError::validation(
            "no application target configured (set `app` in servus.yaml or pass --app)",
        ));
    };

    let mut argv = vec![config.program.clone(), app.to_string()];

    match config.backend {
        BackendKind::Single => {
            argv.push("--host".into());
            argv.push(config.host.clone());
            argv.push("--port".into());
            argv.push(config.port.to_string());
            if config.reload {
                argv.push("--reload".into());
                for dir in &config.reload_dirs {
                    argv.push("--reload-dir".into());
                    argv.push(dir.clone());
                }
            }
        }
        BackendKind::Prefork => {
            argv.push("--workers".into());
            argv.push(config.workers.to_string());
            argv.push("--bind".into());
            argv.push(format!("{}:{}", config.host, config.port));
            if let Some(max_requests) = config.max_requests {
                argv.push("--max-requests".into());
                argv.push(max_requests.to_string());
            }
            if let Some(jitter) = config.max_requests_jitter {
                argv.push("--max-requests-jitter".into());
                argv.push(jitter.to_string());
            }
            if let Some(worker_class) = &config.worker_class {
                argv.push("--worker-class".into());
                argv.push(worker_class.clone());
            }
            argv.push("--graceful-timeout".into());
            argv.push(config.graceful_timeout.to_string());
        }
    }

    argv.push("--log-level".into());
    argv.push(config.log_level.clone());

    Ok(argv)
}

/// Starts the supervised server and records it in the registry once it has
/// confirmed readiness. No durable state is touched before validation and
/// the port preflight pass.
pub fn launch(
    config: &EffectiveConfig,
    registry: &Registry,
    takeover: bool,
) -> Result<LaunchedBackend, SupervisorError> {
    let argv = build_argv(config)?;

    if port::is_port_in_use(&config.host, config.port) {
        if takeover {
            take_over_port(config)?;
        } else {
            return Err(SupervisorError::PortConflict {
                port: config.port,
                occupant: port::occupant(config.port),
            });
        }
    }

    debug!("Launching {} backend: {:?}", config.backend, argv);

    let mut child = Command::new(&argv[0])
        .args(&argv[1..])
        .spawn()
        .map_err(|e| SupervisorError::LaunchFailure {
            backend: config.backend,
            detail: format!("failed to spawn '{}': {e}", argv[0]),
        })?;

    wait_for_ready(&mut child, config)?;

    let pid = child.id();
    let started_at = registry::process_start_time(pid)
        .unwrap_or_else(|| chrono::Utc::now().timestamp());
    let record = ProcessRecord {
        pid,
        started_at,
        command_digest: registry::command_digest(&argv),
        backend: config.backend,
        workers: config.workers,
    };
    registry.record(&record)?;

    info!(
        "Started {} backend on {}:{} (PID {pid})",
        config.backend, config.host, config.port
    );

    Ok(LaunchedBackend { record, child })
}

/// Polls the freshly spawned child until it stays alive across consecutive
/// polls or exits. An exit before readiness is a launch failure carrying
/// whatever diagnostic the child left behind.
fn wait_for_ready(
    child: &mut Child,
    config: &EffectiveConfig,
) -> Result<(), SupervisorError> {
    let deadline = Instant::now() + READY_MAX_WAIT;
    let mut seen_alive_once = false;

    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Err(early_exit_failure(config, status)),
            Ok(None) => {
                if seen_alive_once {
                    return Ok(());
                }
                seen_alive_once = true;
            }
            Err(e) => {
                return Err(SupervisorError::LaunchFailure {
                    backend: config.backend,
                    detail: format!("failed to probe child state: {e}"),
                });
            }
        }

        if Instant::now() >= deadline {
            return Ok(());
        }

        thread::sleep(READY_POLL_INTERVAL);
    }
}

fn early_exit_failure(
    config: &EffectiveConfig,
    status: std::process::ExitStatus,
) -> SupervisorError {
    let mut detail = match status.code() {
        Some(code) => {
            format!("process exited with status {code} before confirming readiness")
        }
        None => "process was terminated by a signal before confirming readiness"
            .to_string(),
    };

    // In daemon mode the child's stderr has already been pointed at the
    // error log; surface its last lines as the diagnostic.
    let error_log = LogPaths::new(&config.runtime_dir).error;
    if let Ok(lines) = logs::tail(&error_log, 5)
        && !lines.is_empty()
    {
        detail.push_str(": ");
        detail.push_str(&lines.join(" | "));
    }

    SupervisorError::LaunchFailure {
        backend: config.backend,
        detail,
    }
}

/// Explicitly-requested takeover: terminate whatever holds the port, then
/// proceed. Refuses when the occupant cannot even be identified.
fn take_over_port(config: &EffectiveConfig) -> Result<(), SupervisorError> {
    let Some(pid) = port::occupant_pid(config.port) else {
        return Err(SupervisorError::PortConflict {
            port: config.port,
            occupant: None,
        });
    };

    warn!("Taking over port {} from PID {pid}", config.port);
    control::send(pid, SignalKind::Terminate)?;

    let graceful = Duration::from_secs(config.graceful_timeout);
    if port::wait_for_port_free(&config.host, config.port, graceful) {
        return Ok(());
    }

    warn!("Port occupant {pid} ignored termination; sending kill");
    control::send(pid, SignalKind::Kill)?;
    if port::wait_for_port_free(&config.host, config.port, TAKEOVER_KILL_WAIT) {
        return Ok(());
    }

    Err(SupervisorError::PortConflict {
        port: config.port,
        occupant: port::occupant(config.port),
    })
}
