//! Servus is a lifecycle supervisor for locally-run application servers. It
//! starts a server in the foreground or as a background daemon, tracks it
//! through a durable PID record, relays control signals for graceful stops
//! and reloads, and samples live resource usage of the server and its worker
//! processes. Effective settings are resolved from six layered sources.

/// CLI interface.
pub mod cli;

/// Configuration resolution.
pub mod config;

/// Signal control and graceful shutdown.
pub mod control;

/// Daemonization.
pub mod daemon;

/// Error handling.
pub mod error;

/// Backend launching.
pub mod launcher;

/// Runtime log files.
pub mod logs;

/// Worker status monitoring.
pub mod monitor;

/// Bind-address preflight checks.
pub mod port;

/// Durable record of the supervised process.
pub mod registry;

#[doc(hidden)]
pub mod test_utils;
