//! Command-line interface for servus.
use std::{fmt, str::FromStr};

use clap::{Args, Parser, Subcommand};
use tracing::level_filters::LevelFilter;

use crate::config::{BackendKind, ConfigOverlay};

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// Canonical string representation.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let lowercase = trimmed.to_ascii_lowercase();
        let level = match lowercase.as_str() {
            "off" => Some(LevelFilter::OFF),
            "error" | "err" => Some(LevelFilter::ERROR),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "info" | "information" => Some(LevelFilter::INFO),
            "debug" => Some(LevelFilter::DEBUG),
            "trace" => Some(LevelFilter::TRACE),
            _ => None,
        }
        .ok_or_else(|| format!("invalid log level '{trimmed}'"))?;

        Ok(LogLevelArg(level))
    }
}

/// Which runtime log file to display.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogKind {
    /// Application log
    #[default]
    App,
    /// Access log (daemon stdout)
    Access,
    /// Error log (daemon stderr)
    Error,
}

impl LogKind {
    /// String representation for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::App => "app",
            LogKind::Access => "access",
            LogKind::Error => "error",
        }
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LogKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "app" => Ok(LogKind::App),
            "access" => Ok(LogKind::Access),
            "error" => Ok(LogKind::Error),
            _ => Err(format!(
                "invalid log kind '{}', must be one of: app, access, error",
                s
            )),
        }
    }
}

/// Command-line interface for servus.
#[derive(Parser)]
#[command(name = "servus", version, author)]
#[command(about = "A lifecycle supervisor for locally-run application servers", long_about = None)]
pub struct Cli {
    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for servus.
#[derive(Subcommand)]
pub enum Commands {
    /// Start a development server (single backend, reload enabled).
    Dev(DevArgs),

    /// Start the server per the resolved configuration.
    Start(StartArgs),

    /// Stop the running server.
    Stop(StopArgs),

    /// Restart the running server in the same mode.
    Restart(RestartArgs),

    /// Show the status of the running server.
    Status(StatusArgs),

    /// Ask the running server to re-read code and configuration.
    Reload(ReloadArgs),

    /// Show server logs.
    Logs(LogsArgs),

    /// Continuously monitor the server and its workers.
    Monitor(MonitorArgs),

    /// Show the resolved effective configuration.
    Config(ConfigArgs),

    /// Clean runtime files (PID record, logs).
    Clean(CleanArgs),
}

/// Arguments for the `dev` command.
#[derive(Args)]
pub struct DevArgs {
    /// Application target handed to the server (e.g. 'main:app').
    #[arg(short, long)]
    pub app: Option<String>,

    /// Bind host.
    #[arg(long)]
    pub host: Option<String>,

    /// Bind port.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Enable auto-reload (on unless explicitly disabled).
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_name = "BOOL")]
    pub reload: Option<bool>,

    /// Directories to watch for reload (comma-separated).
    #[arg(long, value_name = "DIRS")]
    pub reload_dirs: Option<String>,

    /// Server log level.
    #[arg(short = 'l', long, value_name = "LEVEL")]
    pub log_level: Option<LogLevelArg>,

    /// Named environment from the manifest (e.g. staging, prod).
    #[arg(short, long)]
    pub env: Option<String>,
}

impl DevArgs {
    /// CLI-layer overlay. The dev command always decides reload (defaulting
    /// to enabled) and pins the single backend.
    pub fn overlay(&self) -> ConfigOverlay {
        ConfigOverlay {
            app: self.app.clone(),
            host: self.host.clone(),
            port: self.port,
            backend: Some(BackendKind::Single),
            reload: Some(self.reload.unwrap_or(true)),
            reload_dirs: self.reload_dirs.as_deref().map(split_list),
            log_level: self.log_level.map(|level| level.as_str().to_string()),
            ..ConfigOverlay::default()
        }
    }
}

/// Arguments for the `start` command.
#[derive(Args)]
pub struct StartArgs {
    /// Application target handed to the server (e.g. 'main:app').
    #[arg(short, long)]
    pub app: Option<String>,

    /// Bind host.
    #[arg(long)]
    pub host: Option<String>,

    /// Bind port.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Backend kind (single or prefork).
    #[arg(short, long)]
    pub backend: Option<BackendKind>,

    /// Number of worker processes (prefork backend).
    #[arg(short, long)]
    pub workers: Option<u32>,

    /// Run as a background daemon. Omitting the flag leaves the decision to
    /// lower configuration layers.
    #[arg(short, long, num_args = 0..=1, default_missing_value = "true", value_name = "BOOL")]
    pub daemon: Option<bool>,

    /// Graceful-shutdown timeout in seconds.
    #[arg(long, value_name = "SECS")]
    pub graceful_timeout: Option<u64>,

    /// Max requests per worker before retirement (prefork backend).
    #[arg(long)]
    pub max_requests: Option<u32>,

    /// Random retirement jitter (prefork backend).
    #[arg(long)]
    pub max_requests_jitter: Option<u32>,

    /// Worker class passed through to the prefork server.
    #[arg(long)]
    pub worker_class: Option<String>,

    /// Server log level.
    #[arg(short = 'l', long, value_name = "LEVEL")]
    pub log_level: Option<LogLevelArg>,

    /// Named environment from the manifest (e.g. staging, prod).
    #[arg(short, long)]
    pub env: Option<String>,

    /// Take over the port from whatever currently occupies it.
    #[arg(long)]
    pub takeover: bool,
}

impl StartArgs {
    /// CLI-layer overlay carrying only explicitly-passed fields.
    pub fn overlay(&self) -> ConfigOverlay {
        ConfigOverlay {
            app: self.app.clone(),
            host: self.host.clone(),
            port: self.port,
            backend: self.backend,
            workers: self.workers,
            daemon: self.daemon,
            graceful_timeout: self.graceful_timeout,
            max_requests: self.max_requests,
            max_requests_jitter: self.max_requests_jitter,
            worker_class: self.worker_class.clone(),
            log_level: self.log_level.map(|level| level.as_str().to_string()),
            ..ConfigOverlay::default()
        }
    }
}

/// Arguments for the `stop` command.
#[derive(Args)]
pub struct StopArgs {
    /// Kill immediately instead of requesting graceful shutdown.
    #[arg(short, long)]
    pub force: bool,

    /// Override the configured graceful-shutdown timeout in seconds.
    #[arg(short, long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Named environment from the manifest (e.g. staging, prod).
    #[arg(short, long)]
    pub env: Option<String>,
}

/// Arguments for the `restart` command.
#[derive(Args)]
pub struct RestartArgs {
    /// Override the configured graceful-shutdown timeout in seconds.
    #[arg(short, long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Named environment from the manifest (e.g. staging, prod).
    #[arg(short, long)]
    pub env: Option<String>,
}

/// Arguments for the `status` command.
#[derive(Args)]
pub struct StatusArgs {
    /// Include per-worker detail.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit machine-readable JSON output instead of text.
    #[arg(long)]
    pub json: bool,

    /// Named environment from the manifest (e.g. staging, prod).
    #[arg(short, long)]
    pub env: Option<String>,
}

/// Arguments for the `reload` command.
#[derive(Args)]
pub struct ReloadArgs {
    /// Named environment from the manifest (e.g. staging, prod).
    #[arg(short, long)]
    pub env: Option<String>,
}

/// Arguments for the `logs` command.
#[derive(Args)]
pub struct LogsArgs {
    /// Number of lines to show.
    #[arg(short = 'n', long, default_value_t = 100)]
    pub lines: usize,

    /// Follow the log for new content.
    #[arg(short, long)]
    pub follow: bool,

    /// Kind of log to show: app, access, or error.
    #[arg(short = 'k', long, default_value_t = LogKind::default())]
    pub kind: LogKind,

    /// Named environment from the manifest (e.g. staging, prod).
    #[arg(short, long)]
    pub env: Option<String>,
}

/// Arguments for the `monitor` command.
#[derive(Args)]
pub struct MonitorArgs {
    /// Refresh interval in seconds.
    #[arg(short, long, default_value_t = 1.0, value_name = "SECS")]
    pub refresh: f64,

    /// Named environment from the manifest (e.g. staging, prod).
    #[arg(short, long)]
    pub env: Option<String>,
}

/// Arguments for the `config` command.
#[derive(Args)]
pub struct ConfigArgs {
    /// Named environment from the manifest (e.g. staging, prod).
    #[arg(short, long)]
    pub env: Option<String>,
}

/// Arguments for the `clean` command.
#[derive(Args)]
pub struct CleanArgs {
    /// Only clean log files.
    #[arg(short = 'l', long = "logs")]
    pub logs_only: bool,

    /// Skip confirmation.
    #[arg(short, long)]
    pub yes: bool,

    /// Named environment from the manifest (e.g. staging, prod).
    #[arg(short, long)]
    pub env: Option<String>,
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
