//! Configuration resolution for servus.
//!
//! Effective settings are merged from six layered sources, highest precedence
//! last: compiled defaults, the manifest base section, the selected named
//! environment section, the project `.env` file, process environment
//! variables, and explicitly-passed CLI arguments. A field left unset in a
//! higher layer never clears a value provided by a lower layer.
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::error::SupervisorError;

/// Prefix for configuration environment variables (`SERVUS_PORT`, ...).
pub const ENV_PREFIX: &str = "SERVUS_";

/// Manifest file name looked up in the project directory.
pub const MANIFEST_FILE: &str = "servus.yaml";

/// `.env` file name looked up in the project directory.
pub const DOTENV_FILE: &str = ".env";

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_WORKERS: u32 = 1;
const DEFAULT_GRACEFUL_TIMEOUT_SECS: u64 = 10;
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_RUNTIME_DIR: &str = "runtime";

/// Process topology used to run the supervised server.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumString,
    AsRefStr,
    Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BackendKind {
    /// One server process, optionally restarting itself on source changes.
    Single,
    /// One master process forking N request-handling workers.
    Prefork,
}

impl BackendKind {
    /// Whether the host platform can run this backend at all. The pre-fork
    /// topology requires Unix fork semantics.
    pub fn supported_on_host(&self) -> bool {
        match self {
            BackendKind::Single => true,
            BackendKind::Prefork => cfg!(unix),
        }
    }

    /// Server executable used when the manifest does not override `program`.
    pub fn default_program(&self) -> &'static str {
        match self {
            BackendKind::Single => "uvicorn",
            BackendKind::Prefork => "gunicorn",
        }
    }
}

/// Output format for the supervised server's log stream.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    EnumString,
    AsRefStr,
    Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output.
    #[default]
    Pretty,
    /// Line-delimited JSON.
    Json,
}

/// One sparse configuration layer. Every field is optional so that merging
/// can distinguish "not provided" from an explicit value, including an
/// explicit `false` for the boolean flags.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ConfigOverlay {
    /// Application target handed to the server program (e.g. `main:app`).
    pub app: Option<String>,
    /// Server executable, overriding the backend's default program.
    pub program: Option<String>,
    /// Network bind address.
    pub host: Option<String>,
    /// Network bind port.
    pub port: Option<u16>,
    /// Backend process topology.
    pub backend: Option<BackendKind>,
    /// Worker process count (pre-fork backend).
    pub workers: Option<u32>,
    /// Whether the server should watch sources and reload itself.
    pub reload: Option<bool>,
    /// Directories the reloading server should watch.
    pub reload_dirs: Option<Vec<String>>,
    /// Whether to detach into a background daemon at start.
    pub daemon: Option<bool>,
    /// Seconds to wait for in-flight work before force-terminating.
    pub graceful_timeout: Option<u64>,
    /// Requests a worker handles before the master retires it.
    pub max_requests: Option<u32>,
    /// Random offset added to `max_requests` to stagger worker retirement.
    pub max_requests_jitter: Option<u32>,
    /// Worker class identifier passed through to the pre-fork server.
    pub worker_class: Option<String>,
    /// Server log verbosity.
    pub log_level: Option<String>,
    /// Server log output format.
    pub log_format: Option<LogFormat>,
    /// Directory holding the PID record and log files.
    pub runtime_dir: Option<PathBuf>,
}

impl ConfigOverlay {
    /// Applies `other` on top of this layer: fields present in `other` win,
    /// fields absent in `other` keep whatever this layer already holds.
    pub fn apply(&mut self, other: &ConfigOverlay) {
        if other.app.is_some() {
            self.app = other.app.clone();
        }
        if other.program.is_some() {
            self.program = other.program.clone();
        }
        if other.host.is_some() {
            self.host = other.host.clone();
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.backend.is_some() {
            self.backend = other.backend;
        }
        if other.workers.is_some() {
            self.workers = other.workers;
        }
        if other.reload.is_some() {
            self.reload = other.reload;
        }
        if other.reload_dirs.is_some() {
            self.reload_dirs = other.reload_dirs.clone();
        }
        if other.daemon.is_some() {
            self.daemon = other.daemon;
        }
        if other.graceful_timeout.is_some() {
            self.graceful_timeout = other.graceful_timeout;
        }
        if other.max_requests.is_some() {
            self.max_requests = other.max_requests;
        }
        if other.max_requests_jitter.is_some() {
            self.max_requests_jitter = other.max_requests_jitter;
        }
        if other.worker_class.is_some() {
            self.worker_class = other.worker_class.clone();
        }
        if other.log_level.is_some() {
            self.log_level = other.log_level.clone();
        }
        if other.log_format.is_some() {
            self.log_format = other.log_format;
        }
        if other.runtime_dir.is_some() {
            self.runtime_dir = other.runtime_dir.clone();
        }
    }
}

/// Parsed project manifest: base keys at the top level, named environment
/// overlays under `envs:`.
#[derive(Debug, Default, Deserialize)]
pub struct Manifest {
    /// Named environment sections. Fields missing from a section inherit
    /// from the base section.
    #[serde(default)]
    pub envs: HashMap<String, ConfigOverlay>,
    /// Base (default) section.
    #[serde(flatten)]
    pub base: ConfigOverlay,
}

/// Immutable effective configuration produced by [`resolve`]. Exactly one
/// value per field; the optional backend tuning keys stay optional because
/// "absent" is meaningful for them.
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    /// Application target handed to the server program, when configured.
    pub app: Option<String>,
    /// Server executable for the selected backend.
    pub program: String,
    /// Network bind address.
    pub host: String,
    /// Network bind port.
    pub port: u16,
    /// Backend process topology.
    pub backend: BackendKind,
    /// Worker process count.
    pub workers: u32,
    /// Whether the server watches sources and reloads itself.
    pub reload: bool,
    /// Directories the reloading server watches.
    pub reload_dirs: Vec<String>,
    /// Whether start detaches into a background daemon.
    pub daemon: bool,
    /// Graceful-shutdown timeout in seconds.
    pub graceful_timeout: u64,
    /// Requests a worker handles before retirement, when configured.
    pub max_requests: Option<u32>,
    /// Retirement jitter, when configured.
    pub max_requests_jitter: Option<u32>,
    /// Worker class identifier, when configured.
    pub worker_class: Option<String>,
    /// Server log verbosity.
    pub log_level: String,
    /// Server log output format.
    pub log_format: LogFormat,
    /// Absolute runtime directory for the PID record and log files.
    pub runtime_dir: PathBuf,
    /// Selected named environment, if any.
    pub env_name: Option<String>,
}

/// Resolves the effective configuration for a project.
///
/// `cli` carries only the fields the caller explicitly passed; an unset CLI
/// flag never masks a value set by a lower layer. Selecting an environment
/// name with no matching manifest section is an error, not a fallback.
pub fn resolve(
    project_dir: &Path,
    cli: &ConfigOverlay,
    env_name: Option<&str>,
) -> Result<EffectiveConfig, SupervisorError> {
    let manifest = load_manifest(project_dir)?;

    let mut merged = ConfigOverlay::default();
    merged.apply(&manifest.base);

    if let Some(name) = env_name {
        let Some(section) = manifest.envs.get(name) else {
            let mut available: Vec<String> = manifest.envs.keys().cloned().collect();
            available.sort();
            return Err(SupervisorError::UnknownEnvironment {
                name: name.to_string(),
                available,
            });
        };
        merged.apply(section);
    }

    merged.apply(&load_dotenv_overlay(project_dir)?);
    merged.apply(&env_overlay()?);
    merged.apply(cli);

    EffectiveConfig::from_overlay(merged, env_name, project_dir)
}

impl EffectiveConfig {
    /// Fills compiled defaults for unset fields and validates the result.
    fn from_overlay(
        overlay: ConfigOverlay,
        env_name: Option<&str>,
        project_dir: &Path,
    ) -> Result<Self, SupervisorError> {
        let backend = overlay.backend.unwrap_or(BackendKind::Single);
        let port = overlay.port.unwrap_or(DEFAULT_PORT);
        let workers = overlay.workers.unwrap_or(DEFAULT_WORKERS);
        let log_level = overlay
            .log_level
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        if port == 0 {
            return Err(SupervisorError::validation(
                "port must lie in the range 1-65535",
            ));
        }
        if workers == 0 {
            return Err(SupervisorError::validation("workers must be at least 1"));
        }
        if !backend.supported_on_host() {
            return Err(SupervisorError::PlatformUnsupported {
                operation: format!("{backend} backend"),
            });
        }
        validate_log_level(&log_level)?;

        let runtime_dir = overlay
            .runtime_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RUNTIME_DIR));
        let runtime_dir = if runtime_dir.is_absolute() {
            runtime_dir
        } else {
            project_dir.join(runtime_dir)
        };

        let program = overlay
            .program
            .unwrap_or_else(|| backend.default_program().to_string());

        Ok(Self {
            app: overlay.app,
            program,
            host: overlay.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            backend,
            workers,
            reload: overlay.reload.unwrap_or(false),
            reload_dirs: overlay.reload_dirs.unwrap_or_default(),
            daemon: overlay.daemon.unwrap_or(false),
            graceful_timeout: overlay
                .graceful_timeout
                .unwrap_or(DEFAULT_GRACEFUL_TIMEOUT_SECS),
            max_requests: overlay.max_requests,
            max_requests_jitter: overlay.max_requests_jitter,
            worker_class: overlay.worker_class,
            log_level,
            log_format: overlay.log_format.unwrap_or_default(),
            runtime_dir,
            env_name: env_name.map(|name| name.to_string()),
        })
    }
}

fn validate_log_level(level: &str) -> Result<(), SupervisorError> {
    match level {
        "off" | "error" | "warn" | "info" | "debug" | "trace" => Ok(()),
        other => Err(SupervisorError::validation(format!(
            "unrecognized log level '{other}'"
        ))),
    }
}

/// Loads and parses the project manifest, expanding `${VAR}` references from
/// the process environment. A missing manifest yields an empty one.
pub fn load_manifest(project_dir: &Path) -> Result<Manifest, SupervisorError> {
    let path = project_dir.join(MANIFEST_FILE);
    if !path.exists() {
        return Ok(Manifest::default());
    }

    let content = fs::read_to_string(&path).map_err(|e| {
        SupervisorError::ManifestRead(std::io::Error::new(
            e.kind(),
            format!("{} ({})", e, path.display()),
        ))
    })?;

    let expanded = expand_env_vars(&content)?;
    Ok(serde_yaml::from_str(&expanded)?)
}

/// Expands environment variables within a string. An unset variable is a
/// validation error rather than an empty substitution.
fn expand_env_vars(input: &str) -> Result<String, SupervisorError> {
    let re = Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?").unwrap();
    let mut missing: Option<String> = None;
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                missing.get_or_insert_with(|| var_name.to_string());
                String::new()
            }
        }
    });

    if let Some(name) = missing {
        return Err(SupervisorError::validation(format!(
            "manifest references unset environment variable: {name}"
        )));
    }

    Ok(result.to_string())
}

/// Builds the overlay contributed by the project `.env` file. Only
/// `SERVUS_`-prefixed keys participate; other entries belong to the
/// application, not the supervisor.
pub fn load_dotenv_overlay(project_dir: &Path) -> Result<ConfigOverlay, SupervisorError> {
    let path = project_dir.join(DOTENV_FILE);
    if !path.exists() {
        return Ok(ConfigOverlay::default());
    }

    let content = fs::read_to_string(&path)?;
    let mut entries = Vec::new();

    for raw_line in content.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim().to_string();
            let mut value = value.trim().to_string();

            if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
                value = value[1..value.len() - 1].to_string();
            }

            entries.push((key, value));
        } else {
            tracing::warn!("Ignoring malformed line in {}: {}", path.display(), line);
        }
    }

    overlay_from_entries(entries)
}

/// Builds the overlay contributed by the process environment.
pub fn env_overlay() -> Result<ConfigOverlay, SupervisorError> {
    overlay_from_entries(env::vars())
}

/// Maps `SERVUS_*` key/value pairs onto overlay fields. Presence of a key is
/// what marks a field as set, so an empty value is distinguishable from an
/// absent variable. Malformed numeric or enum values are validation errors.
fn overlay_from_entries(
    entries: impl IntoIterator<Item = (String, String)>,
) -> Result<ConfigOverlay, SupervisorError> {
    let mut overlay = ConfigOverlay::default();

    for (key, value) in entries {
        let Some(field) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };

        match field.to_ascii_uppercase().as_str() {
            "APP" => overlay.app = Some(value),
            "PROGRAM" => overlay.program = Some(value),
            "HOST" => overlay.host = Some(value),
            "PORT" => overlay.port = Some(parse_number(&key, &value)?),
            "BACKEND" => {
                overlay.backend = Some(value.to_ascii_lowercase().parse().map_err(
                    |_| {
                        SupervisorError::validation(format!(
                            "{key}: unrecognized backend '{value}'"
                        ))
                    },
                )?)
            }
            "WORKERS" => overlay.workers = Some(parse_number(&key, &value)?),
            "RELOAD" => overlay.reload = Some(parse_bool(&value)),
            "RELOAD_DIRS" => overlay.reload_dirs = Some(parse_list(&value)),
            "DAEMON" => overlay.daemon = Some(parse_bool(&value)),
            "GRACEFUL_TIMEOUT" => {
                overlay.graceful_timeout = Some(parse_number(&key, &value)?)
            }
            "MAX_REQUESTS" => overlay.max_requests = Some(parse_number(&key, &value)?),
            "MAX_REQUESTS_JITTER" => {
                overlay.max_requests_jitter = Some(parse_number(&key, &value)?)
            }
            "WORKER_CLASS" => overlay.worker_class = Some(value),
            "LOG_LEVEL" => overlay.log_level = Some(value.to_ascii_lowercase()),
            "LOG_FORMAT" => {
                overlay.log_format = Some(value.to_ascii_lowercase().parse().map_err(
                    |_| {
                        SupervisorError::validation(format!(
                            "{key}: unrecognized log format '{value}'"
                        ))
                    },
                )?)
            }
            "RUNTIME_DIR" => overlay.runtime_dir = Some(PathBuf::from(value)),
            // Unrelated SERVUS_-prefixed variables (e.g. SERVUS_ENV, handled
            // elsewhere) pass through untouched.
            _ => {}
        }
    }

    Ok(overlay)
}

fn parse_number<T: std::str::FromStr>(
    key: &str,
    value: &str,
) -> Result<T, SupervisorError> {
    value.trim().parse().map_err(|_| {
        SupervisorError::validation(format!("{key}: invalid numeric value '{value}'"))
    })
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes"
    )
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}
