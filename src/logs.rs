//! Runtime log files for the supervised server.
//!
//! Three well-known files live under `<runtime_dir>/logs`: the application
//! log, the access log, and the error log. Daemon mode points the supervised
//! process's stdout at the access log and stderr at the error log.
use std::{
    fs::{self, File},
    io::{self, BufRead, BufReader, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

/// Directory under the runtime dir holding the log files.
pub const LOGS_DIR: &str = "logs";

/// Application log file name.
pub const APP_LOG: &str = "servus.log";

/// Access log file name (daemon stdout).
pub const ACCESS_LOG: &str = "access.log";

/// Error log file name (daemon stderr).
pub const ERROR_LOG: &str = "error.log";

const FOLLOW_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Resolved paths of the three runtime log files.
#[derive(Debug, Clone)]
pub struct LogPaths {
    /// Application log.
    pub app: PathBuf,
    /// Access log (daemon stdout).
    pub access: PathBuf,
    /// Error log (daemon stderr).
    pub error: PathBuf,
}

impl LogPaths {
    /// Lays out the log paths under a runtime directory.
    pub fn new(runtime_dir: &Path) -> Self {
        let dir = runtime_dir.join(LOGS_DIR);
        Self {
            app: dir.join(APP_LOG),
            access: dir.join(ACCESS_LOG),
            error: dir.join(ERROR_LOG),
        }
    }

    /// Creates the logs directory.
    pub fn ensure(&self) -> io::Result<()> {
        if let Some(parent) = self.access.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// All three paths, for cleanup.
    pub fn all(&self) -> [&PathBuf; 3] {
        [&self.app, &self.access, &self.error]
    }
}

/// Returns the last `lines` lines of a log file. A missing file simply has
/// no lines.
pub fn tail(path: &Path, lines: usize) -> io::Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let all_lines: Vec<String> = reader.lines().map_while(Result::ok).collect();

    let start = all_lines.len().saturating_sub(lines);
    Ok(all_lines[start..].to_vec())
}

/// Prints the last `lines` lines, then keeps printing appended content until
/// Ctrl+C. Truncation (log rotation) restarts from the top of the file.
pub fn follow(path: &Path, lines: usize) -> io::Result<()> {
    for line in tail(path, lines)? {
        println!("{line}");
    }

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
        .map_err(|e| io::Error::other(e.to_string()))?;

    let mut position = fs::metadata(path).map(|meta| meta.len()).unwrap_or(0);

    while running.load(Ordering::SeqCst) {
        thread::sleep(FOLLOW_POLL_INTERVAL);

        let Ok(meta) = fs::metadata(path) else {
            continue;
        };
        let len = meta.len();

        if len < position {
            position = 0;
        }
        if len == position {
            continue;
        }

        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(position))?;
        let mut fresh = String::new();
        file.read_to_string(&mut fresh)?;
        position = len;

        print!("{fresh}");
    }

    Ok(())
}
