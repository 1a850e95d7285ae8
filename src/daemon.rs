//! Daemonization: detaching the supervisor into a background session.
//!
//! The classic double fork: the first fork decouples from the invoking
//! shell, the new session drops the controlling terminal, and the second
//! fork guarantees the survivor can never reacquire one. The grandchild
//! keeps its working directory so relative paths continue resolving against
//! the project, and only its standard streams are redirected.
use std::path::Path;

use crate::error::SupervisorError;

/// Whether this platform provides the fork/session primitives daemon mode
/// needs. Callers without support fall back to foreground with a warning.
pub fn supported() -> bool {
    cfg!(unix)
}

/// Detaches the current process into a background daemon, redirecting stdin
/// from `/dev/null` and stdout/stderr to the given log files. On return the
/// caller is the surviving grandchild and launches the backend in-place.
#[cfg(unix)]
pub fn daemonize(stdout_path: &Path, stderr_path: &Path) -> Result<(), SupervisorError> {
    use std::fs::{File, OpenOptions, create_dir_all};
    use std::os::unix::io::IntoRawFd;

    // Open the redirect targets before forking so failures still reach the
    // invoking shell.
    if let Some(parent) = stdout_path.parent() {
        create_dir_all(parent)?;
    }
    if let Some(parent) = stderr_path.parent() {
        create_dir_all(parent)?;
    }

    let stdout_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(stdout_path)?;
    let stderr_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(stderr_path)?;
    let devnull = File::open("/dev/null")?;

    match unsafe { libc::fork() } {
        -1 => return Err(std::io::Error::last_os_error().into()),
        0 => {}
        _ => std::process::exit(0),
    }

    if unsafe { libc::setsid() } < 0 {
        return Err(std::io::Error::last_os_error().into());
    }

    match unsafe { libc::fork() } {
        -1 => return Err(std::io::Error::last_os_error().into()),
        0 => {}
        _ => std::process::exit(0),
    }

    let stdin_fd = devnull.into_raw_fd();
    let stdout_fd = stdout_file.into_raw_fd();
    let stderr_fd = stderr_file.into_raw_fd();

    unsafe {
        if libc::dup2(stdin_fd, libc::STDIN_FILENO) < 0
            || libc::dup2(stdout_fd, libc::STDOUT_FILENO) < 0
            || libc::dup2(stderr_fd, libc::STDERR_FILENO) < 0
        {
            return Err(std::io::Error::last_os_error().into());
        }

        libc::close(stdin_fd);
        libc::close(stdout_fd);
        libc::close(stderr_fd);
    }

    Ok(())
}

/// Platforms without fork/session primitives refuse outright; a partial
/// emulation (e.g. a background thread) would not survive the parent's exit.
#[cfg(not(unix))]
pub fn daemonize(
    _stdout_path: &Path,
    _stderr_path: &Path,
) -> Result<(), SupervisorError> {
    Err(SupervisorError::PlatformUnsupported {
        operation: "daemonization".to_string(),
    })
}
