//! Bind-address preflight checks for the backend launcher.
use std::{
    net::{TcpStream, ToSocketAddrs},
    thread,
    time::{Duration, Instant},
};
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const FREE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Whether something is already accepting connections on `host:port`.
pub fn is_port_in_use(host: &str, port: u16) -> bool {
    // An unspecified bind address is only reachable via loopback.
    let probe_host = match host {
        "0.0.0.0" | "::" => "127.0.0.1",
        other => other,
    };

    let Ok(addrs) = (probe_host, port).to_socket_addrs() else {
        return false;
    };

    for addr in addrs {
        if TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).is_ok() {
            return true;
        }
    }

    false
}

/// Polls until the port stops accepting connections or the timeout expires.
/// Used after a stop so an immediate restart does not race the dying server.
pub fn wait_for_port_free(host: &str, port: u16, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !is_port_in_use(host, port) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(FREE_POLL_INTERVAL);
    }
}

/// Human-readable identity of the process listening on `port`, when
/// obtainable on this platform.
pub fn occupant(port: u16) -> Option<String> {
    let pid = occupant_pid(port)?;
    let name = std::fs::read_to_string(format!("/proc/{pid}/comm"))
        .map(|comm| comm.trim().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    Some(format!("{name} (pid {pid})"))
}

/// PID of the process holding a LISTEN socket on `port` (Linux only; other
/// platforms report nothing rather than guessing).
#[cfg(target_os = "linux")]
pub fn occupant_pid(port: u16) -> Option<u32> {
    let inode = listening_socket_inode(port)?;
    let target = format!("socket:[{inode}]");

    let proc_entries = std::fs::read_dir("/proc").ok()?;
    for entry in proc_entries.flatten() {
        let name = entry.file_name();
        let Ok(pid) = name.to_string_lossy().parse::<u32>() else {
            continue;
        };

        let Ok(fds) = std::fs::read_dir(entry.path().join("fd")) else {
            continue;
        };
        for fd in fds.flatten() {
            if let Ok(link) = std::fs::read_link(fd.path())
                && link.to_string_lossy() == target
            {
                return Some(pid);
            }
        }
    }

    debug!("No process found holding the listen socket on port {port}");
    None
}

#[cfg(not(target_os = "linux"))]
pub fn occupant_pid(_port: u16) -> Option<u32> {
    None
}

/// Finds the socket inode of a LISTEN entry on `port` in /proc/net/tcp{,6}.
#[cfg(target_os = "linux")]
fn listening_socket_inode(port: u16) -> Option<u64> {
    const TCP_LISTEN: &str = "0A";

    for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
        let Ok(contents) = std::fs::read_to_string(table) else {
            continue;
        };

        for line in contents.lines().skip(1) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 || fields[3] != TCP_LISTEN {
                continue;
            }

            let Some((_, local_port_hex)) = fields[1].rsplit_once(':') else {
                continue;
            };
            let Ok(local_port) = u16::from_str_radix(local_port_hex, 16) else {
                continue;
            };

            if local_port == port {
                return fields[9].parse().ok();
            }
        }
    }

    None
}
