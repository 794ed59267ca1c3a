//! PID-file bookkeeping for `startnode`/`stopnode`/`nodestate`. Process
//! supervision proper (restart policy, daemonizing) is out of this node's
//! scope (spec.md §1 Non-goals); this is just the thin handshake those three
//! CLI commands need to agree which process is "the node" for this data
//! directory.

use std::path::{Path, PathBuf};

fn pidfile_path(data_dir: &Path) -> PathBuf {
    data_dir.join("node.pid")
}

pub fn write(data_dir: &Path) -> std::io::Result<()> {
    std::fs::write(pidfile_path(data_dir), std::process::id().to_string())
}

pub fn remove(data_dir: &Path) {
    let _ = std::fs::remove_file(pidfile_path(data_dir));
}

pub fn read(data_dir: &Path) -> Option<u32> {
    std::fs::read_to_string(pidfile_path(data_dir)).ok()?.trim().parse().ok()
}

/// Best-effort liveness check: asks the OS whether `pid` still names a
/// process, via `kill -0` (signal 0 sends nothing, just checks existence).
#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(not(unix))]
pub fn is_alive(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
pub fn terminate(pid: u32) -> std::io::Result<()> {
    let status = std::process::Command::new("kill").args(["-TERM", &pid.to_string()]).status()?;
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::new(std::io::ErrorKind::Other, "kill did not report success"))
    }
}

#[cfg(not(unix))]
pub fn terminate(_pid: u32) -> std::io::Result<()> {
    Err(std::io::Error::new(std::io::ErrorKind::Unsupported, "process signalling is unix-only"))
}
