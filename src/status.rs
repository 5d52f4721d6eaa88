/// Operator helpers: inspect a worker's PID file and request a stop.
///
/// Both act from outside the worker process. `request_stop` is the
/// "external actor" that deletes the sentinel; the worker notices at its next
/// cycle boundary.
use crate::sentinel::{read_pid, SentinelError};
use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Snapshot of a PID file, printed as JSON by `--status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub pid_file: PathBuf,
    pub exists: bool,
    pub pid: Option<u32>,
    /// Whether a process with `pid` exists. None when there is no PID.
    pub alive: Option<bool>,
    pub checked_at: DateTime<Utc>,
}

impl StatusReport {
    pub fn to_json(&self) -> Result<String, StatusError> {
        serde_json::to_string_pretty(self).map_err(|e| StatusError::Serialize { source: e })
    }
}

/// Inspect the PID file at `path`.
pub fn inspect(path: &Path) -> Result<StatusReport, StatusError> {
    let exists = path.exists();
    let pid = if exists { read_pid(path)? } else { None };
    let alive = pid.map(process_alive);

    tracing::debug!(path = %path.display(), exists, ?pid, ?alive, "inspected process ID file");
    Ok(StatusReport {
        pid_file: path.to_path_buf(),
        exists,
        pid,
        alive,
        checked_at: Utc::now(),
    })
}

/// Outcome of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopRequest {
    /// The PID file was removed; the worker exits at its next cycle boundary.
    Requested,
    /// There was no PID file to remove.
    NotRunning,
}

/// Delete the PID file to ask the worker to stop.
pub fn request_stop(path: &Path) -> Result<StopRequest, StatusError> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::info!(path = %path.display(), "removed process ID file, stop requested");
            Ok(StopRequest::Requested)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StopRequest::NotRunning),
        Err(e) => Err(StatusError::Remove {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Signal-0 probe. EPERM still means the process exists.
fn process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Errors from the operator helpers.
#[derive(Debug)]
pub enum StatusError {
    Sentinel(SentinelError),
    Serialize {
        source: serde_json::Error,
    },
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl From<SentinelError> for StatusError {
    fn from(e: SentinelError) -> Self {
        StatusError::Sentinel(e)
    }
}

impl std::fmt::Display for StatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusError::Sentinel(e) => write!(f, "{e}"),
            StatusError::Serialize { source } => write!(f, "failed to serialize status: {source}"),
            StatusError::Remove { path, source } => {
                write!(
                    f,
                    "failed to remove process ID file {}: {source}",
                    path.display()
                )
            }
        }
    }
}

impl std::error::Error for StatusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StatusError::Sentinel(e) => Some(e),
            StatusError::Serialize { source } => Some(source),
            StatusError::Remove { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_inspect_missing_file() {
        let dir = tempdir().unwrap();
        let report = inspect(&dir.path().join("w.pid")).unwrap();
        assert!(!report.exists);
        assert_eq!(report.pid, None);
        assert_eq!(report.alive, None);
    }

    #[test]
    fn test_inspect_own_pid_is_alive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("w.pid");
        std::fs::write(&path, std::process::id().to_string()).unwrap();

        let report = inspect(&path).unwrap();
        assert!(report.exists);
        assert_eq!(report.pid, Some(std::process::id()));
        assert_eq!(report.alive, Some(true));
    }

    #[test]
    fn test_inspect_unreadable_pid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("w.pid");
        std::fs::write(&path, "junk").unwrap();

        let report = inspect(&path).unwrap();
        assert!(report.exists);
        assert_eq!(report.pid, None);
        assert_eq!(report.alive, None);
    }

    #[test]
    fn test_dead_pid_not_alive() {
        // Reap a short-lived child so its PID is known to be gone
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!process_alive(pid));
    }

    #[test]
    fn test_out_of_range_pid_not_alive() {
        assert!(!process_alive(0));
        assert!(!process_alive(u32::MAX));
    }

    #[test]
    fn test_report_json_fields() {
        let dir = tempdir().unwrap();
        let report = inspect(&dir.path().join("w.pid")).unwrap();
        let json = report.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["exists"], false);
        assert!(value["pid"].is_null());
        assert!(value["alive"].is_null());
        assert!(value["checked_at"].is_string());
    }

    #[test]
    fn test_request_stop_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("w.pid");
        std::fs::write(&path, "1").unwrap();

        assert_eq!(request_stop(&path).unwrap(), StopRequest::Requested);
        assert!(!path.exists());
        assert_eq!(request_stop(&path).unwrap(), StopRequest::NotRunning);
    }
}
