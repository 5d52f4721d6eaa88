/// Lifecycle sentinel: the PID file whose existence keeps the worker running.
///
/// Created once at startup, existence-checked at every cycle boundary, never
/// rewritten and never removed by the worker itself.
use std::io::Write;
use std::path::{Path, PathBuf};

/// A sentinel file this process created and owns.
#[derive(Debug)]
pub struct Sentinel {
    path: PathBuf,
    pid: u32,
}

impl Sentinel {
    /// Claim the sentinel at `path` for the current process.
    ///
    /// An existing file means another instance may be running: that is an
    /// `AlreadyRunning` error unless `force_restart` is set, in which case the
    /// stale file is removed first. The new file is created exclusively so two
    /// racing starts cannot both succeed.
    pub fn acquire(path: &Path, force_restart: bool) -> Result<Self, SentinelError> {
        Self::acquire_with_pid(path, force_restart, std::process::id())
    }

    pub(crate) fn acquire_with_pid(
        path: &Path,
        force_restart: bool,
        pid: u32,
    ) -> Result<Self, SentinelError> {
        if path.exists() {
            if !force_restart {
                return Err(SentinelError::AlreadyRunning {
                    path: path.to_path_buf(),
                });
            }
            tracing::info!(path = %path.display(), "removing existing process ID file before starting");
            std::fs::remove_file(path).map_err(|e| SentinelError::Remove {
                path: path.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    SentinelError::AlreadyRunning {
                        path: path.to_path_buf(),
                    }
                } else {
                    SentinelError::Create {
                        path: path.to_path_buf(),
                        source: e,
                    }
                }
            })?;
        file.write_all(pid.to_string().as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| SentinelError::Write {
                path: path.to_path_buf(),
                source: e,
            })?;

        tracing::info!(path = %path.display(), pid, "process ID file written");
        Ok(Self {
            path: path.to_path_buf(),
            pid,
        })
    }

    /// Whether the sentinel is still present. Absence is the stop signal.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// PID written into the file at acquisition.
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

/// Read the PID recorded in a sentinel file.
///
/// `Ok(None)` when the file does not exist or does not hold a number.
pub fn read_pid(path: &Path) -> Result<Option<u32>, SentinelError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(contents.trim().parse().ok()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SentinelError::Read {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Errors from sentinel file operations. All of them are fatal at startup.
#[derive(Debug)]
pub enum SentinelError {
    /// The file already exists and force-restart was not requested.
    AlreadyRunning { path: PathBuf },
    /// Failed to remove a stale file during force-restart.
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to create the file.
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Created the file but could not write the PID.
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for SentinelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SentinelError::AlreadyRunning { path } => write!(
                f,
                "process ID file {} exists, process may already be running; process cancelled",
                path.display()
            ),
            SentinelError::Remove { path, source } => {
                write!(
                    f,
                    "failed to remove existing process ID file {}: {source}",
                    path.display()
                )
            }
            SentinelError::Create { path, source } => {
                write!(
                    f,
                    "failed to create process ID file {}: {source}",
                    path.display()
                )
            }
            SentinelError::Write { path, source } => {
                write!(
                    f,
                    "failed to write process ID file {}: {source}",
                    path.display()
                )
            }
            SentinelError::Read { path, source } => {
                write!(
                    f,
                    "failed to read process ID file {}: {source}",
                    path.display()
                )
            }
        }
    }
}

impl std::error::Error for SentinelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SentinelError::AlreadyRunning { .. } => None,
            SentinelError::Remove { source, .. } => Some(source),
            SentinelError::Create { source, .. } => Some(source),
            SentinelError::Write { source, .. } => Some(source),
            SentinelError::Read { source, .. } => Some(source),
        }
    }
}
