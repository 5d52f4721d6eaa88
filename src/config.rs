use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "pollworker.toml";

/// Top-level configuration loaded from pollworker.toml.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub sentinel: SentinelConfig,
    pub poll: PollConfig,
    pub work: WorkConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SentinelConfig {
    pub pid_file: PathBuf,
    pub force_restart: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PollConfig {
    pub wait_interval_secs: u64,
    pub on_error: OnError,
    /// Only consulted in `continue` mode. 0 = unlimited.
    pub max_consecutive_failures: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkConfig {
    /// Program to run each cycle. Empty selects the built-in heartbeat.
    pub command: String,
    pub args: Vec<String>,
}

/// What the worker does when a unit of work returns an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    /// Stop the worker and exit non-zero.
    #[default]
    Fatal,
    /// Log the failure and carry on with the next cycle.
    Continue,
}

impl std::fmt::Display for OnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OnError::Fatal => write!(f, "fatal"),
            OnError::Continue => write!(f, "continue"),
        }
    }
}

// --- Default implementations ---

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            pid_file: std::env::temp_dir().join("pollworker.pid"),
            force_restart: false,
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            wait_interval_secs: 10,
            on_error: OnError::Fatal,
            max_consecutive_failures: 0,
        }
    }
}

/// Values supplied on the command line. `None` leaves the file/default value alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub pid_file: Option<PathBuf>,
    pub wait_interval_secs: Option<u64>,
    pub force_restart: Option<bool>,
    pub on_error: Option<OnError>,
    pub max_consecutive_failures: Option<u32>,
    pub command: Vec<String>,
}

impl WorkerConfig {
    /// Load configuration.
    ///
    /// With an explicit path the file must exist. Without one, `pollworker.toml`
    /// in the working directory is used if present, otherwise the defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::from_file(path)
                } else {
                    tracing::debug!("no config file found, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    /// Parse a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Layer command-line values over the loaded configuration.
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(pid_file) = overrides.pid_file {
            self.sentinel.pid_file = pid_file;
        }
        if let Some(force) = overrides.force_restart {
            self.sentinel.force_restart = force;
        }
        if let Some(secs) = overrides.wait_interval_secs {
            self.poll.wait_interval_secs = secs;
        }
        if let Some(on_error) = overrides.on_error {
            self.poll.on_error = on_error;
        }
        if let Some(max) = overrides.max_consecutive_failures {
            self.poll.max_consecutive_failures = max;
        }
        if let Some((command, args)) = overrides.command.split_first() {
            self.work.command = command.clone();
            self.work.args = args.to_vec();
        }
    }

    /// Render the resolved configuration as a TOML document.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Render { source: e })
    }

    /// Reject values the worker cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sentinel.pid_file.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "pid_file",
                reason: "must not be empty".to_string(),
            });
        }
        if self.poll.wait_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "wait_interval_secs",
                reason: "must be a positive number of seconds".to_string(),
            });
        }
        if self.work.command.trim().is_empty() && !self.work.args.is_empty() {
            return Err(ConfigError::Invalid {
                field: "work.args",
                reason: "given without a work.command".to_string(),
            });
        }
        Ok(())
    }
}

/// Interpret a loose boolean: `yes`, `true`, `t` and `1` (any case) are true,
/// everything else is false.
pub fn parse_flag(value: &str) -> Result<bool, std::convert::Infallible> {
    Ok(matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "yes" | "true" | "t" | "1"
    ))
}

/// Errors from loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid {
        field: &'static str,
        reason: String,
    },
    Render {
        source: toml::ser::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config file {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "invalid config file {}: {source}", path.display())
            }
            ConfigError::Invalid { field, reason } => {
                write!(f, "invalid configuration: {field} {reason}")
            }
            ConfigError::Render { source } => {
                write!(f, "failed to render configuration: {source}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Render { source } => Some(source),
            ConfigError::Invalid { .. } => None,
        }
    }
}
