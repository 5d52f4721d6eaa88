/// Built-in units of work: a heartbeat line and an external command.
use crate::config::WorkConfig;
use crate::worker::UnitOfWork;
use chrono::{DateTime, Local};
use std::io::Write;
use std::process::Stdio;
use tokio::process::Command;

/// Prints a timestamped greeting each cycle. Fails only if stdout is gone.
#[derive(Debug, Default)]
pub struct Heartbeat;

impl Heartbeat {
    fn line(now: DateTime<Local>) -> String {
        format!("Hello, World background {}", now.format("%H:%M:%S"))
    }
}

impl UnitOfWork for Heartbeat {
    fn name(&self) -> &str {
        "heartbeat"
    }

    async fn perform(&mut self, _cycle: u64) -> Result<(), WorkError> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "{}", Self::line(Local::now()))
            .and_then(|()| out.flush())
            .map_err(|e| WorkError::Output { source: e })
    }
}

/// Runs an external program once per cycle and waits for it to exit.
///
/// Output goes straight to the worker's own stdout/stderr. `{cycle}` in any
/// argument is replaced with the 1-based cycle number.
#[derive(Debug, Clone)]
pub struct CommandWork {
    command: String,
    args: Vec<String>,
}

impl CommandWork {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    fn build_args(&self, cycle: u64) -> Vec<String> {
        let cycle = cycle.to_string();
        self.args
            .iter()
            .map(|arg| arg.replace("{cycle}", &cycle))
            .collect()
    }
}

impl UnitOfWork for CommandWork {
    fn name(&self) -> &str {
        &self.command
    }

    async fn perform(&mut self, cycle: u64) -> Result<(), WorkError> {
        let args = self.build_args(cycle);
        tracing::debug!(command = %self.command, args = ?args, cycle, "running work command");

        let status = Command::new(&self.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| WorkError::Spawn {
                command: self.command.clone(),
                source: e,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(WorkError::Failed {
                command: self.command.clone(),
                exit_code: status.code(),
            })
        }
    }
}

/// The unit of work selected by configuration.
#[derive(Debug)]
pub enum ConfiguredWork {
    Heartbeat(Heartbeat),
    Command(CommandWork),
}

impl ConfiguredWork {
    pub fn from_config(config: &WorkConfig) -> Self {
        if config.command.trim().is_empty() {
            ConfiguredWork::Heartbeat(Heartbeat)
        } else {
            ConfiguredWork::Command(CommandWork::new(&config.command, config.args.clone()))
        }
    }
}

impl UnitOfWork for ConfiguredWork {
    fn name(&self) -> &str {
        match self {
            ConfiguredWork::Heartbeat(w) => w.name(),
            ConfiguredWork::Command(w) => w.name(),
        }
    }

    async fn perform(&mut self, cycle: u64) -> Result<(), WorkError> {
        match self {
            ConfiguredWork::Heartbeat(w) => w.perform(cycle).await,
            ConfiguredWork::Command(w) => w.perform(cycle).await,
        }
    }
}

/// Errors a unit of work can report.
#[derive(Debug)]
pub enum WorkError {
    /// Failed to start the work command.
    Spawn {
        command: String,
        source: std::io::Error,
    },
    /// The command ran but did not exit successfully (None if killed by signal).
    Failed {
        command: String,
        exit_code: Option<i32>,
    },
    /// Failed to write the work's own output (e.g. stdout closed).
    Output { source: std::io::Error },
}

impl std::fmt::Display for WorkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkError::Spawn { command, source } => {
                write!(f, "failed to spawn work command {command}: {source}")
            }
            WorkError::Failed {
                command,
                exit_code: Some(code),
            } => write!(f, "work command {command} exited with status {code}"),
            WorkError::Failed {
                command,
                exit_code: None,
            } => write!(f, "work command {command} was terminated by a signal"),
            WorkError::Output { source } => write!(f, "failed to write work output: {source}"),
        }
    }
}

impl std::error::Error for WorkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WorkError::Spawn { source, .. } => Some(source),
            WorkError::Output { source } => Some(source),
            WorkError::Failed { .. } => None,
        }
    }
}
