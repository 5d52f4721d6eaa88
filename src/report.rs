/// Console banner and the single finalization step that reports a run.
///
/// A run yields exactly one `RunOutcome` (status code + message), which
/// `finalize` prints once before the process exits.
use crate::config::{ConfigError, WorkerConfig};
use crate::sentinel::SentinelError;
use crate::status::StatusError;
use crate::worker::WorkerError;
use chrono::Local;
use std::io::Write;

/// Exit status for a normal stop.
pub const EXIT_OK: i32 = 0;
/// Exit status for any startup or fatal error.
pub const EXIT_FAILURE: i32 = 99;

const RULE: &str =
    "-------------------------------------------------------------------------------";

/// Final status of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub exit_code: i32,
    pub message: String,
}

impl RunOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: EXIT_OK,
            message: message.into(),
        }
    }

    pub fn with_code(exit_code: i32, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }
}

impl From<RunError> for RunOutcome {
    fn from(err: RunError) -> Self {
        Self {
            exit_code: EXIT_FAILURE,
            message: err.to_string(),
        }
    }
}

/// Where the banner and the final status block go.
///
/// Modes whose stdout is meant for machines (`--status`) move them to stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Console {
    Stdout,
    Stderr,
}

impl Console {
    pub fn writer(self) -> Box<dyn Write> {
        match self {
            Console::Stdout => Box::new(std::io::stdout().lock()),
            Console::Stderr => Box::new(std::io::stderr().lock()),
        }
    }
}

/// Write one line to stdout. A closed stdout is logged, not fatal.
pub fn emit(line: &str) {
    let mut out = std::io::stdout().lock();
    if let Err(e) = writeln!(out, "{line}").and_then(|()| out.flush()) {
        tracing::warn!(error = %e, "failed to write to stdout");
    }
}

/// Print the start-of-processing banner.
pub fn write_start_banner(out: &mut impl Write, script: &str) -> std::io::Result<()> {
    writeln!(out, "{RULE}")?;
    writeln!(out, "Script: {script}")?;
    writeln!(
        out,
        "Start of Main Processing - {}",
        Local::now().format("%H:%M:%S")
    )?;
    writeln!(out, "OS:{}", std::env::consts::OS)?;
    Ok(())
}

/// Echo the resolved worker settings.
pub fn write_config(out: &mut impl Write, config: &WorkerConfig) -> std::io::Result<()> {
    writeln!(
        out,
        "Output process ID file: {}",
        config.sentinel.pid_file.display()
    )?;
    writeln!(out, "Wait interval: {}", config.poll.wait_interval_secs)?;
    writeln!(out, "Force restart: {}", config.sentinel.force_restart)?;
    writeln!(out, "On error: {}", config.poll.on_error)?;
    if config.work.command.is_empty() {
        writeln!(out, "Work: heartbeat")?;
    } else {
        writeln!(
            out,
            "Work: {} {}",
            config.work.command,
            config.work.args.join(" ")
        )?;
    }
    Ok(())
}

/// Print the end-of-processing block for `outcome`.
pub fn write_finish(out: &mut impl Write, outcome: &RunOutcome) -> std::io::Result<()> {
    writeln!(out, "ExitCode:{}", outcome.exit_code)?;
    writeln!(out, "ExitMessage:{}", outcome.message)?;
    writeln!(
        out,
        "End of Main Processing - {}",
        Local::now().format("%H:%M:%S")
    )?;
    writeln!(out, "{RULE}")?;
    Ok(())
}

/// Report the outcome on `console` and hand back the process exit status.
pub fn finalize(outcome: &RunOutcome, console: Console) -> i32 {
    if outcome.exit_code == EXIT_OK {
        tracing::info!(exit_code = outcome.exit_code, message = %outcome.message, "run finished");
    } else {
        tracing::error!(exit_code = outcome.exit_code, message = %outcome.message, "run failed");
    }

    let mut out = console.writer();
    if let Err(e) = write_finish(&mut out, outcome).and_then(|()| out.flush()) {
        tracing::warn!(error = %e, ?console, "failed to write final status");
    }
    outcome.exit_code
}

/// Every error that can end a run.
#[derive(Debug)]
pub enum RunError {
    Config(ConfigError),
    Sentinel(SentinelError),
    Worker(WorkerError),
    Status(StatusError),
}

impl From<ConfigError> for RunError {
    fn from(e: ConfigError) -> Self {
        RunError::Config(e)
    }
}

impl From<SentinelError> for RunError {
    fn from(e: SentinelError) -> Self {
        RunError::Sentinel(e)
    }
}

impl From<WorkerError> for RunError {
    fn from(e: WorkerError) -> Self {
        RunError::Worker(e)
    }
}

impl From<StatusError> for RunError {
    fn from(e: StatusError) -> Self {
        RunError::Status(e)
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::Config(e) => write!(f, "{e}"),
            RunError::Sentinel(e) => write!(f, "{e}"),
            RunError::Worker(e) => write!(f, "{e}"),
            RunError::Status(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::Config(e) => Some(e),
            RunError::Sentinel(e) => Some(e),
            RunError::Worker(e) => Some(e),
            RunError::Status(e) => Some(e),
        }
    }
}
