mod config;
mod failure;
mod report;
mod sentinel;
mod status;
mod work;
mod worker;

use clap::Parser;
use config::{OnError, Overrides, WorkerConfig};
use failure::FailurePolicy;
use report::{Console, RunError, RunOutcome};
use sentinel::Sentinel;
use status::StopRequest;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use work::ConfiguredWork;
use worker::{PollingWorker, StopReason};

/// A background polling worker: run a unit of work every interval until
/// the process ID file is deleted.
#[derive(Parser, Debug)]
#[command(name = "pollworker", version, about)]
pub struct Cli {
    /// Process ID file; delete it to stop the worker
    #[arg(long, visible_alias = "processidfile", value_name = "PATH")]
    pid_file: Option<PathBuf>,

    /// Seconds to wait after each polling cycle (default: 10)
    #[arg(long, visible_alias = "waitinterval", value_name = "SECS")]
    wait_interval: Option<u64>,

    /// Replace an existing process ID file instead of refusing to start
    #[arg(
        long,
        visible_alias = "forcerestart",
        value_name = "BOOL",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = config::parse_flag
    )]
    force_restart: Option<bool>,

    /// What to do when a unit of work fails (default: fatal)
    #[arg(long, value_enum)]
    on_error: Option<OnError>,

    /// With --on-error continue, give up after this many failures in a row (0 = never)
    #[arg(long, value_name = "N")]
    max_consecutive_failures: Option<u32>,

    /// Config file path (default: pollworker.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the state of the process ID file as JSON and exit
    #[arg(long, conflicts_with_all = ["stop", "dry_run"])]
    status: bool,

    /// Delete the process ID file so a running worker stops, then exit
    #[arg(long, conflicts_with = "dry_run")]
    stop: bool,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (each cycle, sleeps, policy decisions)
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,

    /// Command to run each cycle instead of the built-in heartbeat
    #[arg(last = true, value_name = "COMMAND")]
    command: Vec<String>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            pid_file: self.pid_file.clone(),
            wait_interval_secs: self.wait_interval,
            force_restart: self.force_restart,
            on_error: self.on_error,
            max_consecutive_failures: self.max_consecutive_failures,
            command: self.command.clone(),
        }
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let default_level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

fn main() {
    let parsed = Cli::try_parse();
    // Keep stdout clean for the JSON report
    let console = match &parsed {
        Ok(cli) if cli.status => Console::Stderr,
        _ => Console::Stdout,
    };
    let _ = report::write_start_banner(&mut console.writer(), env!("CARGO_PKG_NAME"));

    let outcome = match parsed {
        Ok(cli) => {
            init_logging(cli.verbose, cli.quiet);
            tracing::debug!(?cli, "parsed CLI arguments");
            match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime.block_on(run(cli)),
                Err(e) => RunOutcome::with_code(
                    report::EXIT_FAILURE,
                    format!("failed to start async runtime: {e}"),
                ),
            }
        }
        Err(e) => {
            // Help and version land here too, with exit code 0
            let _ = e.print();
            let message = if e.use_stderr() {
                "Command line argument error.".to_string()
            } else {
                "Displayed usage information.".to_string()
            };
            RunOutcome::with_code(e.exit_code(), message)
        }
    };

    let code = report::finalize(&outcome, console);
    std::process::exit(code);
}

/// Resolve configuration, dispatch on the requested mode, and fold every
/// error into a single outcome.
async fn run(cli: Cli) -> RunOutcome {
    match try_run(cli).await {
        Ok(outcome) => outcome,
        Err(e) => e.into(),
    }
}

async fn try_run(cli: Cli) -> Result<RunOutcome, RunError> {
    let mut config = WorkerConfig::load(cli.config.as_deref())?;
    config.apply(cli.overrides());
    config.validate()?;

    let pid_file = config.sentinel.pid_file.clone();

    if cli.status {
        let snapshot = status::inspect(&pid_file)?;
        report::emit(&snapshot.to_json()?);
        return Ok(RunOutcome::success("Status reported"));
    }

    if cli.stop {
        let message = match status::request_stop(&pid_file)? {
            StopRequest::Requested => format!(
                "Process ID file {} removed. Worker stops at its next cycle.",
                pid_file.display()
            ),
            StopRequest::NotRunning => format!(
                "Process ID file {} does not exist. Nothing to stop.",
                pid_file.display()
            ),
        };
        report::emit(&message);
        return Ok(RunOutcome::success(message));
    }

    let _ = report::write_config(&mut std::io::stdout().lock(), &config);

    if cli.dry_run {
        report::emit(config.to_toml()?.trim_end());
        report::emit("Dry run mode, config validated, not running.");
        return Ok(RunOutcome::success("Dry run completed"));
    }

    let sentinel = Sentinel::acquire(&pid_file, config.sentinel.force_restart)?;
    report::emit(&format!("process id:{}", sentinel.pid()));

    let policy = FailurePolicy::new(config.poll.on_error, config.poll.max_consecutive_failures);
    let interval = Duration::from_secs(config.poll.wait_interval_secs);
    let mut worker = PollingWorker::new(sentinel, interval, policy);
    let mut work = ConfiguredWork::from_config(&config.work);

    let StopReason::Cancelled { cycles } = worker.run(&mut work).await?;
    report::emit(&format!(
        "Process ID file {} does not exist any more. Process cancelled.",
        worker.sentinel().path().display()
    ));
    tracing::info!(cycles, "worker stopped");
    Ok(RunOutcome::success("Completed successfully"))
}
