/// The polling loop: perform work, sleep, check the sentinel, repeat.
///
/// Cancellation is cooperative only. The sentinel's absence is observed at the
/// cycle boundary after the sleep, so shutdown latency is about one interval.
/// Neither the work in progress nor the sleep is ever interrupted.
use crate::failure::{FailureDecision, FailurePolicy};
use crate::sentinel::Sentinel;
use crate::work::WorkError;
use std::future::Future;
use std::time::Duration;

/// A caller-supplied action run once per polling cycle.
pub trait UnitOfWork {
    /// Short label for logs.
    fn name(&self) -> &str;

    /// Run one cycle of work. `cycle` starts at 1.
    fn perform(&mut self, cycle: u64) -> impl Future<Output = Result<(), WorkError>>;
}

/// Why the loop ended without an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The sentinel file disappeared.
    Cancelled { cycles: u64 },
}

pub struct PollingWorker {
    sentinel: Sentinel,
    interval: Duration,
    policy: FailurePolicy,
    cancelled: bool,
}

impl PollingWorker {
    pub fn new(sentinel: Sentinel, interval: Duration, policy: FailurePolicy) -> Self {
        Self {
            sentinel,
            interval,
            policy,
            cancelled: false,
        }
    }

    /// Whether the loop has observed the stop signal.
    #[cfg(test)]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn sentinel(&self) -> &Sentinel {
        &self.sentinel
    }

    /// Run until the sentinel disappears or the failure policy aborts.
    pub async fn run<W: UnitOfWork>(&mut self, work: &mut W) -> Result<StopReason, WorkerError> {
        tracing::info!(
            work = work.name(),
            interval_secs = self.interval.as_secs_f64(),
            pid_file = %self.sentinel.path().display(),
            "polling worker started"
        );

        let mut cycle: u64 = 0;
        while !self.cancelled {
            cycle += 1;
            tracing::debug!(cycle, "cycle starting");

            let decision = match work.perform(cycle).await {
                Ok(()) => self.policy.record_success(),
                Err(e) => {
                    let decision = self.policy.record_failure();
                    match decision {
                        FailureDecision::Abort { consecutive } => {
                            tracing::error!(cycle, consecutive, error = %e, "unit of work failed, stopping");
                            return Err(WorkerError::WorkFailed {
                                cycle,
                                consecutive,
                                source: e,
                            });
                        }
                        FailureDecision::Continue { consecutive } => {
                            tracing::warn!(cycle, consecutive, error = %e, "unit of work failed, continuing");
                        }
                        FailureDecision::Proceed => {}
                    }
                    decision
                }
            };
            tracing::debug!(cycle, ?decision, "cycle finished");

            tracing::debug!(secs = self.interval.as_secs_f64(), "sleeping until next cycle");
            tokio::time::sleep(self.interval).await;

            if !self.sentinel.exists() {
                self.cancelled = true;
                tracing::info!(
                    pid_file = %self.sentinel.path().display(),
                    cycles = cycle,
                    "process ID file no longer exists, process cancelled"
                );
            }
        }

        Ok(StopReason::Cancelled { cycles: cycle })
    }
}

/// Errors that end the polling loop abnormally.
#[derive(Debug)]
pub enum WorkerError {
    /// The failure policy gave up on the unit of work.
    WorkFailed {
        cycle: u64,
        consecutive: u32,
        source: WorkError,
    },
}

impl std::fmt::Display for WorkerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerError::WorkFailed {
                cycle,
                consecutive,
                source,
            } => write!(
                f,
                "unit of work failed in cycle {cycle} ({consecutive} consecutive): {source}"
            ),
        }
    }
}

impl std::error::Error for WorkerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WorkerError::WorkFailed { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OnError;
    use std::path::PathBuf;
    use std::time::Instant;
    use tempfile::tempdir;

    const TICK: Duration = Duration::from_millis(30);

    /// Records every call; deletes the sentinel during `delete_on` and fails on
    /// the cycles listed in `fail_on`.
    struct Scripted {
        pid_file: PathBuf,
        delete_on: u64,
        fail_on: Vec<u64>,
        calls: Vec<u64>,
        started: Vec<Instant>,
        finished: Vec<Instant>,
    }

    impl Scripted {
        fn new(pid_file: PathBuf, delete_on: u64) -> Self {
            Self {
                pid_file,
                delete_on,
                fail_on: Vec::new(),
                calls: Vec::new(),
                started: Vec::new(),
                finished: Vec::new(),
            }
        }
    }

    impl UnitOfWork for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn perform(&mut self, cycle: u64) -> Result<(), WorkError> {
            self.started.push(Instant::now());
            self.calls.push(cycle);
            if cycle == self.delete_on {
                std::fs::remove_file(&self.pid_file).unwrap();
            }
            self.finished.push(Instant::now());
            if self.fail_on.contains(&cycle) {
                return Err(WorkError::Failed {
                    command: "scripted".to_string(),
                    exit_code: Some(cycle as i32),
                });
            }
            Ok(())
        }
    }

    fn worker(path: &std::path::Path, on_error: OnError, max: u32) -> PollingWorker {
        let sentinel = Sentinel::acquire(path, false).unwrap();
        PollingWorker::new(sentinel, TICK, FailurePolicy::new(on_error, max))
    }

    #[tokio::test]
    async fn test_deleting_sentinel_stops_before_next_cycle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("w.pid");
        let mut worker = worker(&path, OnError::Fatal, 0);
        let mut work = Scripted::new(path.clone(), 3);

        let reason = worker.run(&mut work).await.unwrap();

        assert_eq!(reason, StopReason::Cancelled { cycles: 3 });
        assert_eq!(work.calls, vec![1, 2, 3]);
        assert!(worker.is_cancelled());
    }

    #[tokio::test]
    async fn test_delete_during_first_cycle_runs_work_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("w.pid");
        let mut worker = worker(&path, OnError::Fatal, 0);
        let mut work = Scripted::new(path.clone(), 1);

        let reason = worker.run(&mut work).await.unwrap();

        assert_eq!(reason, StopReason::Cancelled { cycles: 1 });
        assert_eq!(work.calls, vec![1]);
    }

    #[tokio::test]
    async fn test_worker_never_recreates_or_deletes_sentinel() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("w.pid");
        let mut worker = worker(&path, OnError::Fatal, 0);
        let mut work = Scripted::new(path.clone(), 2);

        worker.run(&mut work).await.unwrap();

        assert!(!path.exists());
        assert_eq!(worker.sentinel().path(), path.as_path());
    }

    #[tokio::test]
    async fn test_interval_separates_cycles() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("w.pid");
        let mut worker = worker(&path, OnError::Fatal, 0);
        let mut work = Scripted::new(path.clone(), 4);

        worker.run(&mut work).await.unwrap();

        for k in 0..work.finished.len() - 1 {
            let gap = work.started[k + 1].duration_since(work.finished[k]);
            assert!(gap >= TICK, "gap {gap:?} after cycle {} shorter than {TICK:?}", k + 1);
        }
    }

    #[tokio::test]
    async fn test_fatal_policy_stops_on_first_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("w.pid");
        let mut worker = worker(&path, OnError::Fatal, 0);
        let mut work = Scripted::new(path.clone(), 99);
        work.fail_on = vec![2];

        let err = worker.run(&mut work).await.unwrap_err();

        assert!(matches!(
            err,
            WorkerError::WorkFailed {
                cycle: 2,
                consecutive: 1,
                ..
            }
        ));
        assert!(err.to_string().contains("exited with status 2"));
        assert_eq!(work.calls, vec![1, 2]);
        // Sentinel is left for the operator
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_continue_policy_survives_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("w.pid");
        let mut worker = worker(&path, OnError::Continue, 0);
        let mut work = Scripted::new(path.clone(), 4);
        work.fail_on = vec![1, 2, 3];

        let reason = worker.run(&mut work).await.unwrap();

        assert_eq!(reason, StopReason::Cancelled { cycles: 4 });
        assert_eq!(work.calls, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_continue_policy_escalates_at_limit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("w.pid");
        let mut worker = worker(&path, OnError::Continue, 2);
        let mut work = Scripted::new(path.clone(), 99);
        work.fail_on = vec![1, 3, 4];

        let err = worker.run(&mut work).await.unwrap_err();

        assert!(matches!(
            err,
            WorkerError::WorkFailed {
                cycle: 4,
                consecutive: 2,
                ..
            }
        ));
        assert_eq!(work.calls, vec![1, 2, 3, 4]);
    }
}
