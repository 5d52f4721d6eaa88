use crate::config::OnError;
use tracing::warn;

/// Decision returned by the failure policy after a unit of work finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDecision {
    /// Work succeeded, carry on.
    Proceed,
    /// Work failed but the worker keeps polling (includes the running failure count).
    Continue { consecutive: u32 },
    /// Work failed and the worker must stop.
    Abort { consecutive: u32 },
}

/// Policy for unit-of-work failures.
///
/// In `fatal` mode the first failure aborts. In `continue` mode failures are
/// logged and skipped, escalating to abort once `max_consecutive` failures
/// happen in a row (0 disables the limit). Any success resets the count.
pub struct FailurePolicy {
    on_error: OnError,
    max_consecutive: u32,
    consecutive: u32,
}

impl FailurePolicy {
    pub fn new(on_error: OnError, max_consecutive: u32) -> Self {
        Self {
            on_error,
            max_consecutive,
            consecutive: 0,
        }
    }

    /// Record a successful cycle.
    pub fn record_success(&mut self) -> FailureDecision {
        self.consecutive = 0;
        FailureDecision::Proceed
    }

    /// Record a failed cycle and decide whether the worker survives it.
    pub fn record_failure(&mut self) -> FailureDecision {
        self.consecutive += 1;
        let consecutive = self.consecutive;

        match self.on_error {
            OnError::Fatal => FailureDecision::Abort { consecutive },
            OnError::Continue if self.max_consecutive > 0 && consecutive >= self.max_consecutive => {
                warn!(
                    consecutive,
                    max_consecutive = self.max_consecutive,
                    "consecutive failure limit reached"
                );
                FailureDecision::Abort { consecutive }
            }
            OnError::Continue => FailureDecision::Continue { consecutive },
        }
    }

    /// Failures since the last success.
    #[cfg(test)]
    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}
