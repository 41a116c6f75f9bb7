//! Bounded retry with a per-attempt classifier.

use async_trait::async_trait;

use crate::error::OrchestratorError;

/// Classification of one attempt.
#[derive(Debug)]
pub enum Verdict<T, C> {
    /// The attempt produced a final value.
    Success(T),
    /// The attempt hit a recoverable conflict; another attempt may resolve it.
    RetryableConflict(C),
    /// The attempt failed in a way no retry can fix.
    Fatal(OrchestratorError),
}

/// Result of a bounded retry loop.
#[derive(Debug)]
pub enum RetryOutcome<T, C> {
    /// An attempt succeeded.
    Succeeded {
        /// Value of the successful attempt.
        value: T,
        /// Attempts used, counting the successful one.
        attempts: u32,
    },
    /// Every allowed attempt ended in a conflict.
    Exhausted {
        /// Conflict reported by the last attempt.
        last: C,
        /// Attempts used.
        attempts: u32,
    },
    /// An attempt failed fatally.
    Failed {
        /// Error of the failing attempt.
        error: OrchestratorError,
        /// Attempts used, counting the failing one.
        attempts: u32,
    },
}

/// One retryable unit of work.
#[async_trait]
pub trait Attempt: Send {
    /// Value produced on success.
    type Output: Send;
    /// Conflict that may be retried.
    type Conflict: Send + Sync;

    /// Run attempt number `attempt` (1-based); `previous` is the conflict that triggered it.
    async fn run(
        &mut self,
        attempt: u32,
        previous: Option<&Self::Conflict>,
    ) -> Verdict<Self::Output, Self::Conflict>;
}

/// Run `task` until it succeeds, fails fatally or `max_attempts` conflicts were reported.
///
/// A `max_attempts` of zero still runs one attempt.
pub async fn run_bounded<A: Attempt>(
    max_attempts: u32,
    task: &mut A,
) -> RetryOutcome<A::Output, A::Conflict> {
    let max_attempts = max_attempts.max(1);
    let mut previous: Option<A::Conflict> = None;
    let mut attempt = 1;
    loop {
        match task.run(attempt, previous.as_ref()).await {
            Verdict::Success(value) => {
                return RetryOutcome::Succeeded {
                    value,
                    attempts: attempt,
                };
            }
            Verdict::Fatal(error) => {
                return RetryOutcome::Failed {
                    error,
                    attempts: attempt,
                };
            }
            Verdict::RetryableConflict(conflict) => {
                if attempt >= max_attempts {
                    tracing::debug!(attempt, "retry budget exhausted");
                    return RetryOutcome::Exhausted {
                        last: conflict,
                        attempts: attempt,
                    };
                }
                tracing::debug!(attempt, "retrying after conflict");
                previous = Some(conflict);
                attempt += 1;
            }
        }
    }
}
