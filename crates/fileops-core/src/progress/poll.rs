use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fileops_api_models::Job;
use tokio::time::{Interval, MissedTickBehavior};

use super::{ProgressBackend, ProgressTransport, TransportEvent, TransportKind};
use crate::error::OrchestratorError;
use crate::retry::{Attempt, RetryOutcome, Verdict, run_bounded};

/// Fixed-interval status polling.
///
/// Each tick awaits its request before the next tick is taken, and ticks
/// missed while a request was in flight are skipped, so requests never
/// overlap. A failed request skips its tick; `failure_limit` consecutive
/// failures fail the transport.
pub struct PollTransport {
    job_id: String,
    backend: Arc<dyn ProgressBackend>,
    ticker: Option<Interval>,
    failure_limit: u32,
}

impl PollTransport {
    /// Poll `job_id` every `period`; the first request goes out one period from now.
    #[must_use]
    pub fn new(
        job_id: String,
        backend: Arc<dyn ProgressBackend>,
        period: Duration,
        failure_limit: u32,
    ) -> Self {
        let period = period.max(Duration::from_millis(1));
        let start = tokio::time::Instant::now() + period;
        let mut ticker = tokio::time::interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            job_id,
            backend,
            ticker: Some(ticker),
            failure_limit,
        }
    }
}

/// One tick followed by one status request.
struct PollTick<'a> {
    job_id: &'a str,
    backend: &'a dyn ProgressBackend,
    ticker: &'a mut Interval,
}

#[async_trait]
impl Attempt for PollTick<'_> {
    type Output = Job;
    type Conflict = OrchestratorError;

    async fn run(
        &mut self,
        attempt: u32,
        _previous: Option<&OrchestratorError>,
    ) -> Verdict<Job, OrchestratorError> {
        self.ticker.tick().await;
        match self.backend.fetch_job(self.job_id).await {
            Ok(job) => Verdict::Success(job),
            Err(err) => {
                tracing::warn!(
                    job_id = %self.job_id,
                    attempt,
                    error = %err.describe(),
                    "status poll failed; skipping tick"
                );
                Verdict::RetryableConflict(err)
            }
        }
    }
}

#[async_trait]
impl ProgressTransport for PollTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Poll
    }

    async fn next_event(&mut self) -> TransportEvent {
        let Some(ticker) = self.ticker.as_mut() else {
            return TransportEvent::Closed;
        };
        let mut tick = PollTick {
            job_id: &self.job_id,
            backend: self.backend.as_ref(),
            ticker,
        };
        match run_bounded(self.failure_limit, &mut tick).await {
            RetryOutcome::Succeeded { value: job, .. } if job.is_terminal() => {
                self.ticker = None;
                TransportEvent::Terminal(job)
            }
            RetryOutcome::Succeeded { value: job, .. } => TransportEvent::Snapshot(job),
            RetryOutcome::Exhausted { last, attempts } => {
                tracing::warn!(job_id = %self.job_id, attempts, "status polling gave up");
                self.ticker = None;
                TransportEvent::Failed(last)
            }
            RetryOutcome::Failed { error, .. } => {
                self.ticker = None;
                TransportEvent::Failed(error)
            }
        }
    }

    async fn close(&mut self) {
        self.ticker = None;
    }
}
