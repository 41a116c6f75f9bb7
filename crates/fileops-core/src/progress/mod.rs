//! Live observation of one job through a push or poll transport.
//!
//! # Design
//!
//! - Exactly one transport is live at a time. Selection tries push first:
//!   token exchange, then a connect bounded by the open timeout. Any failure
//!   or a missed deadline selects polling instead, and dropping the connect
//!   future discards a connection that would have opened late.
//! - Push may degrade to polling once, when it fails or closes before a
//!   terminal snapshot. The push socket is closed before the poll timer is
//!   created. Polling never falls back to anything.
//! - A failed poll is a skipped tick. Only a run of failures reaching the
//!   configured limit ends a poll transport without a terminal snapshot.
//! - Consumers see whole snapshots and exactly one terminal event.

mod poll;
mod push;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fileops_api_models::{Job, PushMessage};
use tokio::task::JoinHandle;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::jobs::JobClient;

pub use poll::PollTransport;
pub use push::{PushTransport, WsConnection};

/// Transport kind of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Server-initiated WebSocket delivery.
    Push,
    /// Periodic status requests.
    Poll,
}

impl TransportKind {
    /// Lower-case label used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Poll => "poll",
        }
    }
}

/// What a transport produced on one step.
#[derive(Debug)]
pub enum TransportEvent {
    /// Non-terminal snapshot.
    Snapshot(Job),
    /// Terminal snapshot; the transport has nothing more to say.
    Terminal(Job),
    /// The transport broke.
    Failed(OrchestratorError),
    /// The transport ended without a terminal snapshot.
    Closed,
}

/// A live delivery mechanism for one job's snapshots.
#[async_trait]
pub trait ProgressTransport: Send {
    /// Kind of this transport.
    fn kind(&self) -> TransportKind;
    /// Wait for the next event.
    async fn next_event(&mut self) -> TransportEvent;
    /// Release sockets and timers.
    async fn close(&mut self);
}

/// An open push connection yielding decoded messages.
#[async_trait]
pub trait PushConnection: Send {
    /// Next decoded message, `None` once the connection closed.
    async fn next_message(&mut self) -> Option<OrchestratorResult<PushMessage>>;
    /// Close the connection.
    async fn close(&mut self);
}

/// Backend operations the progress channel needs.
#[async_trait]
pub trait ProgressBackend: Send + Sync {
    /// Exchange a one-time push token.
    async fn issue_push_token(&self) -> OrchestratorResult<String>;
    /// Open a push connection for `job_id` authenticated by `token`.
    async fn open_push(&self, job_id: &str, token: &str)
    -> OrchestratorResult<Box<dyn PushConnection>>;
    /// Fetch one snapshot.
    async fn fetch_job(&self, job_id: &str) -> OrchestratorResult<Job>;
}

#[async_trait]
impl ProgressBackend for JobClient {
    async fn issue_push_token(&self) -> OrchestratorResult<String> {
        Self::issue_push_token(self).await
    }

    async fn open_push(
        &self,
        job_id: &str,
        token: &str,
    ) -> OrchestratorResult<Box<dyn PushConnection>> {
        let endpoint = self.http().config().push_endpoint()?;
        let connection = WsConnection::connect(endpoint, job_id, token).await?;
        Ok(Box::new(connection))
    }

    async fn fetch_job(&self, job_id: &str) -> OrchestratorResult<Job> {
        Self::fetch_job(self, job_id).await
    }
}

/// Timings of the selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelTimings {
    /// Deadline for the push transport to open.
    pub push_open_timeout: Duration,
    /// Interval of the poll transport.
    pub poll_interval: Duration,
    /// Consecutive failed polls tolerated before the poll transport fails.
    pub poll_failure_limit: u32,
}

impl Default for ChannelTimings {
    fn default() -> Self {
        Self {
            push_open_timeout: Duration::from_millis(700),
            poll_interval: Duration::from_millis(500),
            poll_failure_limit: 20,
        }
    }
}

/// Event delivered to the channel's consumer.
#[derive(Debug)]
pub enum ChannelEvent {
    /// Latest non-terminal snapshot.
    Progress(Job),
    /// Final snapshot; delivered at most once per channel.
    Terminal(Job),
    /// Observation failed before a terminal snapshot arrived.
    TransportFailed(OrchestratorError),
}

/// Latch guaranteeing a single finalization.
#[derive(Debug, Default)]
pub struct FinalizeOnce {
    fired: bool,
}

impl FinalizeOnce {
    /// Returns `true` only on the first call.
    pub const fn fire(&mut self) -> bool {
        if self.fired {
            return false;
        }
        self.fired = true;
        true
    }

    /// Whether the latch already fired.
    #[must_use]
    pub const fn fired(&self) -> bool {
        self.fired
    }
}

/// Subscription to one job's live state.
pub struct ProgressChannel {
    job_id: String,
    backend: Arc<dyn ProgressBackend>,
    timings: ChannelTimings,
    active: Option<Box<dyn ProgressTransport>>,
    started: Vec<TransportKind>,
    finalize: FinalizeOnce,
}

impl std::fmt::Debug for ProgressChannel {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ProgressChannel")
            .field("job_id", &self.job_id)
            .field("transport", &self.transport())
            .field("started", &self.started)
            .field("finalized", &self.finalize.fired())
            .finish_non_exhaustive()
    }
}

impl ProgressChannel {
    /// Select a transport for `job_id` and return the live channel.
    pub async fn open(
        job_id: impl Into<String>,
        backend: Arc<dyn ProgressBackend>,
        timings: ChannelTimings,
    ) -> Self {
        let job_id = job_id.into();
        let mut channel = Self {
            job_id,
            backend,
            timings,
            active: None,
            started: Vec::with_capacity(2),
            finalize: FinalizeOnce::default(),
        };
        match channel.try_push().await {
            Some(push) => channel.activate(Box::new(push)),
            None => channel.start_polling(),
        }
        channel
    }

    async fn try_push(&self) -> Option<PushTransport> {
        let token = match self.backend.issue_push_token().await {
            Ok(token) => token,
            Err(err) => {
                tracing::info!(job_id = %self.job_id, error = %err.describe(), "push token unavailable; polling");
                return None;
            }
        };
        let open = self.backend.open_push(&self.job_id, &token);
        match tokio::time::timeout(self.timings.push_open_timeout, open).await {
            Ok(Ok(connection)) => Some(PushTransport::new(connection)),
            Ok(Err(err)) => {
                tracing::info!(job_id = %self.job_id, error = %err.describe(), "push open failed; polling");
                None
            }
            Err(_) => {
                tracing::info!(
                    job_id = %self.job_id,
                    timeout_ms = u64::try_from(self.timings.push_open_timeout.as_millis()).unwrap_or(u64::MAX),
                    "push did not open in time; polling"
                );
                None
            }
        }
    }

    fn activate(&mut self, transport: Box<dyn ProgressTransport>) {
        let kind = transport.kind();
        tracing::debug!(job_id = %self.job_id, transport = kind.as_str(), "transport active");
        self.started.push(kind);
        self.active = Some(transport);
    }

    fn start_polling(&mut self) {
        let poll = PollTransport::new(
            self.job_id.clone(),
            Arc::clone(&self.backend),
            self.timings.poll_interval,
            self.timings.poll_failure_limit,
        );
        self.activate(Box::new(poll));
    }

    /// Job this channel observes.
    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Kind of the live transport, `None` once closed.
    #[must_use]
    pub fn transport(&self) -> Option<TransportKind> {
        self.active.as_ref().map(|transport| transport.kind())
    }

    /// Every transport started for this job, in order.
    #[must_use]
    pub fn started_transports(&self) -> &[TransportKind] {
        &self.started
    }

    /// Whether the channel has delivered its last event.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.active.is_none()
    }

    /// Next event, `None` after a terminal or failure event was delivered.
    pub async fn next(&mut self) -> Option<ChannelEvent> {
        loop {
            let transport = self.active.as_mut()?;
            let kind = transport.kind();
            match transport.next_event().await {
                TransportEvent::Snapshot(job) => return Some(ChannelEvent::Progress(job)),
                TransportEvent::Terminal(job) => {
                    self.close().await;
                    if self.finalize.fire() {
                        tracing::info!(
                            job_id = %self.job_id,
                            transport = kind.as_str(),
                            state = job.state.as_str(),
                            "job finished"
                        );
                        return Some(ChannelEvent::Terminal(job));
                    }
                    return None;
                }
                TransportEvent::Failed(err) if self.can_fall_back(kind) => {
                    tracing::warn!(job_id = %self.job_id, error = %err.describe(), "push failed; falling back to polling");
                    self.close().await;
                    self.start_polling();
                }
                TransportEvent::Closed if self.can_fall_back(kind) => {
                    tracing::warn!(job_id = %self.job_id, "push closed early; falling back to polling");
                    self.close().await;
                    self.start_polling();
                }
                TransportEvent::Failed(err) => {
                    self.close().await;
                    tracing::warn!(job_id = %self.job_id, transport = kind.as_str(), error = %err.describe(), "observation failed");
                    return Some(ChannelEvent::TransportFailed(err));
                }
                TransportEvent::Closed => {
                    self.close().await;
                    return Some(ChannelEvent::TransportFailed(OrchestratorError::protocol(
                        "observe job",
                        "transport ended before a terminal state",
                    )));
                }
            }
        }
    }

    fn can_fall_back(&self, kind: TransportKind) -> bool {
        kind == TransportKind::Push
            && !self.finalize.fired()
            && !self.started.contains(&TransportKind::Poll)
    }

    /// Tear down the live transport; later calls to [`Self::next`] return `None`.
    pub async fn close(&mut self) {
        if let Some(mut transport) = self.active.take() {
            transport.close().await;
            tracing::debug!(job_id = %self.job_id, transport = transport.kind().as_str(), "transport closed");
        }
    }
}

/// Delayed release of a finished progress view.
///
/// Scheduling replaces any pending release, and [`AutoFinalize::clear`]
/// cancels it, so a new observation never inherits an old timer.
#[derive(Debug, Default)]
pub struct AutoFinalize {
    pending: Option<JoinHandle<()>>,
}

impl AutoFinalize {
    /// Run `release` after `delay` unless cleared first.
    pub fn schedule<F>(&mut self, delay: Duration, release: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.clear();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            release();
        }));
    }

    /// Cancel a pending release.
    pub fn clear(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    /// Whether a release is scheduled and has not run yet.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for AutoFinalize {
    fn drop(&mut self) {
        self.clear();
    }
}
