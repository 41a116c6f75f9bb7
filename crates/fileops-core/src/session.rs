//! Per-session orchestration.
//!
//! # Design
//!
//! - [`SessionState`] is owned by one UI session and is the only place that
//!   holds live resources: one progress channel, one pending auto-finalize
//!   timer and one transfer slot. Starting a new observation releases the
//!   previous channel and timer before anything else happens.
//! - Job cancellation is a request. The observation keeps running until the
//!   backend reports a terminal state or the channel fails.
//! - The dry-run capability learned from the backend is remembered for the
//!   life of the session.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use fileops_api_models::{
    EntryKind, Job, JobState, OperationKind, OperationRequest, OverwritePolicy,
};
use tokio_util::sync::CancellationToken;

use crate::api::HttpBackend;
use crate::config::ClientConfig;
use crate::conflicts::ResolutionSheet;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::interaction::{Interaction, JobUpdate, SheetVerdict};
use crate::jobs::{
    DryRunCapability, DryRunOutcome, GuardDecision, GuardRejection, JobClient, ListingEntry,
    ListingSnapshot, plan_transfer, same_directory, validate_request,
};
use crate::paths::numbered_candidates;
use crate::progress::{AutoFinalize, ChannelEvent, ChannelTimings, ProgressBackend, ProgressChannel};
use crate::speed::SpeedMeter;
use crate::transfer::{
    DirectoryIndex, DownloadDestination, DownloadRequest, DownloadedFile, HttpTransferBackend,
    StatBatchIndex, TransferBackend, TransferCanceller, TransferEngine, TransferLimits,
    TransferOutcome, UploadBatchReport, UploadPlan, suggest_name,
};

/// How observing a job ended.
#[derive(Debug)]
pub enum JobOutcome {
    /// The job reached a terminal state.
    Finished(Job),
    /// Observation broke before a terminal state; the job may still be running.
    ObservationFailed {
        /// Last snapshot seen.
        last: Option<Job>,
        /// Cause.
        error: OrchestratorError,
    },
}

/// How a copy, move or delete request ended.
#[derive(Debug)]
pub enum OperationOutcome {
    /// Refused by the same-directory guard; nothing was sent.
    Rejected(GuardRejection),
    /// The user closed the conflict sheet; nothing was executed.
    Dismissed,
    /// A job was created and observed.
    Observed(JobOutcome),
}

/// Job currently shown in the progress view.
#[derive(Debug, Clone, Default)]
struct ProgressView {
    job_id: Arc<Mutex<Option<String>>>,
}

impl ProgressView {
    fn show(&self, job_id: &str) {
        *self.job_id.lock().unwrap_or_else(PoisonError::into_inner) = Some(job_id.to_string());
    }

    fn release(&self, job_id: &str) {
        let mut current = self.job_id.lock().unwrap_or_else(PoisonError::into_inner);
        if current.as_deref() == Some(job_id) {
            *current = None;
        }
    }

    fn clear(&self) {
        *self.job_id.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn current(&self) -> Option<String> {
        self.job_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Orchestrator state for one UI session.
pub struct SessionState {
    jobs: JobClient,
    progress: Arc<dyn ProgressBackend>,
    transfers: TransferEngine,
    timings: ChannelTimings,
    auto_finalize_delay: Duration,
    dry_run: DryRunCapability,
    channel: Option<ProgressChannel>,
    auto_finalize: AutoFinalize,
    view: ProgressView,
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SessionState")
            .field("dry_run", &self.dry_run)
            .field("channel", &self.channel)
            .field("transfers", &self.transfers)
            .field("view", &self.view.current())
            .finish_non_exhaustive()
    }
}

impl SessionState {
    /// Session talking HTTP to the backend described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration is invalid or the HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> OrchestratorResult<Self> {
        Ok(Self::from_http(HttpBackend::new(config)?))
    }

    /// Session over an existing HTTP layer.
    #[must_use]
    pub fn from_http(http: HttpBackend) -> Self {
        let config = http.config().clone();
        let jobs = JobClient::new(http.clone());
        let transfers = TransferEngine::new(
            Arc::new(HttpTransferBackend::new(http)),
            TransferLimits::from(&config),
        );
        Self {
            progress: Arc::new(jobs.clone()),
            jobs,
            transfers,
            timings: ChannelTimings {
                push_open_timeout: config.push_open_timeout,
                poll_interval: config.poll_interval,
                poll_failure_limit: config.poll_failure_limit,
            },
            auto_finalize_delay: config.auto_finalize_delay,
            dry_run: DryRunCapability::Unknown,
            channel: None,
            auto_finalize: AutoFinalize::default(),
            view: ProgressView::default(),
        }
    }

    /// Replace the backend used for progress observation.
    #[must_use]
    pub fn with_progress_backend(mut self, backend: Arc<dyn ProgressBackend>) -> Self {
        self.progress = backend;
        self
    }

    /// Replace the backend used for transfers, keeping the configured limits.
    #[must_use]
    pub fn with_transfer_backend(mut self, backend: Arc<dyn TransferBackend>) -> Self {
        let limits = TransferLimits::from(self.jobs.http().config());
        self.transfers = TransferEngine::new(backend, limits);
        self
    }

    /// Job endpoints.
    #[must_use]
    pub const fn jobs(&self) -> &JobClient {
        &self.jobs
    }

    /// Transfer engine of this session.
    #[must_use]
    pub const fn transfers(&self) -> &TransferEngine {
        &self.transfers
    }

    /// Handle that cancels the running transfer.
    #[must_use]
    pub fn transfer_canceller(&self) -> TransferCanceller {
        self.transfers.canceller()
    }

    /// What the session learned about dry-run support.
    #[must_use]
    pub const fn dry_run_capability(&self) -> DryRunCapability {
        self.dry_run
    }

    /// Job shown in the progress view, cleared by the auto-finalize delay or [`Self::dismiss`].
    #[must_use]
    pub fn displayed_job(&self) -> Option<String> {
        self.view.current()
    }

    /// Whether a progress view release is scheduled.
    #[must_use]
    pub fn finalize_pending(&self) -> bool {
        self.auto_finalize.is_pending()
    }

    /// Source listing the same-directory guard needs for `request`, read through stat-batch.
    ///
    /// Only a single-entry copy into its own directory needs one. It holds the
    /// entry with its real type and every numbered name taken ahead of the
    /// first free one. Any other request gets an empty listing.
    ///
    /// # Errors
    ///
    /// Returns an error when the stat-batch request fails.
    pub async fn guard_listing(
        &self,
        request: &OperationRequest,
    ) -> OrchestratorResult<ListingSnapshot> {
        let [name] = request.src.relative_paths.as_slice() else {
            return Ok(ListingSnapshot::default());
        };
        if request.op != OperationKind::Copy || !same_directory(request) {
            return Ok(ListingSnapshot::default());
        }
        let mut index = StatBatchIndex::for_dir(
            self.transfers.backend(),
            request.src.target,
            request.src.session_id.clone(),
            request.src.base_dir.clone(),
        );
        let own = index.lookup(std::slice::from_ref(name)).await?;
        let is_dir = own.get(name) == Some(&EntryKind::Dir);
        let free = suggest_name(&mut index, name, is_dir).await?;
        let mut entries = vec![ListingEntry {
            name: name.clone(),
            is_dir,
        }];
        entries.extend(
            numbered_candidates(name, is_dir)
                .take_while(|candidate| *candidate != free)
                .map(|taken| ListingEntry {
                    name: taken,
                    is_dir: false,
                }),
        );
        tracing::debug!(name = %name, free = %free, is_dir, "guard listing read");
        Ok(ListingSnapshot::new(entries))
    }

    /// Run a copy, move or delete request from guard to terminal state.
    ///
    /// # Errors
    ///
    /// Returns an error when the request is invalid or the dry-run or execute
    /// submission fails. Failures while observing the created job are reported
    /// as [`JobOutcome::ObservationFailed`] instead.
    pub async fn run_operation(
        &mut self,
        request: OperationRequest,
        listing: &ListingSnapshot,
        interaction: &mut dyn Interaction,
        cancel: &CancellationToken,
    ) -> OrchestratorResult<OperationOutcome> {
        validate_request(&request)?;
        let request = match plan_transfer(request, listing) {
            GuardDecision::Proceed(request) => request,
            GuardDecision::Rewritten { request, new_name } => {
                tracing::info!(new_name = %new_name, "copy into source directory renamed");
                interaction.notice(&format!(
                    "source and destination are the same directory; copying as '{new_name}'"
                ));
                request
            }
            GuardDecision::Rejected(reason) => {
                tracing::info!(reason = ?reason, "request refused before submission");
                interaction.notice(reason.notice());
                return Ok(OperationOutcome::Rejected(reason));
            }
        };
        let Some(job) = self.submit(request, interaction).await? else {
            return Ok(OperationOutcome::Dismissed);
        };
        interaction.job_progress(&JobUpdate {
            job: job.clone(),
            speed: 0.0,
            eta: None,
        });
        if job.is_terminal() {
            return Ok(OperationOutcome::Observed(JobOutcome::Finished(job)));
        }
        let outcome = self.observe(&job.job_id, interaction, cancel).await;
        Ok(OperationOutcome::Observed(outcome))
    }

    /// Dry-run, resolve conflicts and execute; `None` when the user dismissed the sheet.
    async fn submit(
        &mut self,
        request: OperationRequest,
        interaction: &mut dyn Interaction,
    ) -> OrchestratorResult<Option<Job>> {
        if request.op == OperationKind::Delete {
            return self.jobs.execute(&request).await.map(Some);
        }
        if self.dry_run == DryRunCapability::Unsupported {
            return self.execute_replacing(request).await.map(Some);
        }
        match self.jobs.submit_dry_run(&request).await? {
            DryRunOutcome::Conflicts(conflicts) => {
                self.dry_run = DryRunCapability::Supported;
                if conflicts.is_empty() {
                    return self.execute_replacing(request).await.map(Some);
                }
                let mut sheet = ResolutionSheet::new(conflicts);
                match interaction.review_conflicts(&mut sheet).await {
                    SheetVerdict::Apply => {
                        let resolved = sheet.apply(&request);
                        tracing::info!(
                            decisions = resolved.options.decisions.len(),
                            "executing with conflict decisions"
                        );
                        self.jobs.execute(&resolved).await.map(Some)
                    }
                    SheetVerdict::Dismiss => {
                        tracing::info!("conflict sheet dismissed; nothing executed");
                        Ok(None)
                    }
                }
            }
            DryRunOutcome::Unsupported => {
                self.dry_run = DryRunCapability::Unsupported;
                self.execute_replacing(request).await.map(Some)
            }
            DryRunOutcome::AlreadyExecuted(job) => {
                self.dry_run = DryRunCapability::Unsupported;
                Ok(Some(job))
            }
        }
    }

    async fn execute_replacing(&self, mut request: OperationRequest) -> OrchestratorResult<Job> {
        request.options.overwrite_policy = OverwritePolicy::Replace;
        request.options.decisions.clear();
        request.options.default_action = None;
        self.jobs.execute(&request).await
    }

    /// Follow `job_id` until it reaches a terminal state.
    ///
    /// Cancelling `cancel` sends one cancel request and keeps observing.
    pub async fn observe(
        &mut self,
        job_id: &str,
        interaction: &mut dyn Interaction,
        cancel: &CancellationToken,
    ) -> JobOutcome {
        self.release_observation().await;
        self.view.show(job_id);
        let channel = self.channel.insert(
            ProgressChannel::open(job_id, Arc::clone(&self.progress), self.timings).await,
        );

        let mut meter = SpeedMeter::new();
        let mut cancel_sent = false;
        let mut last: Option<Job> = None;
        let outcome = loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled(), if !cancel_sent => {
                    cancel_sent = true;
                    request_cancel(self.jobs.clone(), job_id.to_string());
                    continue;
                }
                event = channel.next() => event,
            };
            match event {
                Some(ChannelEvent::Progress(job)) => {
                    let (speed, eta) = if matches!(job.state, JobState::Queued | JobState::Running)
                        && job.progress.bytes_total > 0
                    {
                        let done = job.progress.bytes_done;
                        let speed = meter.sample(done);
                        (speed, meter.eta(done, Some(job.progress.bytes_total)))
                    } else {
                        (0.0, None)
                    };
                    interaction.job_progress(&JobUpdate {
                        job: job.clone(),
                        speed,
                        eta,
                    });
                    last = Some(job);
                }
                Some(ChannelEvent::Terminal(job)) => {
                    interaction.job_progress(&JobUpdate {
                        job: job.clone(),
                        speed: 0.0,
                        eta: None,
                    });
                    break JobOutcome::Finished(job);
                }
                Some(ChannelEvent::TransportFailed(error)) => {
                    break JobOutcome::ObservationFailed { last, error };
                }
                None => {
                    break JobOutcome::ObservationFailed {
                        last,
                        error: OrchestratorError::protocol(
                            "observe job",
                            "progress channel closed without a terminal state",
                        ),
                    };
                }
            }
        };

        if let Some(mut channel) = self.channel.take() {
            channel.close().await;
        }
        if let JobOutcome::Finished(job) = &outcome
            && job.state == JobState::Done
        {
            let view = self.view.clone();
            let finished = job.job_id.clone();
            self.auto_finalize
                .schedule(self.auto_finalize_delay, move || view.release(&finished));
        }
        outcome
    }

    /// Close the progress view now, dropping any pending release.
    pub async fn dismiss(&mut self) {
        self.release_observation().await;
        self.view.clear();
    }

    async fn release_observation(&mut self) {
        self.auto_finalize.clear();
        if let Some(mut channel) = self.channel.take() {
            channel.close().await;
        }
    }

    /// Download through the session's transfer slot.
    pub async fn download(
        &self,
        request: &DownloadRequest,
        destination: &DownloadDestination,
        interaction: &mut dyn Interaction,
    ) -> TransferOutcome<DownloadedFile> {
        self.transfers.download(request, destination, interaction).await
    }

    /// Upload a batch through the session's transfer slot, probing names with stat-batch.
    pub async fn upload_batch(
        &self,
        plan: &UploadPlan,
        interaction: &mut dyn Interaction,
    ) -> UploadBatchReport {
        let mut listing = self.transfers.directory_index(plan);
        self.transfers.upload_batch(plan, &mut listing, interaction).await
    }
}

fn request_cancel(jobs: JobClient, job_id: String) {
    tokio::spawn(async move {
        if let Err(err) = jobs.cancel(&job_id).await {
            tracing::warn!(job_id = %job_id, error = %err.describe(), "cancel request failed");
        }
    });
}
