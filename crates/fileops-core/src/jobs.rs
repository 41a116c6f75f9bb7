//! Job submission: request validation, the same-directory guard and the
//! dry-run/execute protocol against `/api/fileops/jobs`.
//!
//! # Design
//!
//! - Dry-run support is a discovered capability. A backend is only marked as
//!   lacking it when its reply proves so (404/405/501, a legacy reply that
//!   already created the job, or a success body of an unknown shape).
//! - Transport failures and backend rejections never downgrade the
//!   capability; they are surfaced to the caller instead.
//! - The guard runs before any request so a no-op move never reaches the
//!   backend.

use std::collections::HashSet;

use fileops_api_models::{
    ClearJobsRequest, ClearJobsResponse, ClearScope, Conflict, DestinationSpec, ERROR_CONFLICTS,
    Job, JobEnvelope, JobListResponse, JobProgress, JobState, JobSubmission, OperationKind,
    OperationRequest, OverwritePolicy, TargetKind, WsTokenRequest, WsTokenResponse,
};
use reqwest::StatusCode;
use serde::Deserialize;

use crate::api::{HttpBackend, RawReply, rejection};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::paths::{join, next_free_name, normalize_dir};

const JOBS_PATH: &str = "/api/fileops/jobs";
const WS_TOKEN_PATH: &str = "/api/fileops/ws-token";
const MAX_LIST_LIMIT: u32 = 100;

/// Whether the backend honours `dry_run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DryRunCapability {
    /// Not tried yet.
    #[default]
    Unknown,
    /// A dry-run report was received.
    Supported,
    /// The backend proved it cannot dry-run.
    Unsupported,
}

/// Result of the dry-run phase.
#[derive(Debug, Clone, PartialEq)]
pub enum DryRunOutcome {
    /// Conflicts the execute phase must resolve; empty when nothing collides.
    Conflicts(Vec<Conflict>),
    /// The backend cannot dry-run; nothing is known about conflicts.
    Unsupported,
    /// The backend ignored `dry_run` and already created the job.
    AlreadyExecuted(Job),
}

/// Entry of the source listing the guard checks names against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    /// Entry name.
    pub name: String,
    /// Whether the entry is a directory.
    pub is_dir: bool,
}

/// Names present in the directory an operation starts from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingSnapshot {
    entries: Vec<ListingEntry>,
}

impl ListingSnapshot {
    /// Snapshot over `entries`.
    #[must_use]
    pub const fn new(entries: Vec<ListingEntry>) -> Self {
        Self { entries }
    }

    /// Snapshot of plain files named `names`.
    #[must_use]
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            names
                .into_iter()
                .map(|name| ListingEntry {
                    name: name.into(),
                    is_dir: false,
                })
                .collect(),
        )
    }

    /// Set of entry names.
    #[must_use]
    pub fn names(&self) -> HashSet<String> {
        self.entries.iter().map(|entry| entry.name.clone()).collect()
    }

    /// Whether `name` is listed as a directory.
    #[must_use]
    pub fn is_dir(&self, name: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.is_dir && entry.name == name)
    }
}

/// Why the guard refused to submit a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardRejection {
    /// Moving entries onto themselves does nothing.
    MoveIntoSameDirectory,
    /// Copying several entries into their own directory has no single target name.
    AmbiguousCopyTarget,
}

impl GuardRejection {
    /// Notice shown to the user.
    #[must_use]
    pub const fn notice(self) -> &'static str {
        match self {
            Self::MoveIntoSameDirectory => "source and destination are the same directory; nothing to move",
            Self::AmbiguousCopyTarget => {
                "source and destination are the same directory; choose a different destination to copy several entries"
            }
        }
    }
}

/// Decision of the same-directory guard.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardDecision {
    /// Submit the request unchanged.
    Proceed(OperationRequest),
    /// Single-entry copy into its own directory, retargeted to a free name.
    Rewritten {
        /// Request with the destination pointing at `new_name`.
        request: OperationRequest,
        /// Generated destination name.
        new_name: String,
    },
    /// Refused client-side; nothing is sent.
    Rejected(GuardRejection),
}

/// Check the structural invariants of a request.
///
/// # Errors
///
/// Returns [`OrchestratorError::InvalidRequest`] when paths are empty, a remote side lacks a
/// session, a local side carries one, or the destination does not match the operation.
pub fn validate_request(request: &OperationRequest) -> OrchestratorResult<()> {
    if request.src.relative_paths.is_empty() {
        return Err(OrchestratorError::invalid_request(
            "src.paths",
            "at least one entry is required",
            None,
        ));
    }
    if request
        .src
        .relative_paths
        .iter()
        .any(|path| path.trim().is_empty())
    {
        return Err(OrchestratorError::invalid_request(
            "src.paths",
            "entry names must not be blank",
            None,
        ));
    }
    check_session("src.sid", request.src.target, request.src.session_id.as_deref())?;
    match (request.op, &request.dst) {
        (OperationKind::Delete, Some(_)) => Err(OrchestratorError::invalid_request(
            "dst",
            "delete takes no destination",
            None,
        )),
        (OperationKind::Delete, None) => Ok(()),
        (_, None) => Err(OrchestratorError::invalid_request(
            "dst",
            "copy and move need a destination",
            Some(request.op.as_str().to_string()),
        )),
        (_, Some(dst)) => check_session("dst.sid", dst.target, dst.session_id.as_deref()),
    }
}

fn check_session(
    field: &'static str,
    target: TargetKind,
    session_id: Option<&str>,
) -> OrchestratorResult<()> {
    let present = session_id.is_some_and(|sid| !sid.trim().is_empty());
    match (target, present) {
        (TargetKind::Remote, false) => Err(OrchestratorError::invalid_request(
            field,
            "remote targets need a session",
            None,
        )),
        (TargetKind::Local, true) => Err(OrchestratorError::invalid_request(
            field,
            "local targets take no session",
            session_id.map(ToString::to_string),
        )),
        _ => Ok(()),
    }
}

/// Whether source and destination resolve to the identical directory.
#[must_use]
pub fn same_directory(request: &OperationRequest) -> bool {
    let Some(dst) = &request.dst else {
        return false;
    };
    dst.is_dir
        && dst.target == request.src.target
        && dst.session_id == request.src.session_id
        && normalize_dir(&dst.path) == normalize_dir(&request.src.base_dir)
}

/// Apply the same-directory guard to a copy or move request.
#[must_use]
pub fn plan_transfer(request: OperationRequest, listing: &ListingSnapshot) -> GuardDecision {
    if !same_directory(&request) {
        return GuardDecision::Proceed(request);
    }
    match request.op {
        OperationKind::Move => GuardDecision::Rejected(GuardRejection::MoveIntoSameDirectory),
        OperationKind::Copy => {
            let [name] = request.src.relative_paths.as_slice() else {
                return GuardDecision::Rejected(GuardRejection::AmbiguousCopyTarget);
            };
            let new_name = next_free_name(name, listing.is_dir(name), &listing.names());
            let mut request = request;
            if let Some(dst) = request.dst.take() {
                request.dst = Some(DestinationSpec {
                    path: join(&dst.path, &new_name),
                    is_dir: false,
                    ..dst
                });
            }
            GuardDecision::Rewritten { request, new_name }
        }
        OperationKind::Delete => GuardDecision::Proceed(request),
    }
}

/// Classify a reply to a dry-run submission.
fn classify_dry_run(reply: &RawReply) -> OrchestratorResult<DryRunOutcome> {
    const OPERATION: &str = "dry-run job";
    let status = reply.status;
    if status == StatusCode::CONFLICT {
        let submission: JobSubmission = reply.decode(OPERATION)?;
        if submission.error.as_deref() == Some(ERROR_CONFLICTS) {
            return Ok(DryRunOutcome::Conflicts(submission.conflicts));
        }
        return Err(rejection(OPERATION, status, &reply.body));
    }
    if matches!(
        status,
        StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED
    ) {
        return Ok(DryRunOutcome::Unsupported);
    }
    if !status.is_success() {
        return Err(rejection(OPERATION, status, &reply.body));
    }
    let Ok(submission) = reply.decode::<JobSubmission>(OPERATION) else {
        return Ok(DryRunOutcome::Unsupported);
    };
    if submission.dry_run {
        return Ok(DryRunOutcome::Conflicts(submission.conflicts));
    }
    if let Some(job_id) = submission.job_id.filter(|id| !id.is_empty()) {
        return Ok(DryRunOutcome::AlreadyExecuted(
            submission.job.unwrap_or_else(|| placeholder_job(job_id, OperationKind::Copy)),
        ));
    }
    Ok(DryRunOutcome::Unsupported)
}

fn placeholder_job(job_id: String, op: OperationKind) -> Job {
    Job {
        job_id,
        op,
        state: JobState::Queued,
        created_ts: 0.0,
        started_ts: None,
        finished_ts: None,
        progress: JobProgress::default(),
        error: None,
    }
}

#[derive(Debug, Deserialize)]
struct CancelReply {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    canceled: Option<bool>,
}

/// Client for the job endpoints.
#[derive(Debug, Clone)]
pub struct JobClient {
    http: HttpBackend,
}

impl JobClient {
    /// Client over `http`.
    #[must_use]
    pub const fn new(http: HttpBackend) -> Self {
        Self { http }
    }

    /// Shared HTTP layer.
    #[must_use]
    pub const fn http(&self) -> &HttpBackend {
        &self.http
    }

    /// Submit `request` with `dry_run` set and classify the reply.
    ///
    /// # Errors
    ///
    /// Returns an error for transport failures, undecodable conflict replies and backend
    /// rejections that do not signal missing dry-run support.
    pub async fn submit_dry_run(&self, request: &OperationRequest) -> OrchestratorResult<DryRunOutcome> {
        validate_request(request)?;
        let mut dry_run = request.clone();
        dry_run.options.dry_run = true;
        let reply = self.http.post_json("dry-run job", JOBS_PATH, &dry_run).await?;
        let outcome = classify_dry_run(&reply)?;
        let outcome = match outcome {
            DryRunOutcome::AlreadyExecuted(mut job) => {
                job.op = request.op;
                DryRunOutcome::AlreadyExecuted(job)
            }
            other => other,
        };
        match &outcome {
            DryRunOutcome::Conflicts(conflicts) => {
                tracing::debug!(op = request.op.as_str(), conflicts = conflicts.len(), "dry-run report");
            }
            DryRunOutcome::Unsupported => {
                tracing::info!(status = reply.status.as_u16(), "backend does not support dry-run");
            }
            DryRunOutcome::AlreadyExecuted(job) => {
                tracing::warn!(job_id = %job.job_id, "backend ignored dry_run and created a job");
            }
        }
        Ok(outcome)
    }

    /// Submit `request` for execution.
    ///
    /// # Errors
    ///
    /// Returns an error for transport failures, rejections (including a late `conflicts` 409)
    /// and replies without a job identifier.
    pub async fn execute(&self, request: &OperationRequest) -> OrchestratorResult<Job> {
        const OPERATION: &str = "execute job";
        validate_request(request)?;
        let mut request = request.clone();
        request.options.dry_run = false;
        if !request.options.decisions.is_empty() {
            request.options.overwrite_policy = OverwritePolicy::Ask;
        }
        let reply = self.http.post_json(OPERATION, JOBS_PATH, &request).await?;
        let submission: JobSubmission = reply.into_result(OPERATION)?;
        if !submission.ok {
            return Err(OrchestratorError::Rejected {
                operation: OPERATION,
                status: 200,
                code: submission.error.unwrap_or_else(|| "job_failed".to_string()),
                message: submission.message,
            });
        }
        let job_id = submission
            .job_id
            .filter(|id| !id.is_empty())
            .or_else(|| submission.job.as_ref().map(|job| job.job_id.clone()))
            .ok_or_else(|| OrchestratorError::protocol(OPERATION, "reply carries no job_id"))?;
        let job = submission
            .job
            .unwrap_or_else(|| placeholder_job(job_id.clone(), request.op));
        tracing::info!(job_id = %job_id, op = request.op.as_str(), "job submitted");
        Ok(job)
    }

    /// Fetch the current snapshot of a job.
    ///
    /// # Errors
    ///
    /// Returns an error for transport failures, rejections and undecodable replies.
    pub async fn fetch_job(&self, job_id: &str) -> OrchestratorResult<Job> {
        let path = format!("{JOBS_PATH}/{}", encode_segment(job_id));
        let reply = self.http.get_json("fetch job", &path, &[]).await?;
        let envelope: JobEnvelope = reply.into_result("fetch job")?;
        Ok(envelope.job)
    }

    /// Ask the backend to cancel a job; the state change arrives through the progress channel.
    ///
    /// # Errors
    ///
    /// Returns an error for transport failures and rejections.
    pub async fn cancel(&self, job_id: &str) -> OrchestratorResult<bool> {
        let path = format!("{JOBS_PATH}/{}/cancel", encode_segment(job_id));
        let reply = self
            .http
            .post_json("cancel job", &path, &serde_json::json!({}))
            .await?;
        let ack: CancelReply = reply.into_result("cancel job")?;
        let accepted = ack.ok && ack.canceled.unwrap_or(true);
        tracing::info!(job_id, accepted, "cancel requested");
        Ok(accepted)
    }

    /// Most recent jobs, newest first; `limit` is clamped to 1..=100.
    ///
    /// # Errors
    ///
    /// Returns an error for transport failures, rejections and undecodable replies.
    pub async fn list_jobs(&self, limit: u32) -> OrchestratorResult<Vec<Job>> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT);
        let reply = self
            .http
            .get_json("list jobs", JOBS_PATH, &[("limit", limit.to_string())])
            .await?;
        let list: JobListResponse = reply.into_result("list jobs")?;
        Ok(list.jobs)
    }

    /// Remove finished jobs from the backend history.
    ///
    /// # Errors
    ///
    /// Returns an error for transport failures, rejections and undecodable replies.
    pub async fn clear_history(&self, scope: ClearScope) -> OrchestratorResult<u64> {
        let path = format!("{JOBS_PATH}/clear");
        let reply = self
            .http
            .post_json("clear jobs", &path, &ClearJobsRequest { scope })
            .await?;
        let cleared: ClearJobsResponse = reply.into_result("clear jobs")?;
        Ok(cleared.deleted)
    }

    /// Exchange a one-time token for the push channel.
    ///
    /// # Errors
    ///
    /// Returns an error when the request fails or no token is returned.
    pub async fn issue_push_token(&self) -> OrchestratorResult<String> {
        const OPERATION: &str = "issue push token";
        let ttl = self.http.config().token_ttl.as_secs().max(1);
        let reply = self
            .http
            .post_json(OPERATION, WS_TOKEN_PATH, &WsTokenRequest { ttl })
            .await?;
        let token: WsTokenResponse = reply.into_result(OPERATION)?;
        if !token.ok || token.token.is_empty() {
            return Err(OrchestratorError::protocol(OPERATION, "reply carries no token"));
        }
        Ok(token.token)
    }
}

fn encode_segment(segment: &str) -> String {
    percent_encoding::utf8_percent_encode(segment, percent_encoding::NON_ALPHANUMERIC).to_string()
}
