#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
//! Shared HTTP DTOs for the fileops backend contract.
//!
//! The orchestrator and the CLI both encode requests and decode responses
//! through these types so the wire contract stays in one place. Response
//! types are deliberately lenient (`#[serde(default)]` on optional members)
//! because older backends omit fields that newer ones always send.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error discriminator for the legacy "conflicts" 409 on job submission.
pub const ERROR_CONFLICTS: &str = "conflicts";
/// Error discriminator for archive downloads whose size cannot be estimated.
pub const ERROR_CONFIRM_REQUIRED: &str = "confirm_required";
/// Error discriminator for uploads targeting an existing entry.
pub const ERROR_EXISTS: &str = "exists";
/// Error discriminator for uploads targeting a directory.
pub const ERROR_NOT_A_FILE: &str = "not_a_file";
/// Maximum number of paths accepted by a single stat-batch request.
pub const STAT_BATCH_LIMIT: usize = 200;

/// Kind of multi-step operation the backend runs as a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Copy sources into the destination.
    Copy,
    /// Move sources into the destination.
    Move,
    /// Delete sources; has no destination.
    Delete,
}

impl OperationKind {
    /// Lower-case wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Move => "move",
            Self::Delete => "delete",
        }
    }
}

/// Filesystem a path lives on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// The backend host's own filesystem.
    Local,
    /// A remote filesystem reached through a backend-managed session.
    Remote,
}

impl TargetKind {
    /// Lower-case wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

/// How the backend treats destination entries that already exist.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OverwritePolicy {
    /// Consult `decisions`/`default_action`; refuse when neither is present.
    Ask,
    /// Replace every existing destination entry.
    Replace,
    /// Keep every existing destination entry.
    Skip,
}

/// Per-entry decision for a conflicting path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConflictAction {
    /// Overwrite the existing destination entry.
    Replace,
    /// Leave the existing destination entry untouched.
    Skip,
}

impl ConflictAction {
    /// Lower-case wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::Skip => "skip",
        }
    }
}

/// Source side of an operation request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceSpec {
    /// Filesystem the sources live on.
    pub target: TargetKind,
    #[serde(rename = "sid", default, skip_serializing_if = "Option::is_none")]
    /// Remote session identifier; present iff `target` is remote.
    pub session_id: Option<String>,
    #[serde(rename = "cwd")]
    /// Directory the relative paths are resolved against.
    pub base_dir: String,
    #[serde(rename = "paths")]
    /// Entry names relative to `base_dir`.
    pub relative_paths: Vec<String>,
}

/// Destination side of a copy/move request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DestinationSpec {
    /// Filesystem the destination lives on.
    pub target: TargetKind,
    #[serde(rename = "sid", default, skip_serializing_if = "Option::is_none")]
    /// Remote session identifier; present iff `target` is remote.
    pub session_id: Option<String>,
    /// Destination directory, or a full entry path when `is_dir` is false.
    pub path: String,
    #[serde(default)]
    /// Whether `path` names a directory that receives the sources.
    pub is_dir: bool,
}

/// Submission options controlling dry-run and conflict handling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationOptions {
    #[serde(rename = "overwrite")]
    /// Policy applied to existing destination entries.
    pub overwrite_policy: OverwritePolicy,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    /// Only report conflicts; perform nothing.
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    /// Per-path decisions keyed by normalized source and destination paths.
    pub decisions: BTreeMap<String, ConflictAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Action for conflicting entries without an explicit decision.
    pub default_action: Option<ConflictAction>,
}

impl Default for OperationOptions {
    fn default() -> Self {
        Self {
            overwrite_policy: OverwritePolicy::Ask,
            dry_run: false,
            decisions: BTreeMap::new(),
            default_action: None,
        }
    }
}

/// Body of `POST /api/fileops/jobs`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationRequest {
    /// Operation to run.
    pub op: OperationKind,
    /// Where the sources live.
    pub src: SourceSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Where the sources go; absent for delete.
    pub dst: Option<DestinationSpec>,
    #[serde(default)]
    /// Dry-run and conflict handling options.
    pub options: OperationOptions,
}

/// A destination entry that a copy/move would overwrite.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conflict {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Backend classification (currently always `exists`).
    pub kind: Option<String>,
    /// Full source path.
    pub src_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Source entry name.
    pub src_name: Option<String>,
    /// Full destination path that already exists.
    pub dst_path: String,
    #[serde(default)]
    /// Whether the source is a directory.
    pub is_dir: bool,
}

impl Conflict {
    /// Build a conflict from a source and destination path.
    #[must_use]
    pub fn new(src_path: impl Into<String>, dst_path: impl Into<String>) -> Self {
        Self {
            kind: None,
            src_path: src_path.into(),
            src_name: None,
            dst_path: dst_path.into(),
            is_dir: false,
        }
    }
}

/// Lifecycle state of a backend job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepted, waiting for a worker.
    Queued,
    /// Being executed.
    Running,
    /// Finished successfully.
    Done,
    /// Finished with a failure.
    Error,
    /// Stopped on request.
    Canceled,
}

impl JobState {
    /// Whether no further transitions can happen.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Canceled)
    }

    /// Lower-case wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Error => "error",
            Self::Canceled => "canceled",
        }
    }
}

/// Entry the job is currently working on.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurrentItem {
    #[serde(default)]
    /// Entry name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Full entry path when reported.
    pub path: Option<String>,
    #[serde(default)]
    /// Backend phase label (`copy`, `precheck`, ...).
    pub phase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Whether the entry is a directory.
    pub is_dir: Option<bool>,
}

/// Free-space precheck context attached to a failed job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapacityCheck {
    /// Bytes the operation needed.
    pub need_bytes: u64,
    /// Bytes available at the destination.
    pub free_bytes: u64,
    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    /// Label of the destination filesystem.
    pub location: Option<String>,
}

/// Progress counters of a job snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobProgress {
    #[serde(default)]
    /// Entries finished so far.
    pub files_done: u64,
    #[serde(default)]
    /// Entries in the job.
    pub files_total: u64,
    #[serde(default)]
    /// Bytes transferred so far.
    pub bytes_done: u64,
    #[serde(default)]
    /// Bytes expected; zero when unknown.
    pub bytes_total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Entry currently processed.
    pub current: Option<CurrentItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Space precheck context, present when a precheck failed.
    pub check: Option<CapacityCheck>,
}

/// Full snapshot of a backend job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    /// Opaque server-assigned identifier.
    pub job_id: String,
    /// Operation the job runs.
    pub op: OperationKind,
    /// Lifecycle state.
    pub state: JobState,
    #[serde(default)]
    /// Creation time, UNIX seconds.
    pub created_ts: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Start time, UNIX seconds.
    pub started_ts: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Finish time, UNIX seconds.
    pub finished_ts: Option<f64>,
    #[serde(default)]
    /// Progress counters.
    pub progress: JobProgress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Last failure message reported by the backend.
    pub error: Option<String>,
}

impl Job {
    /// Whether the snapshot is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Creation time as a UTC timestamp.
    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        unix_seconds(self.created_ts)
    }

    /// Finish time as a UTC timestamp.
    #[must_use]
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_ts.and_then(unix_seconds)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn unix_seconds(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() || value <= 0.0 {
        return None;
    }
    let millis = (value * 1_000.0).round() as i64;
    Utc.timestamp_millis_opt(millis).single()
}

/// Response of `POST /api/fileops/jobs`.
///
/// One struct covers every shape the endpoint produces: a created job, a
/// dry-run report, the legacy `conflicts` 409 and plain error envelopes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobSubmission {
    #[serde(default)]
    /// Success flag.
    pub ok: bool,
    #[serde(default)]
    /// Set when the body is a dry-run report.
    pub dry_run: bool,
    #[serde(default)]
    /// Conflicts found by a dry-run or the legacy 409.
    pub conflicts: Vec<Conflict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Identifier of a created job.
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Initial snapshot of a created job.
    pub job: Option<Job>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Error discriminator.
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Human-readable error text.
    pub message: Option<String>,
}

/// Response of `GET /api/fileops/jobs/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobEnvelope {
    #[serde(default)]
    /// Success flag.
    pub ok: bool,
    /// Current snapshot.
    pub job: Job,
}

/// Response of `GET /api/fileops/jobs`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobListResponse {
    #[serde(default)]
    /// Success flag.
    pub ok: bool,
    #[serde(default)]
    /// Most recent jobs first.
    pub jobs: Vec<Job>,
}

/// Which finished jobs `POST /api/fileops/jobs/clear` removes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClearScope {
    /// Every finished job.
    #[default]
    History,
    /// Done and canceled jobs.
    Finished,
    /// Failed jobs.
    Errors,
    /// Every non-active job.
    All,
}

/// Body of `POST /api/fileops/jobs/clear`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClearJobsRequest {
    /// Jobs to remove.
    pub scope: ClearScope,
}

/// Response of `POST /api/fileops/jobs/clear`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClearJobsResponse {
    #[serde(default)]
    /// Success flag.
    pub ok: bool,
    #[serde(default)]
    /// Number of removed jobs.
    pub deleted: u64,
}

/// Body of `POST /api/fileops/ws-token`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WsTokenRequest {
    /// Requested token lifetime in seconds.
    pub ttl: u64,
}

/// Response of `POST /api/fileops/ws-token`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WsTokenResponse {
    #[serde(default)]
    /// Success flag.
    pub ok: bool,
    #[serde(default)]
    /// One-time token for the push channel.
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Lifetime granted by the backend.
    pub ttl: Option<u64>,
}

/// Discriminator of push channel messages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PushMessageKind {
    /// First snapshot after subscribing.
    Init,
    /// Snapshot after a change.
    Update,
    /// Terminal snapshot; the server closes afterwards.
    Done,
    /// Subscription failure (bad token, unknown job).
    Error,
    /// Any message type this client does not know.
    #[serde(other)]
    Unknown,
}

/// Message received on the push channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PushMessage {
    #[serde(rename = "type")]
    /// Message discriminator.
    pub kind: PushMessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Job snapshot for `init`, `update` and `done`.
    pub job: Option<Job>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Failure text for `error`.
    pub message: Option<String>,
}

/// JSON error envelope produced by every endpoint on failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ErrorEnvelope {
    #[serde(default)]
    /// Always false for errors.
    pub ok: bool,
    #[serde(default)]
    /// Machine-readable discriminator.
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Human-readable text.
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Free-form diagnostic payload.
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Remediation hint.
    pub hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Estimated archive size (`confirm_required`).
    pub estimated_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Configured archive size cap (`confirm_required`).
    pub max_bytes: Option<u64>,
    #[serde(default)]
    /// Whether the estimate stopped early (`confirm_required`).
    pub estimate_truncated: bool,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    /// Type of the existing entry (`exists`, `not_a_file`).
    pub entry_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Path the error refers to.
    pub path: Option<String>,
}

impl ErrorEnvelope {
    /// Whether the discriminator equals `code`.
    #[must_use]
    pub fn is(&self, code: &str) -> bool {
        self.error == code
    }

    /// Best display text: message, then discriminator.
    #[must_use]
    pub fn display_text(&self) -> &str {
        self.message
            .as_deref()
            .filter(|message| !message.trim().is_empty())
            .unwrap_or(&self.error)
    }
}

/// Response of `POST /api/fs/upload`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadResponse {
    #[serde(default)]
    /// Success flag.
    pub ok: bool,
}

/// Type of an existing filesystem entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Directory.
    Dir,
    /// Symbolic link.
    Link,
    /// Anything else the backend reports.
    #[serde(other)]
    Other,
}

/// Body of `POST /api/fs/stat-batch`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatBatchRequest {
    /// Filesystem to check.
    pub target: TargetKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Remote session identifier.
    pub sid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Directory the names are resolved against.
    pub cwd: Option<String>,
    /// Names (with `cwd`) or full paths to check.
    pub paths: Vec<String>,
}

/// Existence report for one checked path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntryStatus {
    /// Resolved path.
    pub path: String,
    #[serde(default)]
    /// Whether an entry exists.
    pub exists: bool,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    /// Entry type when it exists.
    pub kind: Option<EntryKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Stat failure for this path.
    pub error: Option<String>,
}

/// Response of `POST /api/fs/stat-batch`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatBatchResponse {
    #[serde(default)]
    /// Success flag.
    pub ok: bool,
    #[serde(default)]
    /// One report per checked path, in request order.
    pub items: Vec<EntryStatus>,
}

/// One entry of a multi-item archive download.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchiveItem {
    /// Full entry path.
    pub path: String,
    /// Name inside the archive.
    pub name: String,
    #[serde(default)]
    /// Whether the entry is a directory.
    pub is_dir: bool,
}

/// Body of `POST /api/fs/archive`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchiveRequest {
    /// Entries to pack.
    pub items: Vec<ArchiveItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Suggested archive file name.
    pub zip_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn copy_request() -> OperationRequest {
        OperationRequest {
            op: OperationKind::Copy,
            src: SourceSpec {
                target: TargetKind::Remote,
                session_id: Some("s1".to_string()),
                base_dir: "/a".to_string(),
                relative_paths: vec!["x.txt".to_string()],
            },
            dst: Some(DestinationSpec {
                target: TargetKind::Local,
                session_id: None,
                path: "/b".to_string(),
                is_dir: true,
            }),
            options: OperationOptions::default(),
        }
    }

    #[test]
    fn operation_request_uses_backend_field_names() {
        let mut request = copy_request();
        request.options.dry_run = true;
        let value = serde_json::to_value(&request).expect("serialize request");
        assert_eq!(
            value,
            json!({
                "op": "copy",
                "src": {"target": "remote", "sid": "s1", "cwd": "/a", "paths": ["x.txt"]},
                "dst": {"target": "local", "path": "/b", "is_dir": true},
                "options": {"overwrite": "ask", "dry_run": true}
            })
        );
    }

    #[test]
    fn decisions_serialize_in_key_order() {
        let mut request = copy_request();
        request.options.decisions.insert("/b/x.txt".into(), ConflictAction::Skip);
        request.options.decisions.insert("/a/x.txt".into(), ConflictAction::Replace);
        request.options.default_action = Some(ConflictAction::Skip);
        let text = serde_json::to_string(&request.options).expect("serialize options");
        assert_eq!(
            text,
            r#"{"overwrite":"ask","decisions":{"/a/x.txt":"replace","/b/x.txt":"skip"},"default_action":"skip"}"#
        );
    }

    #[test]
    fn job_snapshot_decodes_backend_shape() {
        let job: Job = serde_json::from_value(json!({
            "job_id": "j1",
            "op": "move",
            "state": "error",
            "created_ts": 1_700_000_000.5,
            "started_ts": 1_700_000_001.0,
            "finished_ts": null,
            "progress": {
                "files_done": 1,
                "files_total": 2,
                "bytes_done": 10,
                "bytes_total": 20,
                "current": {"name": "a.bin", "path": "/x/a.bin", "phase": "precheck", "is_dir": true},
                "check": {"need_bytes": 2048, "free_bytes": 1024, "where": "sftp://host"}
            },
            "error": "remote_no_space"
        }))
        .expect("decode job");
        assert!(job.is_terminal());
        assert_eq!(job.progress.files_total, 2);
        assert_eq!(
            job.progress.check.as_ref().and_then(|c| c.location.as_deref()),
            Some("sftp://host")
        );
        assert!(job.finished_at().is_none());
        assert_eq!(
            job.created_at().map(|at| at.timestamp_millis()),
            Some(1_700_000_000_500)
        );
    }

    #[test]
    fn job_progress_tolerates_empty_object() {
        let job: Job = serde_json::from_value(json!({
            "job_id": "j2",
            "op": "delete",
            "state": "queued",
            "progress": {}
        }))
        .expect("decode job");
        assert_eq!(job.progress, JobProgress::default());
        assert!(!job.is_terminal());
    }

    #[test]
    fn push_message_accepts_unknown_types() {
        let message: PushMessage =
            serde_json::from_value(json!({"type": "heartbeat"})).expect("decode message");
        assert_eq!(message.kind, PushMessageKind::Unknown);
        let message: PushMessage =
            serde_json::from_value(json!({"type": "error", "message": "bad_token"}))
                .expect("decode message");
        assert_eq!(message.kind, PushMessageKind::Error);
        assert_eq!(message.message.as_deref(), Some("bad_token"));
    }

    #[test]
    fn error_envelope_reads_confirm_and_upload_fields() {
        let envelope: ErrorEnvelope = serde_json::from_value(json!({
            "ok": false,
            "error": "confirm_required",
            "estimated_bytes": null,
            "estimate_truncated": true,
            "max_bytes": 1024,
            "message": "size unknown"
        }))
        .expect("decode envelope");
        assert!(envelope.is(ERROR_CONFIRM_REQUIRED));
        assert!(envelope.estimate_truncated);
        assert_eq!(envelope.display_text(), "size unknown");

        let envelope: ErrorEnvelope = serde_json::from_value(json!({
            "ok": false, "error": "exists", "type": "link", "path": "/x/a"
        }))
        .expect("decode envelope");
        assert_eq!(envelope.entry_type.as_deref(), Some("link"));
        assert_eq!(envelope.display_text(), "exists");
    }

    #[test]
    fn stat_batch_items_map_entry_kinds() {
        let response: StatBatchResponse = serde_json::from_value(json!({
            "ok": true,
            "items": [
                {"path": "/d/a", "exists": true, "type": "dir"},
                {"path": "/d/b", "exists": true, "type": "socket"},
                {"path": "/d/c", "exists": false}
            ]
        }))
        .expect("decode stat batch");
        let kinds: Vec<_> = response.items.iter().map(|item| item.kind).collect();
        assert_eq!(
            kinds,
            vec![Some(EntryKind::Dir), Some(EntryKind::Other), None]
        );
    }
}
