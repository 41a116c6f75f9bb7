//! The user-facing side of the orchestrator.
//!
//! Every decision the protocol cannot take on its own (conflict sheets,
//! upload collisions, unsized archives) and every progress report flows
//! through [`Interaction`]. The CLI implements it with terminal prompts;
//! tests implement it with scripted answers.

use std::time::Duration;

use async_trait::async_trait;
use fileops_api_models::{EntryKind, Job};

use crate::conflicts::ResolutionSheet;

/// How the user closed the conflict sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetVerdict {
    /// Submit the decisions in the sheet.
    Apply,
    /// Close without executing anything.
    Dismiss,
}

/// A pre-send or backend-reported upload name collision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadConflict {
    /// Name that collides.
    pub name: String,
    /// Type of the existing entry when known.
    pub existing: Option<EntryKind>,
    /// Next free `"name (N).ext"` candidate.
    pub suggested: String,
    /// Send attempt the decision is for (1-based).
    pub attempt: u32,
}

impl UploadConflict {
    /// Whether replacing the existing entry is possible (directories cannot be overwritten).
    #[must_use]
    pub fn can_overwrite(&self) -> bool {
        self.existing != Some(EntryKind::Dir)
    }
}

/// Answer to an [`UploadConflict`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadChoice {
    /// Replace the existing entry.
    Overwrite,
    /// Upload under another name.
    Rename(String),
    /// Leave this file out and continue with the batch.
    Skip,
}

/// Details of a confirmation-required archive download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmPrompt {
    /// Estimated archive size when the backend could compute one.
    pub estimated_bytes: Option<u64>,
    /// Configured archive size cap.
    pub max_bytes: Option<u64>,
    /// Whether the estimate stopped early.
    pub estimate_truncated: bool,
    /// Backend message.
    pub message: Option<String>,
}

/// Direction of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// Local to backend.
    Upload,
    /// Backend to local.
    Download,
}

/// Phase of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    /// Bytes are moving.
    Transferring,
    /// Request body fully sent; waiting for the backend to finish storing it.
    Finishing,
}

/// Byte-level progress of one transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    /// Transfer direction.
    pub direction: TransferDirection,
    /// File name shown to the user.
    pub label: String,
    /// Position in an upload batch as `(index, count)`, 1-based.
    pub position: Option<(usize, usize)>,
    /// Bytes moved so far.
    pub loaded: u64,
    /// Total bytes when known.
    pub total: Option<u64>,
    /// Smoothed speed in bytes per second.
    pub speed: f64,
    /// Remaining time when it can be estimated.
    pub eta: Option<Duration>,
    /// Current phase.
    pub phase: TransferPhase,
}

/// Job snapshot enriched with client-side throughput.
#[derive(Debug, Clone, PartialEq)]
pub struct JobUpdate {
    /// Latest snapshot.
    pub job: Job,
    /// Smoothed speed in bytes per second; zero when unknown.
    pub speed: f64,
    /// Remaining time when it can be estimated.
    pub eta: Option<Duration>,
}

/// Decisions and reports exchanged with the user.
#[async_trait]
pub trait Interaction: Send {
    /// Let the user edit `sheet`; decide whether to execute.
    async fn review_conflicts(&mut self, sheet: &mut ResolutionSheet) -> SheetVerdict;

    /// Resolve an upload collision.
    async fn choose_upload_action(&mut self, conflict: &UploadConflict) -> UploadChoice;

    /// Ask once whether to download an archive whose size could not be checked.
    async fn confirm_archive(&mut self, prompt: &ConfirmPrompt) -> bool;

    /// Informational message (guard rejections, renamed destinations).
    fn notice(&mut self, _message: &str) {}

    /// A job snapshot arrived.
    fn job_progress(&mut self, _update: &JobUpdate) {}

    /// A transfer made progress.
    fn transfer_progress(&mut self, _progress: &TransferProgress) {}
}
