//! Single HTTP-level uploads and downloads with byte progress, speed
//! estimation, cancellation and conflict retries.
//!
//! # Design
//!
//! - One transfer slot. Starting a transfer cancels whatever still holds
//!   the slot, and [`TransferCanceller`] lets another task abort the
//!   current one.
//! - Cancellation drops the in-flight request future, which aborts the
//!   HTTP exchange. It ends as [`TransferOutcome::Canceled`], never as a failure.
//! - Retries go through [`crate::retry::run_bounded`]: one confirmation
//!   resubmission for downloads, a bounded number of sends per upload file.

mod backend;
mod download;
mod upload;

use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::error::OrchestratorError;

pub use backend::{
    DownloadBody, DownloadReply, DownloadRequest, DownloadSource, HttpTransferBackend,
    TransferBackend, UploadBody, UploadReply, UploadRequest, UploadStream,
    content_disposition_filename,
};
pub use download::{DownloadDestination, DownloadedFile};
pub use upload::{
    BatchEnd, DirectoryIndex, StatBatchIndex, UploadBatchReport, UploadPlan, UploadSource,
    suggest_name,
};

/// How a transfer ended.
#[derive(Debug)]
pub enum TransferOutcome<T> {
    /// Finished successfully.
    Completed(T),
    /// Aborted by the user or superseded by another transfer.
    Canceled,
    /// Failed; the error is meant for display and manual retry.
    Failed(OrchestratorError),
}

impl<T> TransferOutcome<T> {
    /// Whether the transfer completed.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

#[derive(Debug, Default)]
struct SlotState {
    generation: u64,
    token: Option<CancellationToken>,
    deferred: bool,
}

/// Handle that cancels whichever transfer currently holds the slot.
#[derive(Debug, Clone, Default)]
pub struct TransferCanceller {
    state: Arc<Mutex<SlotState>>,
}

impl TransferCanceller {
    /// Cancel the current transfer, if any.
    pub fn cancel(&self) {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = &state.token {
            token.cancel();
        }
    }

    /// Cancel the current transfer or, when the slot is idle, the next one to claim it.
    pub fn cancel_or_defer(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match &state.token {
            Some(token) => token.cancel(),
            None => state.deferred = true,
        }
    }

    /// Claim the slot, cancelling the previous holder.
    fn begin(&self) -> (u64, CancellationToken) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = state.token.take() {
            previous.cancel();
        }
        state.generation += 1;
        let token = CancellationToken::new();
        if std::mem::take(&mut state.deferred) {
            tracing::debug!(generation = state.generation, "transfer canceled before it started");
            token.cancel();
        }
        state.token = Some(token.clone());
        (state.generation, token)
    }

    /// Release the slot if `generation` still holds it.
    fn finish(&self, generation: u64) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.generation == generation {
            state.token = None;
        }
    }

    /// Whether a transfer holds the slot.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .token
            .is_some()
    }
}

/// Releases the slot when a transfer future completes or is dropped.
struct SlotLease {
    canceller: TransferCanceller,
    generation: u64,
    token: CancellationToken,
}

impl SlotLease {
    fn acquire(canceller: &TransferCanceller) -> Self {
        let (generation, token) = canceller.begin();
        Self {
            canceller: canceller.clone(),
            generation,
            token,
        }
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        self.canceller.finish(self.generation);
    }
}

/// Limits applied by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferLimits {
    /// Sends per upload file.
    pub upload_attempts: u32,
    /// Resubmissions after a confirmation-required download.
    pub confirm_retries: u32,
}

impl From<&ClientConfig> for TransferLimits {
    fn from(config: &ClientConfig) -> Self {
        Self {
            upload_attempts: config.upload_attempts,
            confirm_retries: config.confirm_retries,
        }
    }
}

impl Default for TransferLimits {
    fn default() -> Self {
        Self {
            upload_attempts: 3,
            confirm_retries: 1,
        }
    }
}

/// Runs uploads and downloads through one slot.
pub struct TransferEngine {
    backend: Arc<dyn TransferBackend>,
    limits: TransferLimits,
    canceller: TransferCanceller,
}

impl std::fmt::Debug for TransferEngine {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TransferEngine")
            .field("limits", &self.limits)
            .field("busy", &self.canceller.is_busy())
            .finish_non_exhaustive()
    }
}

impl TransferEngine {
    /// Engine over `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn TransferBackend>, limits: TransferLimits) -> Self {
        Self {
            backend,
            limits,
            canceller: TransferCanceller::default(),
        }
    }

    /// Handle for cancelling the current transfer from elsewhere.
    #[must_use]
    pub fn canceller(&self) -> TransferCanceller {
        self.canceller.clone()
    }

    /// Backend used for transfers and existence checks.
    #[must_use]
    pub fn backend(&self) -> Arc<dyn TransferBackend> {
        Arc::clone(&self.backend)
    }
}
