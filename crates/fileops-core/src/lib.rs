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
#![allow(clippy::module_name_repetitions)]

//! Client-side orchestration of file operations against the fileops backend.
//!
//! Layout:
//! - `jobs`: request validation, the same-directory guard and the dry-run/execute protocol.
//! - `conflicts`: the resolution sheet turning dry-run conflicts into execute decisions.
//! - `progress`: push/poll observation of one job with a single terminal event.
//! - `transfer`: uploads and downloads with byte progress, cancellation and bounded retries.
//! - `session`: [`SessionState`], which owns the live resources of one UI session.

pub mod api;
pub mod config;
pub mod conflicts;
pub mod error;
pub mod format;
pub mod interaction;
pub mod jobs;
pub mod paths;
pub mod progress;
pub mod retry;
pub mod session;
pub mod speed;
pub mod transfer;

pub use api::HttpBackend;
pub use config::ClientConfig;
pub use conflicts::{ConflictRow, ResolutionSheet};
pub use error::{OrchestratorError, OrchestratorResult};
pub use interaction::{
    ConfirmPrompt, Interaction, JobUpdate, SheetVerdict, TransferDirection, TransferPhase,
    TransferProgress, UploadChoice, UploadConflict,
};
pub use jobs::{
    DryRunCapability, DryRunOutcome, GuardDecision, GuardRejection, JobClient, ListingEntry,
    ListingSnapshot,
};
pub use progress::{ChannelEvent, ChannelTimings, ProgressBackend, ProgressChannel, TransportKind};
pub use session::{JobOutcome, OperationOutcome, SessionState};
pub use speed::SpeedMeter;
pub use transfer::{
    BatchEnd, DownloadDestination, DownloadRequest, DownloadSource, DownloadedFile,
    TransferCanceller, TransferEngine, TransferOutcome, UploadBatchReport, UploadPlan,
    UploadSource,
};
