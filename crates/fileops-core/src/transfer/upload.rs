use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use fileops_api_models::{EntryKind, TargetKind};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use super::backend::{TransferBackend, UploadBody, UploadReply, UploadRequest};
use super::{SlotLease, TransferEngine};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::interaction::{
    Interaction, TransferDirection, TransferPhase, TransferProgress, UploadChoice, UploadConflict,
};
use crate::paths::{fallback_name, join, numbered_candidates};
use crate::retry::{Attempt, RetryOutcome, Verdict, run_bounded};
use crate::speed::SpeedMeter;

/// Candidate names checked per stat-batch request when proposing a free name.
const SUGGESTION_CHUNK: usize = 50;

/// A local file queued for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSource {
    /// Local file to read.
    pub path: PathBuf,
    /// Name to store it under.
    pub name: String,
}

impl UploadSource {
    /// Source stored under the file's own name.
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, name }
    }
}

/// A batch of files uploaded into one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPlan {
    /// Filesystem receiving the files.
    pub target: TargetKind,
    /// Remote session identifier.
    pub session_id: Option<String>,
    /// Destination directory.
    pub dir: String,
    /// Files in upload order.
    pub files: Vec<UploadSource>,
}

/// Existence checks against the destination directory.
#[async_trait]
pub trait DirectoryIndex: Send {
    /// Forget cached knowledge; called after each stored file.
    async fn refresh(&mut self) -> OrchestratorResult<()>;

    /// Which of `names` exist, with their types. Absent names are left out.
    async fn lookup(&mut self, names: &[String]) -> OrchestratorResult<HashMap<String, EntryKind>>;
}

/// [`DirectoryIndex`] backed by the stat-batch endpoint, caching answers until refreshed.
pub struct StatBatchIndex {
    backend: Arc<dyn TransferBackend>,
    target: TargetKind,
    session_id: Option<String>,
    dir: String,
    known: HashMap<String, Option<EntryKind>>,
}

impl std::fmt::Debug for StatBatchIndex {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("StatBatchIndex")
            .field("target", &self.target)
            .field("dir", &self.dir)
            .field("cached", &self.known.len())
            .finish_non_exhaustive()
    }
}

impl StatBatchIndex {
    /// Index of the destination directory of `plan`.
    #[must_use]
    pub fn new(backend: Arc<dyn TransferBackend>, plan: &UploadPlan) -> Self {
        Self::for_dir(backend, plan.target, plan.session_id.clone(), plan.dir.clone())
    }

    /// Index of `dir` on `target`.
    #[must_use]
    pub fn for_dir(
        backend: Arc<dyn TransferBackend>,
        target: TargetKind,
        session_id: Option<String>,
        dir: String,
    ) -> Self {
        Self {
            backend,
            target,
            session_id,
            dir,
            known: HashMap::new(),
        }
    }
}

#[async_trait]
impl DirectoryIndex for StatBatchIndex {
    async fn refresh(&mut self) -> OrchestratorResult<()> {
        self.known.clear();
        Ok(())
    }

    async fn lookup(&mut self, names: &[String]) -> OrchestratorResult<HashMap<String, EntryKind>> {
        let mut seen = HashSet::new();
        let missing: Vec<String> = names
            .iter()
            .filter(|name| !self.known.contains_key(*name) && seen.insert(name.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            let statuses = self
                .backend
                .stat_batch(self.target, self.session_id.as_deref(), &self.dir, &missing)
                .await?;
            for (name, status) in missing.into_iter().zip(statuses) {
                if let Some(error) = &status.error {
                    tracing::debug!(name = %name, error = %error, "stat-batch reported an error");
                }
                let kind = status
                    .exists
                    .then(|| status.kind.unwrap_or(EntryKind::Other));
                self.known.insert(name, kind);
            }
        }
        Ok(names
            .iter()
            .filter_map(|name| {
                self.known
                    .get(name)
                    .copied()
                    .flatten()
                    .map(|kind| (name.clone(), kind))
            })
            .collect())
    }
}

/// First `"name (N).ext"` the listing reports as free; directories keep their dots.
pub async fn suggest_name(
    listing: &mut dyn DirectoryIndex,
    name: &str,
    is_dir: bool,
) -> OrchestratorResult<String> {
    let mut candidates = numbered_candidates(name, is_dir);
    loop {
        let chunk: Vec<String> = candidates.by_ref().take(SUGGESTION_CHUNK).collect();
        if chunk.is_empty() {
            return Ok(fallback_name(name, is_dir));
        }
        let taken = listing.lookup(&chunk).await?;
        if let Some(free) = chunk.into_iter().find(|candidate| !taken.contains_key(candidate)) {
            return Ok(free);
        }
    }
}

/// How a batch ended.
#[derive(Debug)]
pub enum BatchEnd {
    /// Every file was stored or skipped.
    Completed,
    /// The user canceled while `file` was in flight; remaining files were not sent.
    Canceled {
        /// File being uploaded.
        file: String,
    },
    /// `file` failed; remaining files were not sent.
    Failed {
        /// File that failed.
        file: String,
        /// Cause.
        error: OrchestratorError,
    },
}

/// Result of an upload batch.
#[derive(Debug)]
pub struct UploadBatchReport {
    /// Names the files were stored under, in order.
    pub uploaded: Vec<String>,
    /// Files the user chose to skip.
    pub skipped: Vec<String>,
    /// How the batch ended.
    pub end: BatchEnd,
}

impl UploadBatchReport {
    /// Whether every file was handled.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self.end, BatchEnd::Completed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Collision {
    code: String,
    existing: Option<EntryKind>,
}

enum FileEnd {
    Stored(String),
    Skipped,
    Canceled,
}

struct UploadAttempt<'a> {
    backend: &'a dyn TransferBackend,
    listing: &'a mut dyn DirectoryIndex,
    interaction: &'a mut dyn Interaction,
    token: &'a CancellationToken,
    plan: &'a UploadPlan,
    source: &'a UploadSource,
    position: (usize, usize),
    name: String,
    overwrite: bool,
}

impl UploadAttempt<'_> {
    async fn existing_kind(&mut self) -> OrchestratorResult<Option<EntryKind>> {
        let names = [self.name.clone()];
        let found = self.listing.lookup(&names).await?;
        Ok(found.get(&self.name).copied())
    }

    /// Settle name and overwrite flag with the user; `false` when the file is skipped.
    async fn resolve(
        &mut self,
        attempt: u32,
        previous: Option<&Collision>,
    ) -> OrchestratorResult<bool> {
        let mut existing = match previous {
            Some(collision) => {
                self.listing.refresh().await?;
                self.overwrite = false;
                Some(collision.existing)
            }
            None if self.overwrite => None,
            None => self.existing_kind().await?.map(Some),
        };
        while let Some(kind) = existing {
            let conflict = UploadConflict {
                name: self.name.clone(),
                existing: kind,
                suggested: suggest_name(&mut *self.listing, &self.name, false).await?,
                attempt,
            };
            match self.interaction.choose_upload_action(&conflict).await {
                UploadChoice::Skip => return Ok(false),
                UploadChoice::Overwrite if conflict.can_overwrite() => {
                    self.overwrite = true;
                    existing = None;
                }
                UploadChoice::Overwrite => {
                    return Err(OrchestratorError::invalid_request(
                        "overwrite",
                        "directories cannot be replaced by an upload",
                        Some(conflict.name),
                    ));
                }
                UploadChoice::Rename(name) => {
                    let name = name.trim();
                    if name.is_empty() || name.contains('/') {
                        return Err(OrchestratorError::invalid_request(
                            "name",
                            "must be a single non-empty path component",
                            Some(name.to_string()),
                        ));
                    }
                    self.name = name.to_string();
                    self.overwrite = false;
                    existing = self.existing_kind().await?.map(Some);
                }
            }
        }
        Ok(true)
    }

    async fn send(&mut self) -> OrchestratorResult<Option<UploadReply>> {
        let file = tokio::fs::File::open(&self.source.path)
            .await
            .map_err(|err| OrchestratorError::io("open upload source", &self.source.path, err))?;
        let length = file
            .metadata()
            .await
            .map_err(|err| OrchestratorError::io("inspect upload source", &self.source.path, err))?
            .len();

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let mut sent = 0_u64;
        let stream = ReaderStream::new(file).map(move |chunk| {
            if let Ok(bytes) = &chunk {
                sent += bytes.len() as u64;
                let _ = progress_tx.send(sent);
            }
            chunk
        });
        let request = UploadRequest {
            target: self.plan.target,
            session_id: self.plan.session_id.clone(),
            path: join(&self.plan.dir, &self.name),
            file_name: self.name.clone(),
            overwrite: self.overwrite,
        };
        tracing::info!(path = %request.path, bytes = length, overwrite = self.overwrite, "uploading file");

        let backend = self.backend;
        let upload = backend.upload(
            &request,
            UploadBody {
                length,
                stream: Box::pin(stream),
            },
        );
        tokio::pin!(upload);
        let mut meter = SpeedMeter::new();
        loop {
            tokio::select! {
                biased;
                () = self.token.cancelled() => return Ok(None),
                reply = &mut upload => return reply.map(Some),
                Some(loaded) = progress_rx.recv() => {
                    let speed = meter.sample(loaded);
                    let phase = if loaded >= length {
                        TransferPhase::Finishing
                    } else {
                        TransferPhase::Transferring
                    };
                    self.interaction.transfer_progress(&TransferProgress {
                        direction: TransferDirection::Upload,
                        label: self.name.clone(),
                        position: Some(self.position),
                        loaded,
                        total: Some(length),
                        speed,
                        eta: meter.eta(loaded, Some(length)),
                        phase,
                    });
                }
            }
        }
    }
}

#[async_trait]
impl Attempt for UploadAttempt<'_> {
    type Output = FileEnd;
    type Conflict = Collision;

    async fn run(&mut self, attempt: u32, previous: Option<&Collision>) -> Verdict<FileEnd, Collision> {
        match self.resolve(attempt, previous).await {
            Ok(true) => {}
            Ok(false) => return Verdict::Success(FileEnd::Skipped),
            Err(err) => return Verdict::Fatal(err),
        }
        match self.send().await {
            Ok(Some(UploadReply::Stored)) => Verdict::Success(FileEnd::Stored(self.name.clone())),
            Ok(Some(UploadReply::Conflict { code, existing })) => {
                tracing::info!(name = %self.name, code = %code, attempt, "upload collided");
                Verdict::RetryableConflict(Collision { code, existing })
            }
            Ok(None) => Verdict::Success(FileEnd::Canceled),
            Err(err) => Verdict::Fatal(err),
        }
    }
}

impl TransferEngine {
    /// Existence index for `plan` over this engine's backend.
    #[must_use]
    pub fn directory_index(&self, plan: &UploadPlan) -> StatBatchIndex {
        StatBatchIndex::new(self.backend(), plan)
    }

    /// Upload `plan.files` one at a time.
    ///
    /// Collisions are resolved with the user before each send and again when
    /// the backend reports one, up to the configured number of sends per file.
    /// Cancellation, an exhausted file or any other error stops the batch.
    pub async fn upload_batch(
        &self,
        plan: &UploadPlan,
        listing: &mut dyn DirectoryIndex,
        interaction: &mut dyn Interaction,
    ) -> UploadBatchReport {
        let lease = SlotLease::acquire(&self.canceller);
        let mut report = UploadBatchReport {
            uploaded: Vec::new(),
            skipped: Vec::new(),
            end: BatchEnd::Completed,
        };
        let count = plan.files.len();
        for (index, source) in plan.files.iter().enumerate() {
            let file = source.name.clone();
            if file.trim().is_empty() {
                report.end = BatchEnd::Failed {
                    error: OrchestratorError::invalid_request(
                        "name",
                        "upload source has no file name",
                        Some(source.path.display().to_string()),
                    ),
                    file,
                };
                return report;
            }
            let mut attempt = UploadAttempt {
                backend: self.backend.as_ref(),
                listing: &mut *listing,
                interaction: &mut *interaction,
                token: &lease.token,
                plan,
                source,
                position: (index + 1, count),
                name: file.clone(),
                overwrite: false,
            };
            match run_bounded(self.limits.upload_attempts, &mut attempt).await {
                RetryOutcome::Succeeded {
                    value: FileEnd::Stored(name),
                    ..
                } => {
                    report.uploaded.push(name);
                    if let Err(error) = listing.refresh().await {
                        report.end = BatchEnd::Failed { file, error };
                        return report;
                    }
                }
                RetryOutcome::Succeeded {
                    value: FileEnd::Skipped,
                    ..
                } => {
                    tracing::info!(file = %file, "upload skipped");
                    report.skipped.push(file);
                }
                RetryOutcome::Succeeded {
                    value: FileEnd::Canceled,
                    ..
                } => {
                    tracing::info!(file = %file, "upload canceled");
                    report.end = BatchEnd::Canceled { file };
                    return report;
                }
                RetryOutcome::Exhausted { last, attempts } => {
                    tracing::warn!(file = %file, attempts, "upload still conflicting");
                    report.end = BatchEnd::Failed {
                        file,
                        error: OrchestratorError::Rejected {
                            operation: "upload",
                            status: 409,
                            code: last.code,
                            message: Some(format!(
                                "destination still taken after {attempts} attempts"
                            )),
                        },
                    };
                    return report;
                }
                RetryOutcome::Failed { error, attempts } => {
                    tracing::warn!(file = %file, attempts, error = %error.describe(), "upload failed");
                    report.end = BatchEnd::Failed { file, error };
                    return report;
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedIndex {
        taken: HashSet<String>,
        lookups: usize,
    }

    #[async_trait]
    impl DirectoryIndex for FixedIndex {
        async fn refresh(&mut self) -> OrchestratorResult<()> {
            Ok(())
        }

        async fn lookup(
            &mut self,
            names: &[String],
        ) -> OrchestratorResult<HashMap<String, EntryKind>> {
            self.lookups += 1;
            Ok(names
                .iter()
                .filter(|name| self.taken.contains(*name))
                .map(|name| (name.clone(), EntryKind::File))
                .collect())
        }
    }

    #[tokio::test]
    async fn suggestion_skips_taken_names() {
        let mut listing = FixedIndex {
            taken: ["report.csv", "report (2).csv"]
                .into_iter()
                .map(String::from)
                .collect(),
            lookups: 0,
        };
        let suggested = suggest_name(&mut listing, "report.csv", false).await.expect("suggest");
        assert_eq!(suggested, "report (3).csv");
        assert_eq!(listing.lookups, 1);
    }

    #[tokio::test]
    async fn suggestion_checks_further_chunks() {
        let taken = numbered_candidates("a.txt", false)
            .take(SUGGESTION_CHUNK + 3)
            .collect();
        let mut listing = FixedIndex { taken, lookups: 0 };
        let suggested = suggest_name(&mut listing, "a.txt", false).await.expect("suggest");
        assert_eq!(suggested, format!("a ({}).txt", SUGGESTION_CHUNK + 5));
        assert_eq!(listing.lookups, 2);
    }

    #[test]
    fn source_takes_file_name() {
        let source = UploadSource::from_path("/home/user/notes.md");
        assert_eq!(source.name, "notes.md");
    }
}
