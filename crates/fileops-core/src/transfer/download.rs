use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fileops_api_models::ERROR_CONFIRM_REQUIRED;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::backend::{DownloadBody, DownloadReply, DownloadRequest, TransferBackend};
use super::{SlotLease, TransferEngine, TransferOutcome};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::interaction::{
    ConfirmPrompt, Interaction, TransferDirection, TransferPhase, TransferProgress,
};
use crate::retry::{Attempt, RetryOutcome, Verdict, run_bounded};
use crate::speed::SpeedMeter;

const DEFAULT_FILENAME: &str = "download";

/// Where a download is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadDestination {
    /// Exactly this file.
    File(PathBuf),
    /// A file inside this directory named after the response.
    Directory(PathBuf),
}

/// A finished download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    /// Where the bytes were written.
    pub path: PathBuf,
    /// Name announced by the backend, the caller's hint or `download`.
    pub filename: String,
    /// Bytes written.
    pub bytes: u64,
}

enum DownloadEnd {
    Completed(DownloadedFile),
    Canceled,
}

/// Reduce an announced file name to a single safe path component.
fn safe_filename(name: &str) -> Option<String> {
    let name = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    (!name.is_empty() && name != "." && name != "..").then(|| name.to_string())
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(ToOwned::to_owned).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

struct DownloadAttempt<'a> {
    backend: &'a dyn TransferBackend,
    request: &'a DownloadRequest,
    destination: &'a DownloadDestination,
    interaction: &'a mut dyn Interaction,
    token: &'a CancellationToken,
}

impl DownloadAttempt<'_> {
    fn resolve_path(&self, announced: Option<&str>) -> (PathBuf, String) {
        let filename = announced
            .and_then(safe_filename)
            .or_else(|| self.request.filename_hint.as_deref().and_then(safe_filename))
            .unwrap_or_else(|| DEFAULT_FILENAME.to_string());
        match self.destination {
            DownloadDestination::File(path) => (path.clone(), filename),
            DownloadDestination::Directory(dir) => (dir.join(&filename), filename),
        }
    }

    async fn receive(&mut self, body: DownloadBody) -> OrchestratorResult<DownloadEnd> {
        let (path, filename) = self.resolve_path(body.filename.as_deref());
        let staging = part_path(&path);
        let mut file = tokio::fs::File::create(&staging)
            .await
            .map_err(|err| OrchestratorError::io("create download file", &staging, err))?;
        let result = self.stream_into(body, &mut file, &filename).await;
        drop(file);
        match result {
            Ok(Some(bytes)) => {
                tokio::fs::rename(&staging, &path)
                    .await
                    .map_err(|err| OrchestratorError::io("finish download file", &path, err))?;
                tracing::info!(path = %path.display(), bytes, "download finished");
                Ok(DownloadEnd::Completed(DownloadedFile {
                    path,
                    filename,
                    bytes,
                }))
            }
            Ok(None) => {
                discard(&staging).await;
                Ok(DownloadEnd::Canceled)
            }
            Err(err) => {
                discard(&staging).await;
                Err(err)
            }
        }
    }

    /// Copy the body into `file`; `None` when canceled.
    async fn stream_into(
        &mut self,
        mut body: DownloadBody,
        file: &mut tokio::fs::File,
        label: &str,
    ) -> OrchestratorResult<Option<u64>> {
        let mut meter = SpeedMeter::new();
        let mut loaded = 0_u64;
        loop {
            let chunk = tokio::select! {
                biased;
                () = self.token.cancelled() => return Ok(None),
                chunk = body.stream.next() => chunk,
            };
            let Some(chunk) = chunk else {
                break;
            };
            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|err| OrchestratorError::io("write download file", label, err))?;
            loaded += chunk.len() as u64;
            let speed = meter.sample(loaded);
            self.interaction.transfer_progress(&TransferProgress {
                direction: TransferDirection::Download,
                label: label.to_string(),
                position: None,
                loaded,
                total: body.total,
                speed,
                eta: meter.eta(loaded, body.total),
                phase: TransferPhase::Transferring,
            });
        }
        file.flush()
            .await
            .map_err(|err| OrchestratorError::io("write download file", label, err))?;
        Ok(Some(loaded))
    }
}

async fn discard(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        tracing::debug!(path = %path.display(), error = %err, "partial download not removed");
    }
}

#[async_trait]
impl Attempt for DownloadAttempt<'_> {
    type Output = DownloadEnd;
    type Conflict = ConfirmPrompt;

    async fn run(
        &mut self,
        attempt: u32,
        previous: Option<&ConfirmPrompt>,
    ) -> Verdict<DownloadEnd, ConfirmPrompt> {
        if let Some(prompt) = previous
            && !self.interaction.confirm_archive(prompt).await
        {
            tracing::info!(attempt, "archive download declined");
            return Verdict::Success(DownloadEnd::Canceled);
        }
        let confirmed = previous.is_some();
        let reply = tokio::select! {
            biased;
            () = self.token.cancelled() => return Verdict::Success(DownloadEnd::Canceled),
            reply = self.backend.download(self.request, confirmed) => reply,
        };
        match reply {
            Ok(DownloadReply::ConfirmRequired(prompt)) => {
                tracing::info!(attempt, confirmed, "download needs confirmation");
                Verdict::RetryableConflict(prompt)
            }
            Ok(DownloadReply::Body(body)) => match self.receive(body).await {
                Ok(end) => Verdict::Success(end),
                Err(err) => Verdict::Fatal(err),
            },
            Err(err) => Verdict::Fatal(err),
        }
    }
}

impl TransferEngine {
    /// Download `request` into `destination`.
    ///
    /// A confirmation-required reply prompts the user once; a second one on the confirmed
    /// resubmission fails the transfer. Declining the prompt cancels it.
    pub async fn download(
        &self,
        request: &DownloadRequest,
        destination: &DownloadDestination,
        interaction: &mut dyn Interaction,
    ) -> TransferOutcome<DownloadedFile> {
        let lease = SlotLease::acquire(&self.canceller);
        let mut attempt = DownloadAttempt {
            backend: self.backend.as_ref(),
            request,
            destination,
            interaction,
            token: &lease.token,
        };
        let max_attempts = self.limits.confirm_retries.saturating_add(1);
        match run_bounded(max_attempts, &mut attempt).await {
            RetryOutcome::Succeeded {
                value: DownloadEnd::Completed(file),
                ..
            } => TransferOutcome::Completed(file),
            RetryOutcome::Succeeded {
                value: DownloadEnd::Canceled,
                ..
            } => {
                tracing::info!("download canceled");
                TransferOutcome::Canceled
            }
            RetryOutcome::Exhausted { last, attempts } => {
                tracing::warn!(attempts, "confirmation still required after resubmission");
                TransferOutcome::Failed(OrchestratorError::Rejected {
                    operation: "download",
                    status: 409,
                    code: ERROR_CONFIRM_REQUIRED.to_string(),
                    message: last.message,
                })
            }
            RetryOutcome::Failed { error, attempts } => {
                tracing::warn!(attempts, error = %error.describe(), "download failed");
                TransferOutcome::Failed(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announced_names_are_reduced_to_one_component() {
        assert_eq!(safe_filename("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(safe_filename("dir\\file.txt").as_deref(), Some("file.txt"));
        assert_eq!(safe_filename(".."), None);
        assert_eq!(safe_filename("  "), None);
    }

    #[test]
    fn staging_file_sits_next_to_target() {
        assert_eq!(
            part_path(Path::new("/tmp/out/report.zip")),
            PathBuf::from("/tmp/out/report.zip.part")
        );
    }
}
