//! Transfer endpoints: `/api/fs/download`, `/api/fs/archive`, `/api/fs/upload`
//! and `/api/fs/stat-batch`.

use std::io;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use fileops_api_models::{
    ArchiveItem, ArchiveRequest, ERROR_CONFIRM_REQUIRED, ERROR_EXISTS, ERROR_NOT_A_FILE,
    EntryKind, EntryStatus, ErrorEnvelope, STAT_BATCH_LIMIT, StatBatchRequest, StatBatchResponse,
    TargetKind, UploadResponse,
};
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use percent_encoding::percent_decode_str;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, Response, StatusCode};

use crate::api::{HttpBackend, rejection};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::interaction::ConfirmPrompt;

const DOWNLOAD_PATH: &str = "/api/fs/download";
const ARCHIVE_PATH: &str = "/api/fs/archive";
const UPLOAD_PATH: &str = "/api/fs/upload";
const STAT_BATCH_PATH: &str = "/api/fs/stat-batch";

/// What a download fetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadSource {
    /// One entry; directories need `zip`.
    Path {
        /// Full entry path.
        path: String,
        /// Stream the entry as a zip archive.
        zip: bool,
    },
    /// Several entries packed into one zip archive.
    Archive {
        /// Entries to pack.
        items: Vec<ArchiveItem>,
        /// Suggested archive name.
        zip_name: Option<String>,
    },
}

/// A download request; resubmitted unchanged apart from the confirmation flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Filesystem the entries live on.
    pub target: TargetKind,
    /// Remote session identifier.
    pub session_id: Option<String>,
    /// What to fetch.
    pub source: DownloadSource,
    /// File name used when the response carries none.
    pub filename_hint: Option<String>,
}

/// Streaming body of a successful download.
pub struct DownloadBody {
    /// File name from `Content-Disposition`.
    pub filename: Option<String>,
    /// Size from `Content-Length`.
    pub total: Option<u64>,
    /// Body chunks.
    pub stream: BoxStream<'static, OrchestratorResult<Bytes>>,
}

impl std::fmt::Debug for DownloadBody {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("DownloadBody")
            .field("filename", &self.filename)
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

/// Reply to a download request.
#[derive(Debug)]
pub enum DownloadReply {
    /// The body is streaming.
    Body(DownloadBody),
    /// The archive size could not be checked; resubmit with confirmation to proceed.
    ConfirmRequired(ConfirmPrompt),
}

/// Upload of one file to a settled destination path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    /// Filesystem receiving the file.
    pub target: TargetKind,
    /// Remote session identifier.
    pub session_id: Option<String>,
    /// Full destination path including the final name.
    pub path: String,
    /// File name sent in the multipart part.
    pub file_name: String,
    /// Replace an existing entry.
    pub overwrite: bool,
}

/// Chunk stream of an upload body.
pub type UploadStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + Sync>>;

/// Streaming upload payload.
pub struct UploadBody {
    /// Exact body length.
    pub length: u64,
    /// Body chunks.
    pub stream: UploadStream,
}

impl std::fmt::Debug for UploadBody {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("UploadBody")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// Reply to an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadReply {
    /// The file was stored.
    Stored,
    /// The destination is taken (`exists`) or is a directory (`not_a_file`).
    Conflict {
        /// Backend discriminator.
        code: String,
        /// Type of the existing entry.
        existing: Option<EntryKind>,
    },
}

/// Backend operations the transfer engine needs.
#[async_trait]
pub trait TransferBackend: Send + Sync {
    /// Start a download; `confirmed` appends the confirmation flag.
    async fn download(
        &self,
        request: &DownloadRequest,
        confirmed: bool,
    ) -> OrchestratorResult<DownloadReply>;

    /// Upload one file.
    async fn upload(&self, request: &UploadRequest, body: UploadBody) -> OrchestratorResult<UploadReply>;

    /// Existence of `names` inside `dir`, in request order.
    async fn stat_batch(
        &self,
        target: TargetKind,
        session_id: Option<&str>,
        dir: &str,
        names: &[String],
    ) -> OrchestratorResult<Vec<EntryStatus>>;
}

/// [`TransferBackend`] over the HTTP API.
#[derive(Debug, Clone)]
pub struct HttpTransferBackend {
    http: HttpBackend,
}

impl HttpTransferBackend {
    /// Backend over `http`.
    #[must_use]
    pub const fn new(http: HttpBackend) -> Self {
        Self { http }
    }
}

fn target_query(target: TargetKind, session_id: Option<&str>) -> Vec<(&'static str, String)> {
    let mut query = vec![("target", target.as_str().to_string())];
    if let Some(sid) = session_id {
        query.push(("sid", sid.to_string()));
    }
    query
}

fn entry_kind(label: Option<&str>) -> Option<EntryKind> {
    match label? {
        "file" => Some(EntryKind::File),
        "dir" => Some(EntryKind::Dir),
        "link" => Some(EntryKind::Link),
        _ => Some(EntryKind::Other),
    }
}

async fn read_envelope(response: Response) -> (StatusCode, Bytes, Option<ErrorEnvelope>) {
    let status = response.status();
    let body = response.bytes().await.unwrap_or_default();
    let envelope = serde_json::from_slice::<ErrorEnvelope>(&body).ok();
    (status, body, envelope)
}

#[async_trait]
impl TransferBackend for HttpTransferBackend {
    async fn download(
        &self,
        request: &DownloadRequest,
        confirmed: bool,
    ) -> OrchestratorResult<DownloadReply> {
        const OPERATION: &str = "download";
        let mut query = target_query(request.target, request.session_id.as_deref());
        let builder = match &request.source {
            DownloadSource::Path { path, zip } => {
                query.push(("path", path.clone()));
                if *zip {
                    query.push(("archive", "zip".to_string()));
                }
                if confirmed {
                    query.push(("confirm", "1".to_string()));
                }
                self.http.transfer_request(Method::GET, DOWNLOAD_PATH)?.query(&query)
            }
            DownloadSource::Archive { items, zip_name } => {
                if confirmed {
                    query.push(("confirm", "1".to_string()));
                }
                let body = ArchiveRequest {
                    items: items.clone(),
                    zip_name: zip_name.clone(),
                };
                self.http
                    .transfer_request(Method::POST, ARCHIVE_PATH)?
                    .query(&query)
                    .json(&body)
            }
        };
        let response = builder
            .send()
            .await
            .map_err(|err| OrchestratorError::transport(OPERATION, err))?;

        if !response.status().is_success() {
            let (status, body, envelope) = read_envelope(response).await;
            if let Some(envelope) = envelope.filter(|envelope| envelope.is(ERROR_CONFIRM_REQUIRED)) {
                return Ok(DownloadReply::ConfirmRequired(ConfirmPrompt {
                    estimated_bytes: envelope.estimated_bytes,
                    max_bytes: envelope.max_bytes,
                    estimate_truncated: envelope.estimate_truncated,
                    message: envelope.message,
                }));
            }
            return Err(rejection(OPERATION, status, &body));
        }

        let filename = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .and_then(content_disposition_filename);
        let total = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|err| OrchestratorError::transport(OPERATION, err)))
            .boxed();
        Ok(DownloadReply::Body(DownloadBody {
            filename,
            total,
            stream,
        }))
    }

    async fn upload(&self, request: &UploadRequest, body: UploadBody) -> OrchestratorResult<UploadReply> {
        const OPERATION: &str = "upload";
        let mut query = target_query(request.target, request.session_id.as_deref());
        query.push(("path", request.path.clone()));
        if request.overwrite {
            query.push(("overwrite", "1".to_string()));
        }
        let part = Part::stream_with_length(reqwest::Body::wrap_stream(body.stream), body.length)
            .file_name(request.file_name.clone());
        let form = Form::new().part("file", part);
        let response = self
            .http
            .transfer_request(Method::POST, UPLOAD_PATH)?
            .query(&query)
            .multipart(form)
            .send()
            .await
            .map_err(|err| OrchestratorError::transport(OPERATION, err))?;

        let (status, body, envelope) = read_envelope(response).await;
        if status.is_success() {
            return match serde_json::from_slice::<UploadResponse>(&body) {
                Ok(reply) if !reply.ok => Err(rejection(OPERATION, StatusCode::OK, &body)),
                _ => Ok(UploadReply::Stored),
            };
        }
        if let Some(envelope) =
            envelope.filter(|envelope| envelope.is(ERROR_EXISTS) || envelope.is(ERROR_NOT_A_FILE))
        {
            let existing = entry_kind(envelope.entry_type.as_deref()).or_else(|| {
                envelope.is(ERROR_NOT_A_FILE).then_some(EntryKind::Dir)
            });
            return Ok(UploadReply::Conflict {
                code: envelope.error,
                existing,
            });
        }
        Err(rejection(OPERATION, status, &body))
    }

    async fn stat_batch(
        &self,
        target: TargetKind,
        session_id: Option<&str>,
        dir: &str,
        names: &[String],
    ) -> OrchestratorResult<Vec<EntryStatus>> {
        const OPERATION: &str = "stat batch";
        let mut statuses = Vec::with_capacity(names.len());
        for chunk in names.chunks(STAT_BATCH_LIMIT) {
            let request = StatBatchRequest {
                target,
                sid: session_id.map(ToString::to_string),
                cwd: Some(dir.to_string()),
                paths: chunk.to_vec(),
            };
            let reply = self.http.post_json(OPERATION, STAT_BATCH_PATH, &request).await?;
            let response: StatBatchResponse = reply.into_result(OPERATION)?;
            if response.items.len() != chunk.len() {
                return Err(OrchestratorError::protocol(
                    OPERATION,
                    "reply item count does not match request",
                ));
            }
            statuses.extend(response.items);
        }
        Ok(statuses)
    }
}

/// File name from a `Content-Disposition` value, preferring the RFC 5987 form.
#[must_use]
pub fn content_disposition_filename(value: &str) -> Option<String> {
    let mut plain = None;
    for parameter in value.split(';').map(str::trim) {
        let Some((key, raw)) = parameter.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let raw = raw.trim();
        if key == "filename*" {
            let encoded = raw.split_once("''").map_or(raw, |(_, encoded)| encoded);
            let encoded = encoded.trim_matches('"');
            if let Ok(decoded) = percent_decode_str(encoded).decode_utf8() {
                let decoded = decoded.trim();
                if !decoded.is_empty() {
                    return Some(decoded.to_string());
                }
            }
        } else if key == "filename" && plain.is_none() {
            let name = raw.trim_matches('"').trim();
            if !name.is_empty() {
                plain = Some(name.to_string());
            }
        }
    }
    plain
}
