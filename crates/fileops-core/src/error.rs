//! # Design
//!
//! - Provide structured, constant-message errors for the orchestrator.
//! - Keep request context (operation, status, backend discriminator) in fields so callers can
//!   format failures without parsing strings.
//! - Conflicts are not errors: dry-run conflicts, upload collisions and confirmation requests
//!   are modelled as outcomes by the components that recover from them.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Errors produced while talking to the fileops backend.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Network-level failure of an HTTP exchange.
    #[error("backend transport failure")]
    Transport {
        /// Operation that issued the request.
        operation: &'static str,
        /// Underlying HTTP client error.
        source: reqwest::Error,
    },
    /// Network-level failure of the push channel.
    #[error("push channel failure")]
    Push {
        /// Operation that used the push channel.
        operation: &'static str,
        /// Underlying WebSocket error.
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },
    /// Push channel refused the subscription (bad token, unknown job).
    #[error("push subscription refused")]
    PushRefused {
        /// Message sent by the backend.
        message: String,
    },
    /// Response body could not be decoded.
    #[error("backend response decode failure")]
    Decode {
        /// Operation whose response failed to decode.
        operation: &'static str,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
    /// Response decoded but had an unexpected shape.
    #[error("unexpected backend response")]
    Protocol {
        /// Operation that received the response.
        operation: &'static str,
        /// Static description of what was wrong.
        reason: &'static str,
    },
    /// Backend answered with an error envelope.
    #[error("backend rejected request")]
    Rejected {
        /// Operation that was rejected.
        operation: &'static str,
        /// HTTP status code.
        status: u16,
        /// Machine-readable discriminator from the envelope.
        code: String,
        /// Human-readable message from the envelope.
        message: Option<String>,
    },
    /// Request failed client-side validation before anything was sent.
    #[error("invalid request")]
    InvalidRequest {
        /// Field that failed validation.
        field: &'static str,
        /// Static reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// Client configuration is unusable.
    #[error("invalid client configuration")]
    InvalidConfig {
        /// Field that failed validation.
        field: &'static str,
        /// Static reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// Local file access failed.
    #[error("local io failure")]
    Io {
        /// Operation that touched the file.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
}

impl OrchestratorError {
    pub(crate) const fn transport(operation: &'static str, source: reqwest::Error) -> Self {
        Self::Transport { operation, source }
    }

    pub(crate) fn push(
        operation: &'static str,
        source: tokio_tungstenite::tungstenite::Error,
    ) -> Self {
        Self::Push {
            operation,
            source: Box::new(source),
        }
    }

    pub(crate) const fn decode(operation: &'static str, source: serde_json::Error) -> Self {
        Self::Decode { operation, source }
    }

    pub(crate) const fn protocol(operation: &'static str, reason: &'static str) -> Self {
        Self::Protocol { operation, reason }
    }

    pub(crate) fn invalid_request(
        field: &'static str,
        reason: &'static str,
        value: Option<String>,
    ) -> Self {
        Self::InvalidRequest {
            field,
            reason,
            value,
        }
    }

    pub(crate) fn invalid_config(
        field: &'static str,
        reason: &'static str,
        value: Option<String>,
    ) -> Self {
        Self::InvalidConfig {
            field,
            reason,
            value,
        }
    }

    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Whether the failure happened below the HTTP layer (connection, timeout, socket).
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Push { .. })
    }

    /// HTTP status of a rejected request.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// One-line description suitable for showing to a user.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Transport { operation, source } => format!("{operation}: network error: {source}"),
            Self::Push { operation, source } => format!("{operation}: push channel error: {source}"),
            Self::PushRefused { message } => format!("push subscription refused: {message}"),
            Self::Decode { operation, source } => {
                format!("{operation}: malformed backend response: {source}")
            }
            Self::Protocol { operation, reason } => format!("{operation}: {reason}"),
            Self::Rejected {
                operation,
                status,
                code,
                message,
            } => match message {
                Some(message) if !message.trim().is_empty() => {
                    format!("{operation}: {message} ({code}, status {status})")
                }
                _ => format!("{operation}: {code} (status {status})"),
            },
            Self::InvalidRequest {
                field,
                reason,
                value,
            }
            | Self::InvalidConfig {
                field,
                reason,
                value,
            } => match value {
                Some(value) => format!("{field}: {reason} ('{value}')"),
                None => format!("{field}: {reason}"),
            },
            Self::Io {
                operation,
                path,
                source,
            } => format!("{operation} {}: {source}", path.display()),
        }
    }
}
