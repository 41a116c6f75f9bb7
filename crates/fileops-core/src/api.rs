//! Thin HTTP layer shared by the job client and the transfer backend.

use std::sync::Arc;

use bytes::Bytes;
use fileops_api_models::ErrorEnvelope;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::ClientConfig;
use crate::error::{OrchestratorError, OrchestratorResult};

/// Buffered response of a JSON request.
#[derive(Debug, Clone)]
pub(crate) struct RawReply {
    pub(crate) status: StatusCode,
    pub(crate) body: Bytes,
}

impl RawReply {
    pub(crate) fn decode<T: DeserializeOwned>(&self, operation: &'static str) -> OrchestratorResult<T> {
        serde_json::from_slice(&self.body).map_err(|err| OrchestratorError::decode(operation, err))
    }

    /// Decode a success body or turn the error envelope into [`OrchestratorError::Rejected`].
    pub(crate) fn into_result<T: DeserializeOwned>(
        self,
        operation: &'static str,
    ) -> OrchestratorResult<T> {
        if self.status.is_success() {
            self.decode(operation)
        } else {
            Err(rejection(operation, self.status, &self.body))
        }
    }

    #[allow(dead_code)]
    pub(crate) fn envelope(&self) -> Option<ErrorEnvelope> {
        serde_json::from_slice(&self.body).ok()
    }
}

/// Build a [`OrchestratorError::Rejected`] from an error response body.
pub(crate) fn rejection(operation: &'static str, status: StatusCode, body: &[u8]) -> OrchestratorError {
    let envelope = serde_json::from_slice::<ErrorEnvelope>(body).ok();
    let (code, message) = match envelope {
        Some(envelope) if !envelope.error.is_empty() => (envelope.error, envelope.message),
        _ => {
            let text = String::from_utf8_lossy(body).trim().to_string();
            let message = (!text.is_empty()).then_some(text);
            (format!("http_{}", status.as_u16()), message)
        }
    };
    OrchestratorError::Rejected {
        operation,
        status: status.as_u16(),
        code,
        message,
    }
}

/// HTTP client bound to one backend.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    config: Arc<ClientConfig>,
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpBackend")
            .field("base_url", &self.config.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpBackend {
    /// Validate `config` and build the underlying HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration is invalid or the HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> OrchestratorResult<Self> {
        config.validate()?;
        let client = Client::builder()
            .connect_timeout(config.request_timeout)
            .build()
            .map_err(|err| OrchestratorError::transport("build http client", err))?;
        Ok(Self::with_client(client, config))
    }

    /// Wrap an existing HTTP client.
    #[must_use]
    pub fn with_client(client: Client, config: ClientConfig) -> Self {
        Self {
            client,
            config: Arc::new(config),
        }
    }

    /// Configuration this backend was built with.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Request builder for a transfer; transfers are not bound by the JSON timeout.
    pub(crate) fn transfer_request(&self, method: Method, path: &str) -> OrchestratorResult<RequestBuilder> {
        let url = self.config.endpoint(path)?;
        Ok(self.client.request(method, url))
    }

    pub(crate) async fn get_json(
        &self,
        operation: &'static str,
        path: &str,
        query: &[(&str, String)],
    ) -> OrchestratorResult<RawReply> {
        let url = self.config.endpoint(path)?;
        let request = self
            .client
            .get(url)
            .query(query)
            .timeout(self.config.request_timeout);
        Self::send(operation, request).await
    }

    pub(crate) async fn post_json<B: Serialize + Sync>(
        &self,
        operation: &'static str,
        path: &str,
        body: &B,
    ) -> OrchestratorResult<RawReply> {
        let url = self.config.endpoint(path)?;
        let request = self
            .client
            .post(url)
            .json(body)
            .timeout(self.config.request_timeout);
        Self::send(operation, request).await
    }

    async fn send(operation: &'static str, request: RequestBuilder) -> OrchestratorResult<RawReply> {
        let response = request
            .send()
            .await
            .map_err(|err| OrchestratorError::transport(operation, err))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| OrchestratorError::transport(operation, err))?;
        tracing::debug!(operation, status = status.as_u16(), bytes = body.len(), "backend reply");
        Ok(RawReply { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_prefers_envelope_fields() {
        let err = rejection(
            "cancel job",
            StatusCode::NOT_FOUND,
            br#"{"ok":false,"error":"job_not_found","message":"no such job"}"#,
        );
        match err {
            OrchestratorError::Rejected {
                status,
                code,
                message,
                ..
            } => {
                assert_eq!(status, 404);
                assert_eq!(code, "job_not_found");
                assert_eq!(message.as_deref(), Some("no such job"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejection_falls_back_to_status_and_text() {
        let err = rejection("fetch job", StatusCode::BAD_GATEWAY, b"upstream down\n");
        match err {
            OrchestratorError::Rejected { code, message, .. } => {
                assert_eq!(code, "http_502");
                assert_eq!(message.as_deref(), Some("upstream down"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
