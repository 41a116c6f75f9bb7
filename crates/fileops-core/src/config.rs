//! Client configuration shared by every orchestrator component.

use std::time::Duration;

use url::Url;

use crate::error::{OrchestratorError, OrchestratorResult};

/// Path of the push channel relative to the backend origin.
pub const PUSH_PATH: &str = "/ws/fileops";

/// Tunables for talking to one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Backend origin; API paths are resolved against it.
    pub base_url: Url,
    /// Explicit push channel endpoint; derived from `base_url` when absent.
    pub push_url: Option<Url>,
    /// Timeout applied to JSON requests.
    pub request_timeout: Duration,
    /// How long the push transport may take to open before polling takes over.
    pub push_open_timeout: Duration,
    /// Interval between job status polls.
    pub poll_interval: Duration,
    /// Consecutive failed polls tolerated before observation gives up.
    pub poll_failure_limit: u32,
    /// Lifetime requested for push tokens.
    pub token_ttl: Duration,
    /// Upload attempts per file before the batch aborts.
    pub upload_attempts: u32,
    /// Resubmissions allowed after a confirmation-required download response.
    pub confirm_retries: u32,
    /// Delay before a successfully finished progress view is released.
    pub auto_finalize_delay: Duration,
}

impl ClientConfig {
    /// Configuration with the default timings for `base_url`.
    #[must_use]
    pub const fn new(base_url: Url) -> Self {
        Self {
            base_url,
            push_url: None,
            request_timeout: Duration::from_secs(30),
            push_open_timeout: Duration::from_millis(700),
            poll_interval: Duration::from_millis(500),
            poll_failure_limit: 20,
            token_ttl: Duration::from_secs(120),
            upload_attempts: 3,
            confirm_retries: 1,
            auto_finalize_delay: Duration::from_millis(650),
        }
    }

    /// Reject configurations that could never work.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidConfig`] for non-HTTP base URLs, non-WebSocket push
    /// URLs, zero timings or a zero attempt bound.
    pub fn validate(&self) -> OrchestratorResult<()> {
        if !matches!(self.base_url.scheme(), "http" | "https") {
            return Err(OrchestratorError::invalid_config(
                "base_url",
                "scheme must be http or https",
                Some(self.base_url.to_string()),
            ));
        }
        if let Some(push_url) = &self.push_url
            && !matches!(push_url.scheme(), "ws" | "wss")
        {
            return Err(OrchestratorError::invalid_config(
                "push_url",
                "scheme must be ws or wss",
                Some(push_url.to_string()),
            ));
        }
        let timings = [
            ("request_timeout", self.request_timeout),
            ("push_open_timeout", self.push_open_timeout),
            ("poll_interval", self.poll_interval),
            ("token_ttl", self.token_ttl),
        ];
        for (field, value) in timings {
            if value.is_zero() {
                return Err(OrchestratorError::invalid_config(
                    field,
                    "must be greater than zero",
                    None,
                ));
            }
        }
        let bounds = [
            ("upload_attempts", self.upload_attempts),
            ("poll_failure_limit", self.poll_failure_limit),
        ];
        if let Some((field, _)) = bounds.into_iter().find(|(_, bound)| *bound == 0) {
            return Err(OrchestratorError::invalid_config(
                field,
                "must be greater than zero",
                None,
            ));
        }
        Ok(())
    }

    /// Push channel endpoint without query parameters.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidConfig`] when the base URL cannot carry a WebSocket
    /// scheme.
    pub fn push_endpoint(&self) -> OrchestratorResult<Url> {
        if let Some(url) = &self.push_url {
            return Ok(url.clone());
        }
        let scheme = match self.base_url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        let mut url = self.base_url.clone();
        url.set_scheme(scheme).map_err(|()| {
            OrchestratorError::invalid_config(
                "base_url",
                "cannot derive push endpoint",
                Some(self.base_url.to_string()),
            )
        })?;
        url.set_path(PUSH_PATH);
        url.set_query(None);
        Ok(url)
    }

    /// Resolve an API path against the base URL.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidConfig`] when the joined URL is invalid.
    pub fn endpoint(&self, path: &str) -> OrchestratorResult<Url> {
        self.base_url.join(path).map_err(|_| {
            OrchestratorError::invalid_config("base_url", "cannot join api path", Some(path.into()))
        })
    }
}
