//! Shared context, error types and configuration wiring for the CLI.

use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use anyhow::anyhow;
use fileops_core::{ClientConfig, OrchestratorError, SessionState};
use fileops_telemetry::LogFormat;
use url::Url;

use crate::cli::{Cli, OutputFormat};

/// Command failure, split by exit code into bad input and failed work.
#[derive(Debug)]
pub(crate) enum CliError {
    Validation(String),
    Failure(anyhow::Error),
}

/// Result of a command handler.
pub(crate) type CliResult<T> = Result<T, CliError>;

impl CliError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn failure(error: impl Into<anyhow::Error>) -> Self {
        Self::Failure(error.into())
    }

    pub(crate) const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::Failure(_) => 3,
        }
    }

    pub(crate) fn display_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Failure(error) => format!("{error:#}"),
        }
    }
}

impl Display for CliError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.display_message())
    }
}

impl std::error::Error for CliError {}

impl From<OrchestratorError> for CliError {
    /// Bad input and refused requests are the caller's to fix; everything else is a failure.
    fn from(error: OrchestratorError) -> Self {
        match &error {
            OrchestratorError::InvalidRequest { .. } | OrchestratorError::InvalidConfig { .. } => {
                Self::validation(error.describe())
            }
            OrchestratorError::Rejected { status, .. } if matches!(status, 400 | 409 | 422) => {
                Self::validation(error.describe())
            }
            _ => Self::failure(anyhow!(error.describe())),
        }
    }
}

/// Session and output settings shared by every command handler.
pub(crate) struct AppContext {
    pub(crate) session: SessionState,
    pub(crate) output: OutputFormat,
}

impl AppContext {
    /// Build the session from parsed flags and their environment fallbacks.
    pub(crate) fn from_cli(cli: &Cli) -> CliResult<Self> {
        cli.validate()?;
        let mut config = ClientConfig::new(cli.api_url.clone());
        config.push_url = cli.push_url.clone();
        config.request_timeout = Duration::from_secs(cli.timeout);
        Self::new(config, cli.output)
    }

    pub(crate) fn new(config: ClientConfig, output: OutputFormat) -> CliResult<Self> {
        config.validate()?;
        tracing::debug!(base_url = %config.base_url, "session configured");
        Ok(Self {
            session: SessionState::new(config)?,
            output,
        })
    }
}

/// `clap` value parser for `--api-url` and `--push-url`.
pub(crate) fn parse_url(input: &str) -> Result<Url, String> {
    input
        .parse::<Url>()
        .map_err(|err| format!("invalid URL '{input}': {err}"))
}

/// Parse the log format provided to the CLI.
pub(crate) fn parse_log_format(input: &str) -> Result<LogFormat, String> {
    input.parse()
}
