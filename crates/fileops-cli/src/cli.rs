//! Argument parsing and command dispatch.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use fileops_api_models::{ClearScope, OperationKind, TargetKind};
use fileops_telemetry::{LogFormat, LoggingConfig, init_logging};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::client::{AppContext, CliError, CliResult, parse_log_format, parse_url};
use crate::commands::jobs::{
    handle_cancel, handle_clear, handle_delete, handle_jobs, handle_operation, handle_watch,
};
use crate::commands::transfers::{handle_download, handle_upload};
use crate::prompt::TerminalInteraction;

pub(crate) const DEFAULT_API_URL: &str = "http://127.0.0.1:8080";
pub(crate) const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Parses CLI arguments, executes the requested command and returns the
/// process exit code.
pub async fn run() -> i32 {
    let cli = Cli::parse();

    let logging = LoggingConfig {
        format: cli.log_format.unwrap_or_else(LogFormat::infer),
        component: "fileops-cli",
        ..LoggingConfig::default()
    };
    if let Err(err) = init_logging(&logging) {
        eprintln!("warning: {err}");
    }

    let command = command_label(&cli.command);
    let result = match AppContext::from_cli(&cli) {
        Ok(mut ctx) => dispatch(&mut ctx, cli.command).await,
        Err(err) => Err(err),
    };

    match result {
        Ok(()) => {
            tracing::debug!(command, "command finished");
            0
        }
        Err(err) => {
            let exit_code = err.exit_code();
            tracing::debug!(command, exit_code, "command failed");
            eprintln!("error: {}", err.display_message());
            exit_code
        }
    }
}

async fn dispatch(ctx: &mut AppContext, command: Command) -> CliResult<()> {
    let mut ui = TerminalInteraction::new(BufReader::new(tokio::io::stdin()), std::io::stderr());
    match command {
        Command::Copy(args) => {
            let cancel = cancel_on_interrupt();
            handle_operation(ctx, OperationKind::Copy, args, &mut ui, &cancel).await
        }
        Command::Move(args) => {
            let cancel = cancel_on_interrupt();
            handle_operation(ctx, OperationKind::Move, args, &mut ui, &cancel).await
        }
        Command::Delete(args) => {
            let cancel = cancel_on_interrupt();
            handle_delete(ctx, args, &mut ui, &cancel).await
        }
        Command::Watch(args) => {
            let cancel = cancel_on_interrupt();
            handle_watch(ctx, args, &mut ui, &cancel).await
        }
        Command::Cancel(args) => handle_cancel(ctx, args).await,
        Command::Jobs(args) => handle_jobs(ctx, args).await,
        Command::Clear(args) => handle_clear(ctx, args).await,
        Command::Download(args) => {
            abort_transfer_on_interrupt(ctx);
            handle_download(ctx, args, &mut ui).await
        }
        Command::Upload(args) => {
            abort_transfer_on_interrupt(ctx);
            handle_upload(ctx, args, &mut ui).await
        }
    }
}

/// Exit status used when a second ctrl-c ends the process.
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Runs `first` on the first ctrl-c and exits on the second.
fn on_interrupt(first: impl FnOnce() + Send + 'static) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        first();
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("second interrupt; exiting");
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    });
}

/// Token cancelled on the first ctrl-c; the job keeps being observed afterwards.
fn cancel_on_interrupt() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    on_interrupt(move || {
        eprintln!("cancel requested; waiting for the job to stop (ctrl-c again to exit)");
        trigger.cancel();
    });
    token
}

/// Cancels the transfer on the first ctrl-c, even one arriving before the transfer starts.
fn abort_transfer_on_interrupt(ctx: &AppContext) {
    let canceller = ctx.session.transfer_canceller();
    on_interrupt(move || {
        eprintln!("canceling transfer (ctrl-c again to exit)");
        canceller.cancel_or_defer();
    });
}

const fn command_label(command: &Command) -> &'static str {
    match command {
        Command::Copy(_) => "copy",
        Command::Move(_) => "move",
        Command::Delete(_) => "delete",
        Command::Watch(_) => "watch",
        Command::Cancel(_) => "cancel",
        Command::Jobs(_) => "jobs",
        Command::Clear(_) => "clear",
        Command::Download(_) => "download",
        Command::Upload(_) => "upload",
    }
}

#[derive(Parser)]
#[command(name = "fileops", about = "Run file operations and transfers against a fileops backend")]
pub(crate) struct Cli {
    #[arg(
        long,
        global = true,
        env = "FILEOPS_API_URL",
        value_parser = parse_url,
        default_value = DEFAULT_API_URL
    )]
    pub(crate) api_url: Url,
    #[arg(
        long,
        global = true,
        env = "FILEOPS_PUSH_URL",
        value_parser = parse_url,
        help = "WebSocket endpoint for job progress (derived from --api-url when absent)"
    )]
    pub(crate) push_url: Option<Url>,
    #[arg(
        long,
        global = true,
        env = "FILEOPS_HTTP_TIMEOUT_SECS",
        default_value_t = DEFAULT_TIMEOUT_SECS
    )]
    pub(crate) timeout: u64,
    #[arg(
        long,
        global = true,
        env = "FILEOPS_LOG_FORMAT",
        value_parser = parse_log_format
    )]
    pub(crate) log_format: Option<LogFormat>,
    #[arg(
        long = "output",
        alias = "format",
        global = true,
        value_enum,
        default_value_t = OutputFormat::Table,
        help = "Select output format for commands that render structured data"
    )]
    pub(crate) output: OutputFormat,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Copy entries into a directory.
    Copy(OperationArgs),
    /// Move entries into a directory.
    Move(OperationArgs),
    /// Delete entries.
    Delete(DeleteArgs),
    /// Follow a running job until it finishes.
    Watch(JobIdArgs),
    /// Ask the backend to cancel a job.
    Cancel(JobIdArgs),
    /// List recent jobs.
    Jobs(JobsArgs),
    /// Remove finished jobs from the history.
    Clear(ClearArgs),
    /// Download a file, or several entries as one zip archive.
    Download(DownloadArgs),
    /// Upload local files into a directory.
    Upload(UploadArgs),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum TargetArg {
    Local,
    Remote,
}

impl From<TargetArg> for TargetKind {
    fn from(value: TargetArg) -> Self {
        match value {
            TargetArg::Local => Self::Local,
            TargetArg::Remote => Self::Remote,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum ScopeArg {
    #[default]
    History,
    Finished,
    Errors,
    All,
}

impl From<ScopeArg> for ClearScope {
    fn from(value: ScopeArg) -> Self {
        match value {
            ScopeArg::History => Self::History,
            ScopeArg::Finished => Self::Finished,
            ScopeArg::Errors => Self::Errors,
            ScopeArg::All => Self::All,
        }
    }
}

#[derive(Args)]
pub(crate) struct OperationArgs {
    #[arg(long, value_enum, default_value_t = TargetArg::Local)]
    pub(crate) from_target: TargetArg,
    #[arg(long, help = "Session identifier of a remote source")]
    pub(crate) from_sid: Option<String>,
    #[arg(long = "from", help = "Directory the entries live in")]
    pub(crate) from_dir: String,
    #[arg(long, value_enum, default_value_t = TargetArg::Local)]
    pub(crate) to_target: TargetArg,
    #[arg(long, help = "Session identifier of a remote destination")]
    pub(crate) to_sid: Option<String>,
    #[arg(long = "to", help = "Destination directory")]
    pub(crate) to_dir: String,
    #[arg(required = true, help = "Entry names relative to --from")]
    pub(crate) names: Vec<String>,
    #[arg(
        long,
        value_delimiter = ',',
        help = "Names currently in --from; defaults to the selected entries"
    )]
    pub(crate) listing: Vec<String>,
}

#[derive(Args)]
pub(crate) struct DeleteArgs {
    #[arg(long, value_enum, default_value_t = TargetArg::Local)]
    pub(crate) target: TargetArg,
    #[arg(long)]
    pub(crate) sid: Option<String>,
    #[arg(long, help = "Directory the entries live in")]
    pub(crate) dir: String,
    #[arg(required = true, help = "Entry names relative to --dir")]
    pub(crate) names: Vec<String>,
}

#[derive(Args)]
pub(crate) struct JobIdArgs {
    #[arg(help = "Job identifier")]
    pub(crate) job_id: String,
}

#[derive(Args)]
pub(crate) struct JobsArgs {
    #[arg(long, default_value_t = 20, help = "Number of jobs to show (1-100)")]
    pub(crate) limit: u32,
}

#[derive(Args)]
pub(crate) struct ClearArgs {
    #[arg(long, value_enum, default_value_t = ScopeArg::History)]
    pub(crate) scope: ScopeArg,
}

#[derive(Args)]
pub(crate) struct DownloadArgs {
    #[arg(long, value_enum, default_value_t = TargetArg::Local)]
    pub(crate) target: TargetArg,
    #[arg(long)]
    pub(crate) sid: Option<String>,
    #[arg(required = true, help = "Entry paths; several paths are packed into one archive")]
    pub(crate) paths: Vec<String>,
    #[arg(long, help = "Stream a single entry as a zip archive")]
    pub(crate) zip: bool,
    #[arg(long, help = "Archive name when downloading several entries")]
    pub(crate) zip_name: Option<String>,
    #[arg(long, help = "Target file or directory (defaults to the current directory)")]
    pub(crate) out: Option<PathBuf>,
}

#[derive(Args)]
pub(crate) struct UploadArgs {
    #[arg(long, value_enum, default_value_t = TargetArg::Local)]
    pub(crate) target: TargetArg,
    #[arg(long)]
    pub(crate) sid: Option<String>,
    #[arg(long, help = "Destination directory")]
    pub(crate) dir: String,
    #[arg(required = true, help = "Local files to upload, in order")]
    pub(crate) files: Vec<PathBuf>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    #[default]
    Table,
    Json,
}

impl Cli {
    pub(crate) fn validate(&self) -> CliResult<()> {
        if self.timeout == 0 {
            return Err(CliError::validation("--timeout must be at least one second"));
        }
        Ok(())
    }
}
