use anyhow::anyhow;
use fileops_api_models::{
    DestinationSpec, Job, JobState, OperationKind, OperationOptions, OperationRequest, SourceSpec,
};
use fileops_core::format::{describe_failure, format_bytes};
use fileops_core::{Interaction, JobOutcome, ListingSnapshot, OperationOutcome};
use tokio_util::sync::CancellationToken;

use crate::cli::{ClearArgs, DeleteArgs, JobIdArgs, JobsArgs, OperationArgs};
use crate::client::{AppContext, CliError, CliResult};
use crate::output::render_job_list;

pub(crate) fn operation_request(op: OperationKind, args: &OperationArgs) -> OperationRequest {
    OperationRequest {
        op,
        src: SourceSpec {
            target: args.from_target.into(),
            session_id: args.from_sid.clone(),
            base_dir: args.from_dir.clone(),
            relative_paths: args.names.clone(),
        },
        dst: Some(DestinationSpec {
            target: args.to_target.into(),
            session_id: args.to_sid.clone(),
            path: args.to_dir.clone(),
            is_dir: true,
        }),
        options: OperationOptions::default(),
    }
}

pub(crate) async fn handle_operation(
    ctx: &mut AppContext,
    op: OperationKind,
    args: OperationArgs,
    ui: &mut dyn Interaction,
    cancel: &CancellationToken,
) -> CliResult<()> {
    let request = operation_request(op, &args);
    let listing = if args.listing.is_empty() {
        ctx.session.guard_listing(&request).await?
    } else {
        ListingSnapshot::from_names(args.listing)
    };
    let outcome = ctx
        .session
        .run_operation(request, &listing, ui, cancel)
        .await?;
    report_operation(outcome)
}

pub(crate) async fn handle_delete(
    ctx: &mut AppContext,
    args: DeleteArgs,
    ui: &mut dyn Interaction,
    cancel: &CancellationToken,
) -> CliResult<()> {
    let request = OperationRequest {
        op: OperationKind::Delete,
        src: SourceSpec {
            target: args.target.into(),
            session_id: args.sid,
            base_dir: args.dir,
            relative_paths: args.names,
        },
        dst: None,
        options: OperationOptions::default(),
    };
    let outcome = ctx
        .session
        .run_operation(request, &ListingSnapshot::default(), ui, cancel)
        .await?;
    report_operation(outcome)
}

pub(crate) async fn handle_watch(
    ctx: &mut AppContext,
    args: JobIdArgs,
    ui: &mut dyn Interaction,
    cancel: &CancellationToken,
) -> CliResult<()> {
    let job_id = args.job_id.trim();
    if job_id.is_empty() {
        return Err(CliError::validation("job id must not be empty"));
    }
    let outcome = ctx.session.observe(job_id, ui, cancel).await;
    report_job(outcome)
}

pub(crate) async fn handle_cancel(ctx: &AppContext, args: JobIdArgs) -> CliResult<()> {
    let job_id = args.job_id.trim();
    if job_id.is_empty() {
        return Err(CliError::validation("job id must not be empty"));
    }
    if ctx.session.jobs().cancel(job_id).await? {
        println!("cancel requested for job {job_id}");
    } else {
        println!("job {job_id} is no longer running");
    }
    Ok(())
}

pub(crate) async fn handle_jobs(ctx: &AppContext, args: JobsArgs) -> CliResult<()> {
    let jobs = ctx.session.jobs().list_jobs(args.limit).await?;
    render_job_list(&jobs, ctx.output)
}

pub(crate) async fn handle_clear(ctx: &AppContext, args: ClearArgs) -> CliResult<()> {
    let deleted = ctx.session.jobs().clear_history(args.scope.into()).await?;
    println!("removed {deleted} job(s) from history");
    Ok(())
}

fn report_operation(outcome: OperationOutcome) -> CliResult<()> {
    match outcome {
        OperationOutcome::Rejected(reason) => Err(CliError::validation(reason.notice())),
        OperationOutcome::Dismissed => {
            println!("conflicts left unresolved; nothing was executed");
            Ok(())
        }
        OperationOutcome::Observed(outcome) => report_job(outcome),
    }
}

fn report_job(outcome: JobOutcome) -> CliResult<()> {
    match outcome {
        JobOutcome::Finished(job) => finished(&job),
        JobOutcome::ObservationFailed { last, error } => {
            let hint = last.as_ref().map_or_else(String::new, |job| {
                format!(
                    " (last state {}; resume with `fileops watch {}`)",
                    job.state.as_str(),
                    job.job_id
                )
            });
            Err(CliError::failure(anyhow!(
                "lost track of the job: {}; it may still be running{hint}",
                error.describe()
            )))
        }
    }
}

fn finished(job: &Job) -> CliResult<()> {
    match job.state {
        JobState::Done => {
            let progress = &job.progress;
            println!(
                "job {} done: {} file(s), {}",
                job.job_id,
                progress.files_done,
                format_bytes(progress.bytes_done)
            );
            Ok(())
        }
        JobState::Canceled => {
            println!("job {} canceled", job.job_id);
            Ok(())
        }
        JobState::Error => Err(CliError::failure(anyhow!(
            "job {} failed: {}",
            job.job_id,
            describe_failure(job).unwrap_or_else(|| "error".to_string())
        ))),
        JobState::Queued | JobState::Running => Err(CliError::failure(anyhow!(
            "job {} stopped reporting while {}",
            job.job_id,
            job.state.as_str()
        ))),
    }
}
