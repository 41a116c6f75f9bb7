//! Output renderers and formatting helpers for CLI commands.

use anyhow::anyhow;
use fileops_api_models::Job;
use fileops_core::format::{format_bytes, format_eta, format_speed, job_percent};
use fileops_core::{JobUpdate, TransferDirection, TransferPhase, TransferProgress};

use crate::cli::OutputFormat;
use crate::client::{CliError, CliResult};

pub(crate) fn render_job_list(jobs: &[Job], format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => {
            let text = serde_json::to_string_pretty(jobs)
                .map_err(|err| CliError::failure(anyhow!("failed to format JSON: {err}")))?;
            println!("{text}");
        }
        OutputFormat::Table => {
            println!(
                "{:<36} {:<6} {:<8} {:>5} {:>21} CREATED",
                "ID", "OP", "STATE", "PROG", "BYTES"
            );
            for job in jobs {
                println!("{}", job_row(job));
            }
        }
    }
    Ok(())
}

pub(crate) fn job_row(job: &Job) -> String {
    let created = job
        .created_at()
        .map_or_else(|| "-".to_string(), |at| at.format("%Y-%m-%d %H:%M:%S").to_string());
    format!(
        "{:<36} {:<6} {:<8} {:>4}% {:>21} {created}",
        job.job_id,
        job.op.as_str(),
        job.state.as_str(),
        job_percent(job),
        byte_ratio(job.progress.bytes_done, job.progress.bytes_total),
    )
}

fn byte_ratio(done: u64, total: u64) -> String {
    if total == 0 {
        return "-".to_string();
    }
    format!("{}/{}", format_bytes(done), format_bytes(total))
}

/// One progress line for a job snapshot.
pub(crate) fn job_line(update: &JobUpdate) -> String {
    let job = &update.job;
    let progress = &job.progress;
    let mut line = format!(
        "[{}] {} {:>3}%",
        job.job_id,
        job.state.as_str(),
        job_percent(job)
    );
    if progress.files_total > 0 {
        line.push_str(&format!(" {}/{} files", progress.files_done, progress.files_total));
    }
    if progress.bytes_total > 0 {
        line.push_str(&format!(" {}", byte_ratio(progress.bytes_done, progress.bytes_total)));
    }
    if let Some(speed) = format_speed(update.speed) {
        line.push_str(&format!(" {speed}"));
    }
    if let Some(eta) = update.eta.and_then(format_eta) {
        line.push_str(&format!(" eta {eta}"));
    }
    if let Some(current) = &progress.current {
        line.push_str(&format!(" {} {}", current.phase, current.name));
    }
    line
}

/// Whole percent of a transfer; `None` when the size is unknown.
pub(crate) fn transfer_percent(progress: &TransferProgress) -> Option<u8> {
    let total = progress.total.filter(|total| *total > 0)?;
    let percent = u128::from(progress.loaded.min(total)) * 100 / u128::from(total);
    Some(u8::try_from(percent).unwrap_or(100))
}

/// One progress line for an upload or download.
pub(crate) fn transfer_line(progress: &TransferProgress) -> String {
    let verb = match (progress.direction, progress.phase) {
        (TransferDirection::Upload, TransferPhase::Finishing) => "finishing",
        (TransferDirection::Upload, TransferPhase::Transferring) => "uploading",
        (TransferDirection::Download, _) => "downloading",
    };
    let mut line = match progress.position {
        Some((index, count)) => format!("[{index}/{count}] {verb} {}", progress.label),
        None => format!("{verb} {}", progress.label),
    };
    match (transfer_percent(progress), progress.total) {
        (Some(percent), Some(total)) => line.push_str(&format!(
            " {percent:>3}% {}",
            byte_ratio(progress.loaded, total)
        )),
        _ => line.push_str(&format!(" {}", format_bytes(progress.loaded))),
    }
    if progress.phase == TransferPhase::Transferring {
        if let Some(speed) = format_speed(progress.speed) {
            line.push_str(&format!(" {speed}"));
        }
        if let Some(eta) = progress.eta.and_then(format_eta) {
            line.push_str(&format!(" eta {eta}"));
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use fileops_api_models::{CurrentItem, JobProgress, JobState, OperationKind};
    use std::time::Duration;

    fn running_job() -> Job {
        Job {
            job_id: "job-9".into(),
            op: OperationKind::Move,
            state: JobState::Running,
            created_ts: 1_700_000_000.0,
            started_ts: None,
            finished_ts: None,
            progress: JobProgress {
                files_done: 1,
                files_total: 4,
                bytes_done: 512 * 1024,
                bytes_total: 2 * 1024 * 1024,
                current: Some(CurrentItem {
                    name: "movie.mkv".into(),
                    path: None,
                    phase: "copy".into(),
                    is_dir: None,
                }),
                check: None,
            },
            error: None,
        }
    }

    #[test]
    fn job_line_includes_throughput_when_known() {
        let update = JobUpdate {
            job: running_job(),
            speed: 2048.0,
            eta: Some(Duration::from_secs(95)),
        };
        assert_eq!(
            job_line(&update),
            "[job-9] running  25% 1/4 files 512 KiB/2 MiB 2 KiB/s eta 1m 35s copy movie.mkv"
        );
    }

    #[test]
    fn job_row_renders_created_time() {
        let row = job_row(&running_job());
        assert!(row.starts_with("job-9"));
        assert!(row.contains("move"));
        assert!(row.contains(" 25%"));
        assert!(row.ends_with("2023-11-14 22:13:20"));
    }

    #[test]
    fn upload_reports_finishing_phase() {
        let progress = TransferProgress {
            direction: TransferDirection::Upload,
            label: "a.txt".into(),
            position: Some((2, 3)),
            loaded: 100,
            total: Some(100),
            speed: 50.0,
            eta: None,
            phase: TransferPhase::Finishing,
        };
        assert_eq!(transfer_line(&progress), "[2/3] finishing a.txt 100% 100 B/100 B");
    }

    #[test]
    fn unknown_size_shows_bytes_only() {
        let progress = TransferProgress {
            direction: TransferDirection::Download,
            label: "archive.zip".into(),
            position: None,
            loaded: 2048,
            total: None,
            speed: 0.0,
            eta: None,
            phase: TransferPhase::Transferring,
        };
        assert_eq!(transfer_percent(&progress), None);
        assert_eq!(transfer_line(&progress), "downloading archive.zip 2 KiB");
    }
}
