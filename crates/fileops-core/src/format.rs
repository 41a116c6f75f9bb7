//! Human-readable sizes, speeds, durations and job failure text.

use std::time::Duration;

use fileops_api_models::{Job, JobState};

const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

/// Format a byte count in binary units (`1.5 MiB`).
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        return format!("{bytes} B");
    }
    let text = if value >= 10.0 {
        format!("{value:.1}")
    } else {
        format!("{value:.2}")
    };
    let text = text.trim_end_matches('0').trim_end_matches('.');
    format!("{text} {}", UNITS[unit])
}

/// Format a speed estimate; `None` when there is nothing meaningful to show.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn format_speed(bytes_per_second: f64) -> Option<String> {
    if !bytes_per_second.is_finite() || bytes_per_second <= 0.0 {
        return None;
    }
    Some(format!("{}/s", format_bytes(bytes_per_second.round() as u64)))
}

/// Format a remaining duration as `Ns`, `Mm Ss` or `Hh Mm`.
#[must_use]
pub fn format_eta(remaining: Duration) -> Option<String> {
    let seconds = remaining.as_secs_f64().round();
    if seconds <= 0.0 {
        return None;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let seconds = seconds as u64;
    let minutes = seconds / 60;
    let rest = seconds % 60;
    if minutes == 0 {
        return Some(format!("{rest}s"));
    }
    let hours = minutes / 60;
    if hours == 0 {
        return Some(format!("{minutes}m {rest}s"));
    }
    Some(format!("{hours}h {}m", minutes % 60))
}

/// Completion percentage by bytes, falling back to files.
#[must_use]
pub fn job_percent(job: &Job) -> u8 {
    let progress = &job.progress;
    let (done, total) = if progress.bytes_total > 0 {
        (progress.bytes_done, progress.bytes_total)
    } else {
        (progress.files_done, progress.files_total)
    };
    if total == 0 {
        return 0;
    }
    let percent = (u128::from(done.min(total)) * 100 + u128::from(total) / 2) / u128::from(total);
    u8::try_from(percent).unwrap_or(100)
}

/// Failure text for a job in the error state, formatting free-space context when present.
#[must_use]
pub fn describe_failure(job: &Job) -> Option<String> {
    if job.state != JobState::Error {
        return None;
    }
    let message = job
        .error
        .as_deref()
        .filter(|message| !message.trim().is_empty())
        .unwrap_or("error");
    let Some(check) = &job.progress.check else {
        return Some(message.to_string());
    };
    let location = check
        .location
        .as_deref()
        .map(|location| format!(" on {location}"))
        .unwrap_or_default();
    Some(format!(
        "not enough space{location}: need {}, free {} ({message})",
        format_bytes(check.need_bytes),
        format_bytes(check.free_bytes),
    ))
}
