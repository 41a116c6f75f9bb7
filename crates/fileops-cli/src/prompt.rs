//! Terminal prompts answering the orchestrator's questions.
//!
//! Every question has a safe answer on end of input: the conflict sheet is
//! dismissed, colliding uploads are skipped and unsized archives are declined.

use std::fmt::Display;
use std::io::Write;

use async_trait::async_trait;
use fileops_api_models::{ConflictAction, EntryKind};
use fileops_core::format::format_bytes;
use fileops_core::{
    ConfirmPrompt, Interaction, JobUpdate, ResolutionSheet, SheetVerdict, TransferPhase,
    TransferProgress, UploadChoice, UploadConflict,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::output::{job_line, transfer_line, transfer_percent};

/// A line typed at the conflict sheet prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SheetCommand {
    Apply,
    Dismiss,
    Default(ConflictAction),
    /// Zero-based row with an explicit action, or `None` to follow the default again.
    Row(usize, Option<ConflictAction>),
}

fn parse_action(word: &str) -> Option<ConflictAction> {
    match word {
        "replace" | "r" => Some(ConflictAction::Replace),
        "skip" | "s" => Some(ConflictAction::Skip),
        _ => None,
    }
}

pub(crate) fn parse_sheet_command(line: &str) -> Option<SheetCommand> {
    let line = line.trim().to_ascii_lowercase();
    let mut words = line.split_whitespace();
    let first = words.next()?;
    let second = words.next();
    if words.next().is_some() {
        return None;
    }
    match (first, second) {
        ("a" | "apply", None) => Some(SheetCommand::Apply),
        ("d" | "dismiss" | "q", None) => Some(SheetCommand::Dismiss),
        ("all" | "default", Some(action)) => parse_action(action).map(SheetCommand::Default),
        (row, Some(action)) => {
            let index = row.parse::<usize>().ok()?.checked_sub(1)?;
            if action == "default" {
                return Some(SheetCommand::Row(index, None));
            }
            parse_action(action).map(|action| SheetCommand::Row(index, Some(action)))
        }
        _ => None,
    }
}

pub(crate) fn parse_upload_answer(line: &str, conflict: &UploadConflict) -> Option<UploadChoice> {
    let answer = line.trim();
    match answer.to_ascii_lowercase().as_str() {
        "" | "r" | "rename" => Some(UploadChoice::Rename(conflict.suggested.clone())),
        "s" | "skip" => Some(UploadChoice::Skip),
        "o" | "overwrite" => conflict.can_overwrite().then_some(UploadChoice::Overwrite),
        _ if answer.contains('/') => None,
        _ => Some(UploadChoice::Rename(answer.to_string())),
    }
}

const fn kind_label(kind: Option<EntryKind>) -> &'static str {
    match kind {
        Some(EntryKind::File) => "file",
        Some(EntryKind::Dir) => "directory",
        Some(EntryKind::Link) => "link",
        Some(EntryKind::Other) | None => "entry",
    }
}

/// [`Interaction`] over a line-based input and a text output.
pub(crate) struct TerminalInteraction<R, W> {
    input: R,
    output: W,
    last_transfer: Option<(String, Option<u8>, TransferPhase)>,
}

impl<R, W> TerminalInteraction<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: Write + Send,
{
    pub(crate) const fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            last_transfer: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn into_output(self) -> W {
        self.output
    }

    fn say(&mut self, line: impl Display) {
        let _ = writeln!(self.output, "{line}");
    }

    /// Ask a question; `None` on end of input.
    async fn ask(&mut self, question: &str) -> Option<String> {
        let _ = write!(self.output, "{question} ");
        let _ = self.output.flush();
        let mut line = String::new();
        match self.input.read_line(&mut line).await {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    }

    fn render_sheet(&mut self, sheet: &ResolutionSheet) {
        self.say(format!(
            "{} conflict(s), default action: {}",
            sheet.rows().len(),
            sheet.default_action().as_str()
        ));
        let lines: Vec<String> = sheet
            .rows()
            .iter()
            .enumerate()
            .map(|(index, row)| {
                let action = sheet.effective(index).unwrap_or(ConflictAction::Skip);
                let marker = if row.choice.is_some() { "*" } else { "" };
                let dir = if row.conflict.is_dir { "/" } else { "" };
                format!(
                    "  {:>3}. {}{dir} -> {}{dir} [{}{marker}]",
                    index + 1,
                    row.conflict.src_path,
                    row.conflict.dst_path,
                    action.as_str()
                )
            })
            .collect();
        for line in lines {
            self.say(line);
        }
    }
}

#[async_trait]
impl<R, W> Interaction for TerminalInteraction<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: Write + Send,
{
    async fn review_conflicts(&mut self, sheet: &mut ResolutionSheet) -> SheetVerdict {
        loop {
            self.render_sheet(sheet);
            let Some(answer) = self
                .ask("[a]pply, [d]ismiss, 'all replace|skip' or '<row> replace|skip|default':")
                .await
            else {
                return SheetVerdict::Dismiss;
            };
            match parse_sheet_command(&answer) {
                Some(SheetCommand::Apply) => return SheetVerdict::Apply,
                Some(SheetCommand::Dismiss) => return SheetVerdict::Dismiss,
                Some(SheetCommand::Default(action)) => sheet.set_default(action),
                Some(SheetCommand::Row(index, Some(action))) => {
                    if !sheet.set_choice(index, action) {
                        self.say(format!("there is no row {}", index + 1));
                    }
                }
                Some(SheetCommand::Row(index, None)) => sheet.clear_choice(index),
                None => self.say(format!("unrecognised answer '{answer}'")),
            }
        }
    }

    async fn choose_upload_action(&mut self, conflict: &UploadConflict) -> UploadChoice {
        let overwrite = if conflict.can_overwrite() {
            "[o]verwrite, "
        } else {
            ""
        };
        let question = format!(
            "'{}' already exists as a {} (attempt {}). {overwrite}[r]ename to '{}', [s]kip, or type a new name:",
            conflict.name,
            kind_label(conflict.existing),
            conflict.attempt,
            conflict.suggested
        );
        loop {
            let Some(answer) = self.ask(&question).await else {
                return UploadChoice::Skip;
            };
            match parse_upload_answer(&answer, conflict) {
                Some(choice) => return choice,
                None => self.say(format!("cannot use '{answer}' here")),
            }
        }
    }

    async fn confirm_archive(&mut self, prompt: &ConfirmPrompt) -> bool {
        let mut details = Vec::new();
        if let Some(estimate) = prompt.estimated_bytes {
            let qualifier = if prompt.estimate_truncated { "at least " } else { "" };
            details.push(format!("estimated {qualifier}{}", format_bytes(estimate)));
        }
        if let Some(max) = prompt.max_bytes {
            details.push(format!("limit {}", format_bytes(max)));
        }
        let message = prompt
            .message
            .as_deref()
            .unwrap_or("the archive size could not be checked");
        let question = if details.is_empty() {
            format!("{message}. Download anyway? [y/N]")
        } else {
            format!("{message} ({}). Download anyway? [y/N]", details.join(", "))
        };
        matches!(
            self.ask(&question).await.as_deref().map(str::to_ascii_lowercase).as_deref(),
            Some("y" | "yes")
        )
    }

    fn notice(&mut self, message: &str) {
        self.say(message);
    }

    fn job_progress(&mut self, update: &JobUpdate) {
        self.say(job_line(update));
    }

    fn transfer_progress(&mut self, progress: &TransferProgress) {
        let key = (
            progress.label.clone(),
            transfer_percent(progress),
            progress.phase,
        );
        if self.last_transfer.as_ref() == Some(&key) {
            return;
        }
        self.last_transfer = Some(key);
        self.say(transfer_line(progress));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fileops_api_models::Conflict;
    use fileops_core::TransferDirection;

    fn terminal(input: &'static str) -> TerminalInteraction<&'static [u8], Vec<u8>> {
        TerminalInteraction::new(input.as_bytes(), Vec::new())
    }

    fn upload_conflict(existing: Option<EntryKind>) -> UploadConflict {
        UploadConflict {
            name: "a.txt".into(),
            existing,
            suggested: "a (2).txt".into(),
            attempt: 1,
        }
    }

    #[test]
    fn sheet_commands_parse() {
        assert_eq!(parse_sheet_command(" A "), Some(SheetCommand::Apply));
        assert_eq!(parse_sheet_command("dismiss"), Some(SheetCommand::Dismiss));
        assert_eq!(
            parse_sheet_command("all replace"),
            Some(SheetCommand::Default(ConflictAction::Replace))
        );
        assert_eq!(
            parse_sheet_command("2 skip"),
            Some(SheetCommand::Row(1, Some(ConflictAction::Skip)))
        );
        assert_eq!(parse_sheet_command("1 default"), Some(SheetCommand::Row(0, None)));
        assert_eq!(parse_sheet_command("0 skip"), None);
        assert_eq!(parse_sheet_command("1 rename"), None);
        assert_eq!(parse_sheet_command(""), None);
    }

    #[test]
    fn upload_answers_respect_directories() {
        let file = upload_conflict(Some(EntryKind::File));
        assert_eq!(parse_upload_answer("", &file), Some(UploadChoice::Rename("a (2).txt".into())));
        assert_eq!(parse_upload_answer("o", &file), Some(UploadChoice::Overwrite));
        assert_eq!(
            parse_upload_answer("notes.txt", &file),
            Some(UploadChoice::Rename("notes.txt".into()))
        );
        assert_eq!(parse_upload_answer("x/y", &file), None);

        let dir = upload_conflict(Some(EntryKind::Dir));
        assert_eq!(parse_upload_answer("overwrite", &dir), None);
        assert_eq!(parse_upload_answer("skip", &dir), Some(UploadChoice::Skip));
    }

    #[tokio::test]
    async fn sheet_edits_apply_before_submission() {
        let mut ui = terminal("2 replace\nall replace\n1 skip\na\n");
        let mut sheet = ResolutionSheet::new(vec![
            Conflict::new("/a/x.txt", "/b/x.txt"),
            Conflict::new("/a/y.txt", "/b/y.txt"),
        ]);

        let verdict = ui.review_conflicts(&mut sheet).await;

        assert_eq!(verdict, SheetVerdict::Apply);
        assert_eq!(sheet.default_action(), ConflictAction::Replace);
        assert_eq!(sheet.effective(0), Some(ConflictAction::Skip));
        assert_eq!(sheet.effective(1), Some(ConflictAction::Replace));
        let output = String::from_utf8(ui.into_output()).expect("utf8");
        assert!(output.contains("2 conflict(s), default action: skip"));
        assert!(output.contains("/a/y.txt -> /b/y.txt [replace*]"));
    }

    #[tokio::test]
    async fn end_of_input_is_the_safe_answer() {
        let mut sheet = ResolutionSheet::new(vec![Conflict::new("/a/x.txt", "/b/x.txt")]);
        assert_eq!(terminal("").review_conflicts(&mut sheet).await, SheetVerdict::Dismiss);
        assert_eq!(
            terminal("").choose_upload_action(&upload_conflict(None)).await,
            UploadChoice::Skip
        );
        let prompt = ConfirmPrompt {
            estimated_bytes: None,
            max_bytes: None,
            estimate_truncated: false,
            message: None,
        };
        assert!(!terminal("").confirm_archive(&prompt).await);
    }

    #[tokio::test]
    async fn invalid_upload_answer_is_asked_again() {
        let mut ui = terminal("o\ns\n");
        let choice = ui
            .choose_upload_action(&upload_conflict(Some(EntryKind::Dir)))
            .await;
        assert_eq!(choice, UploadChoice::Skip);
        let output = String::from_utf8(ui.into_output()).expect("utf8");
        assert!(!output.contains("[o]verwrite"));
        assert!(output.contains("cannot use 'o' here"));
    }

    #[tokio::test]
    async fn archive_confirmation_shows_limits() {
        let mut ui = terminal("yes\n");
        let prompt = ConfirmPrompt {
            estimated_bytes: Some(3 * 1024 * 1024),
            max_bytes: Some(1024 * 1024 * 1024),
            estimate_truncated: true,
            message: Some("archive is large".into()),
        };
        assert!(ui.confirm_archive(&prompt).await);
        let output = String::from_utf8(ui.into_output()).expect("utf8");
        assert!(output.contains("estimated at least 3 MiB, limit 1 GiB"));
    }

    #[test]
    fn transfer_progress_prints_only_on_change() {
        let mut ui = terminal("");
        let mut progress = TransferProgress {
            direction: TransferDirection::Download,
            label: "big.bin".into(),
            position: None,
            loaded: 10,
            total: Some(1_000),
            speed: 0.0,
            eta: None,
            phase: TransferPhase::Transferring,
        };
        ui.transfer_progress(&progress);
        progress.loaded = 12;
        ui.transfer_progress(&progress);
        progress.loaded = 500;
        ui.transfer_progress(&progress);
        let output = String::from_utf8(ui.into_output()).expect("utf8");
        assert_eq!(output.lines().count(), 2);
    }
}
