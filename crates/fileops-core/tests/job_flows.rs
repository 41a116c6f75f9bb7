use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use fileops_api_models::{
    ConflictAction, DestinationSpec, JobState, OperationKind, OperationOptions, OperationRequest,
    SourceSpec, TargetKind,
};
use fileops_core::jobs::plan_transfer;
use fileops_core::{
    ClientConfig, ConfirmPrompt, DryRunCapability, GuardDecision, GuardRejection, Interaction,
    JobOutcome, JobUpdate, ListingSnapshot, OperationOutcome, ResolutionSheet, SessionState,
    SheetVerdict, UploadChoice, UploadConflict,
};
use httpmock::prelude::*;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Default)]
struct ScriptedUi {
    dismiss_sheet: bool,
    overrides: Vec<(usize, ConflictAction)>,
    reviews: usize,
    notices: Vec<String>,
    states: Vec<JobState>,
}

#[async_trait]
impl Interaction for ScriptedUi {
    async fn review_conflicts(&mut self, sheet: &mut ResolutionSheet) -> SheetVerdict {
        self.reviews += 1;
        for (index, action) in &self.overrides {
            sheet.set_choice(*index, *action);
        }
        if self.dismiss_sheet {
            SheetVerdict::Dismiss
        } else {
            SheetVerdict::Apply
        }
    }

    async fn choose_upload_action(&mut self, _conflict: &UploadConflict) -> UploadChoice {
        UploadChoice::Skip
    }

    async fn confirm_archive(&mut self, _prompt: &ConfirmPrompt) -> bool {
        false
    }

    fn notice(&mut self, message: &str) {
        self.notices.push(message.to_string());
    }

    fn job_progress(&mut self, update: &JobUpdate) {
        self.states.push(update.job.state);
    }
}

fn session(server: &MockServer) -> Result<SessionState> {
    let mut config = ClientConfig::new(Url::parse(&server.base_url())?);
    config.poll_interval = Duration::from_millis(20);
    Ok(SessionState::new(config)?)
}

fn copy_request(names: &[&str], from: &str, to: &str) -> OperationRequest {
    OperationRequest {
        op: OperationKind::Copy,
        src: SourceSpec {
            target: TargetKind::Local,
            session_id: None,
            base_dir: from.to_string(),
            relative_paths: names.iter().map(ToString::to_string).collect(),
        },
        dst: Some(DestinationSpec {
            target: TargetKind::Local,
            session_id: None,
            path: to.to_string(),
            is_dir: true,
        }),
        options: OperationOptions::default(),
    }
}

fn job(job_id: &str, state: &str) -> Value {
    json!({
        "job_id": job_id,
        "op": "copy",
        "state": state,
        "created_ts": 1_700_000_000.0,
        "progress": {"files_done": 0, "files_total": 1, "bytes_done": 0, "bytes_total": 0}
    })
}

fn copy_body(options: Value) -> Value {
    json!({
        "op": "copy",
        "src": {"target": "local", "cwd": "/a", "paths": ["x.txt"]},
        "dst": {"target": "local", "path": "/b", "is_dir": true},
        "options": options
    })
}

fn mock_observation(server: &MockServer, job_id: &str, state: &str) {
    server.mock(|when, then| {
        when.method(POST).path("/api/fileops/ws-token");
        then.status(404);
    });
    let body = json!({"ok": true, "job": job(job_id, state)});
    let path = format!("/api/fileops/jobs/{job_id}");
    server.mock(move |when, then| {
        when.method(GET).path(path.as_str());
        then.status(200)
            .header("content-type", "application/json")
            .json_body(body.clone());
    });
}

fn finished_state(outcome: &OperationOutcome) -> Option<JobState> {
    match outcome {
        OperationOutcome::Observed(JobOutcome::Finished(job)) => Some(job.state),
        _ => None,
    }
}

#[tokio::test]
async fn conflict_free_dry_run_executes_once_with_replace() -> Result<()> {
    let server = MockServer::start_async().await;
    let dry_run = server.mock(|when, then| {
        when.method(POST)
            .path("/api/fileops/jobs")
            .json_body(copy_body(json!({"overwrite": "ask", "dry_run": true})));
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({"ok": true, "dry_run": true, "conflicts": []}));
    });
    let execute = server.mock(|when, then| {
        when.method(POST)
            .path("/api/fileops/jobs")
            .json_body(copy_body(json!({"overwrite": "replace"})));
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({"ok": true, "job_id": "job-1", "job": job("job-1", "queued")}));
    });
    mock_observation(&server, "job-1", "done");

    let mut state = session(&server)?;
    let mut ui = ScriptedUi::default();
    let outcome = state
        .run_operation(
            copy_request(&["x.txt"], "/a", "/b"),
            &ListingSnapshot::default(),
            &mut ui,
            &CancellationToken::new(),
        )
        .await?;

    assert_eq!(finished_state(&outcome), Some(JobState::Done));
    dry_run.assert();
    execute.assert();
    assert_eq!(ui.reviews, 0);
    assert_eq!(ui.states.first(), Some(&JobState::Queued));
    assert_eq!(ui.states.last(), Some(&JobState::Done));
    assert_eq!(state.dry_run_capability(), DryRunCapability::Supported);
    assert_eq!(state.displayed_job().as_deref(), Some("job-1"));

    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(state.displayed_job(), None, "view released after the finalize delay");
    Ok(())
}

#[tokio::test]
async fn accepted_default_skip_submits_every_conflict_path() -> Result<()> {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST)
            .path("/api/fileops/jobs")
            .json_body(copy_body(json!({"overwrite": "ask", "dry_run": true})));
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({
                "ok": true,
                "dry_run": true,
                "conflicts": [{"kind": "exists", "src_path": "/a/x.txt", "dst_path": "/b/x.txt"}]
            }));
    });
    let execute = server.mock(|when, then| {
        when.method(POST)
            .path("/api/fileops/jobs")
            .json_body(copy_body(json!({
                "overwrite": "ask",
                "decisions": {"/a/x.txt": "skip", "/b/x.txt": "skip"},
                "default_action": "skip"
            })));
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({"ok": true, "job_id": "job-2", "job": job("job-2", "running")}));
    });
    mock_observation(&server, "job-2", "done");

    let mut state = session(&server)?;
    let mut ui = ScriptedUi::default();
    let outcome = state
        .run_operation(
            copy_request(&["x.txt"], "/a", "/b"),
            &ListingSnapshot::default(),
            &mut ui,
            &CancellationToken::new(),
        )
        .await?;

    assert_eq!(finished_state(&outcome), Some(JobState::Done));
    assert_eq!(ui.reviews, 1);
    execute.assert();
    Ok(())
}

#[tokio::test]
async fn replacing_every_row_still_submits_ask() -> Result<()> {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST)
            .path("/api/fileops/jobs")
            .json_body(copy_body(json!({"overwrite": "ask", "dry_run": true})));
        then.status(409)
            .header("content-type", "application/json")
            .json_body(json!({
                "ok": false,
                "error": "conflicts",
                "conflicts": [{"src_path": "/a/x.txt", "dst_path": "/b/x.txt"}]
            }));
    });
    let execute = server.mock(|when, then| {
        when.method(POST)
            .path("/api/fileops/jobs")
            .json_body(copy_body(json!({
                "overwrite": "ask",
                "decisions": {"/a/x.txt": "replace", "/b/x.txt": "replace"},
                "default_action": "skip"
            })));
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({"ok": true, "job_id": "job-3", "job": job("job-3", "done")}));
    });

    let mut state = session(&server)?;
    let mut ui = ScriptedUi {
        overrides: vec![(0, ConflictAction::Replace)],
        ..ScriptedUi::default()
    };
    let outcome = state
        .run_operation(
            copy_request(&["x.txt"], "/a", "/b"),
            &ListingSnapshot::default(),
            &mut ui,
            &CancellationToken::new(),
        )
        .await?;

    assert_eq!(finished_state(&outcome), Some(JobState::Done));
    execute.assert();
    Ok(())
}

#[tokio::test]
async fn dismissed_sheet_executes_nothing() -> Result<()> {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST)
            .path("/api/fileops/jobs")
            .json_body(copy_body(json!({"overwrite": "ask", "dry_run": true})));
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({
                "ok": true,
                "dry_run": true,
                "conflicts": [{"src_path": "/a/x.txt", "dst_path": "/b/x.txt"}]
            }));
    });
    let execute = server.mock(|when, then| {
        when.method(POST)
            .path("/api/fileops/jobs")
            .json_body(copy_body(json!({
                "overwrite": "ask",
                "decisions": {"/a/x.txt": "skip", "/b/x.txt": "skip"},
                "default_action": "skip"
            })));
        then.status(200);
    });

    let mut state = session(&server)?;
    let mut ui = ScriptedUi {
        dismiss_sheet: true,
        ..ScriptedUi::default()
    };
    let outcome = state
        .run_operation(
            copy_request(&["x.txt"], "/a", "/b"),
            &ListingSnapshot::default(),
            &mut ui,
            &CancellationToken::new(),
        )
        .await?;

    assert!(matches!(outcome, OperationOutcome::Dismissed));
    execute.assert_hits(0);
    Ok(())
}

#[tokio::test]
async fn missing_dry_run_support_is_remembered() -> Result<()> {
    let server = MockServer::start_async().await;
    let dry_run = server.mock(|when, then| {
        when.method(POST)
            .path("/api/fileops/jobs")
            .json_body(copy_body(json!({"overwrite": "ask", "dry_run": true})));
        then.status(404);
    });
    let execute = server.mock(|when, then| {
        when.method(POST)
            .path("/api/fileops/jobs")
            .json_body(copy_body(json!({"overwrite": "replace"})));
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({"ok": true, "job_id": "job-4", "job": job("job-4", "done")}));
    });

    let mut state = session(&server)?;
    let mut ui = ScriptedUi::default();
    for _ in 0..2 {
        let outcome = state
            .run_operation(
                copy_request(&["x.txt"], "/a", "/b"),
                &ListingSnapshot::default(),
                &mut ui,
                &CancellationToken::new(),
            )
            .await?;
        assert_eq!(finished_state(&outcome), Some(JobState::Done));
    }

    assert_eq!(state.dry_run_capability(), DryRunCapability::Unsupported);
    dry_run.assert_hits(1);
    execute.assert_hits(2);
    Ok(())
}

#[tokio::test]
async fn legacy_backend_job_is_adopted_not_resubmitted() -> Result<()> {
    let server = MockServer::start_async().await;
    let submit = server.mock(|when, then| {
        when.method(POST).path("/api/fileops/jobs");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({"ok": true, "job_id": "job-5", "job": job("job-5", "queued")}));
    });
    mock_observation(&server, "job-5", "done");

    let mut state = session(&server)?;
    let mut ui = ScriptedUi::default();
    let outcome = state
        .run_operation(
            copy_request(&["x.txt"], "/a", "/b"),
            &ListingSnapshot::default(),
            &mut ui,
            &CancellationToken::new(),
        )
        .await?;

    assert_eq!(finished_state(&outcome), Some(JobState::Done));
    submit.assert_hits(1);
    assert_eq!(state.dry_run_capability(), DryRunCapability::Unsupported);
    Ok(())
}

#[tokio::test]
async fn same_directory_move_is_refused_without_requests() -> Result<()> {
    let server = MockServer::start_async().await;
    let any_post = server.mock(|when, then| {
        when.method(POST);
        then.status(500);
    });

    let mut request = copy_request(&["x.txt"], "/a", "/a/");
    request.op = OperationKind::Move;
    let mut state = session(&server)?;
    let mut ui = ScriptedUi::default();
    let outcome = state
        .run_operation(
            request,
            &ListingSnapshot::default(),
            &mut ui,
            &CancellationToken::new(),
        )
        .await?;

    assert!(matches!(
        outcome,
        OperationOutcome::Rejected(GuardRejection::MoveIntoSameDirectory)
    ));
    assert_eq!(ui.notices.len(), 1);
    any_post.assert_hits(0);
    Ok(())
}

#[tokio::test]
async fn single_copy_into_source_directory_gets_free_name() -> Result<()> {
    let server = MockServer::start_async().await;
    let renamed_dst = json!({"target": "local", "path": "/a/doc (3).txt", "is_dir": false});
    let source = json!({"target": "local", "cwd": "/a", "paths": ["doc.txt"]});
    let dry_run = server.mock(|when, then| {
        when.method(POST).path("/api/fileops/jobs").json_body(json!({
            "op": "copy",
            "src": source.clone(),
            "dst": renamed_dst.clone(),
            "options": {"overwrite": "ask", "dry_run": true}
        }));
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({"ok": true, "dry_run": true, "conflicts": []}));
    });
    let execute = server.mock(|when, then| {
        when.method(POST).path("/api/fileops/jobs").json_body(json!({
            "op": "copy",
            "src": source.clone(),
            "dst": renamed_dst.clone(),
            "options": {"overwrite": "replace"}
        }));
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({"ok": true, "job_id": "job-6", "job": job("job-6", "done")}));
    });

    let mut state = session(&server)?;
    let mut ui = ScriptedUi::default();
    let listing = ListingSnapshot::from_names(["doc.txt", "doc (2).txt"]);
    let outcome = state
        .run_operation(
            copy_request(&["doc.txt"], "/a", "/a"),
            &listing,
            &mut ui,
            &CancellationToken::new(),
        )
        .await?;

    assert_eq!(finished_state(&outcome), Some(JobState::Done));
    dry_run.assert();
    execute.assert();
    assert!(ui.notices.iter().any(|notice| notice.contains("doc (3).txt")));
    Ok(())
}

#[tokio::test]
async fn guard_listing_reads_entry_type_and_taken_names() -> Result<()> {
    let server = MockServer::start_async().await;
    let own = server.mock(|when, then| {
        when.method(POST)
            .path("/api/fs/stat-batch")
            .json_body(json!({"target": "local", "cwd": "/a", "paths": ["backup.d"]}));
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({
                "ok": true,
                "items": [{"path": "/a/backup.d", "exists": true, "type": "dir"}]
            }));
    });
    let numbered = server.mock(|when, then| {
        when.method(POST)
            .path("/api/fs/stat-batch")
            .body_includes("backup.d (2)");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({
                "ok": true,
                "items": [
                    {"path": "/a/backup.d (2)", "exists": true, "type": "dir"},
                    {"path": "/a/backup.d (3)", "exists": false}
                ]
            }));
    });

    let state = session(&server)?;
    let listing = state
        .guard_listing(&copy_request(&["backup.d"], "/a", "/a/"))
        .await?;

    assert!(listing.is_dir("backup.d"));
    assert!(listing.names().contains("backup.d (2)"));
    match plan_transfer(copy_request(&["backup.d"], "/a", "/a/"), &listing) {
        GuardDecision::Rewritten { new_name, .. } => assert_eq!(new_name, "backup.d (3)"),
        other => bail!("expected a rewritten copy, got {other:?}"),
    }
    own.assert();
    numbered.assert();
    Ok(())
}

#[tokio::test]
async fn guard_listing_is_empty_outside_same_directory_copies() -> Result<()> {
    let server = MockServer::start_async().await;
    let stat = server.mock(|when, then| {
        when.method(POST).path("/api/fs/stat-batch");
        then.status(500);
    });

    let state = session(&server)?;
    let elsewhere = state
        .guard_listing(&copy_request(&["x.txt"], "/a", "/b"))
        .await?;
    let mut moving = copy_request(&["x.txt"], "/a", "/a");
    moving.op = OperationKind::Move;
    let moved = state.guard_listing(&moving).await?;

    assert_eq!(elsewhere, ListingSnapshot::default());
    assert_eq!(moved, ListingSnapshot::default());
    stat.assert_hits(0);
    Ok(())
}

#[tokio::test]
async fn delete_skips_dry_run() -> Result<()> {
    let server = MockServer::start_async().await;
    let execute = server.mock(|when, then| {
        when.method(POST).path("/api/fileops/jobs").json_body(json!({
            "op": "delete",
            "src": {"target": "remote", "sid": "s-1", "cwd": "/srv", "paths": ["old.log"]},
            "options": {"overwrite": "ask"}
        }));
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({"ok": true, "job_id": "job-7", "job": job("job-7", "done")}));
    });

    let request = OperationRequest {
        op: OperationKind::Delete,
        src: SourceSpec {
            target: TargetKind::Remote,
            session_id: Some("s-1".into()),
            base_dir: "/srv".into(),
            relative_paths: vec!["old.log".into()],
        },
        dst: None,
        options: OperationOptions::default(),
    };
    let mut state = session(&server)?;
    let mut ui = ScriptedUi::default();
    let outcome = state
        .run_operation(
            request,
            &ListingSnapshot::default(),
            &mut ui,
            &CancellationToken::new(),
        )
        .await?;

    assert_eq!(finished_state(&outcome), Some(JobState::Done));
    execute.assert();
    assert_eq!(state.dry_run_capability(), DryRunCapability::Unknown);
    Ok(())
}

#[tokio::test]
async fn cancellation_requests_cancel_and_keeps_observing() -> Result<()> {
    let server = MockServer::start_async().await;
    let cancel = server.mock(|when, then| {
        when.method(POST).path("/api/fileops/jobs/job-8/cancel");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({"ok": true, "canceled": true}));
    });
    mock_observation(&server, "job-8", "canceled");

    let mut state = session(&server)?;
    let mut ui = ScriptedUi::default();
    let token = CancellationToken::new();
    token.cancel();
    let outcome = state.observe("job-8", &mut ui, &token).await;

    let JobOutcome::Finished(job) = outcome else {
        bail!("expected a terminal snapshot");
    };
    assert_eq!(job.state, JobState::Canceled);
    for _ in 0..50 {
        if cancel.hits() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cancel.assert_hits(1);
    assert!(!state.finalize_pending(), "only successful jobs release the view automatically");
    Ok(())
}
