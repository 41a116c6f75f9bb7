use std::path::PathBuf;

use anyhow::anyhow;
use fileops_api_models::{ArchiveItem, EntryKind, TargetKind};
use fileops_core::format::format_bytes;
use fileops_core::{
    BatchEnd, DownloadDestination, DownloadRequest, DownloadSource, Interaction, TransferOutcome,
    UploadPlan, UploadSource,
};

use crate::cli::{DownloadArgs, UploadArgs};
use crate::client::{AppContext, CliError, CliResult};

const DEFAULT_ARCHIVE_NAME: &str = "archive.zip";

/// Parent directory and entry name of a backend path.
fn split_entry(path: &str) -> (String, String) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some(("", name)) => ("/".to_string(), name.to_string()),
        Some((dir, name)) => (dir.to_string(), name.to_string()),
        None => (String::new(), trimmed.to_string()),
    }
}

pub(crate) async fn handle_download(
    ctx: &AppContext,
    args: DownloadArgs,
    ui: &mut dyn Interaction,
) -> CliResult<()> {
    let target = TargetKind::from(args.target);
    let request = match args.paths.as_slice() {
        [path] => {
            let (_, name) = split_entry(path);
            if name.is_empty() {
                return Err(CliError::validation(format!("'{path}' names no entry")));
            }
            let filename_hint = if args.zip { format!("{name}.zip") } else { name };
            DownloadRequest {
                target,
                session_id: args.sid.clone(),
                source: DownloadSource::Path {
                    path: path.clone(),
                    zip: args.zip,
                },
                filename_hint: Some(filename_hint),
            }
        }
        paths => {
            let items = archive_items(ctx, target, args.sid.as_deref(), paths).await?;
            let filename_hint = args
                .zip_name
                .clone()
                .unwrap_or_else(|| DEFAULT_ARCHIVE_NAME.to_string());
            DownloadRequest {
                target,
                session_id: args.sid.clone(),
                source: DownloadSource::Archive {
                    items,
                    zip_name: args.zip_name.clone(),
                },
                filename_hint: Some(filename_hint),
            }
        }
    };
    let destination = download_destination(args.out)?;

    match ctx.session.download(&request, &destination, ui).await {
        TransferOutcome::Completed(file) => {
            println!("saved {} ({})", file.path.display(), format_bytes(file.bytes));
            Ok(())
        }
        TransferOutcome::Canceled => {
            println!("download canceled");
            Ok(())
        }
        TransferOutcome::Failed(error) => Err(error.into()),
    }
}

fn download_destination(out: Option<PathBuf>) -> CliResult<DownloadDestination> {
    match out {
        Some(path) if path.is_dir() => Ok(DownloadDestination::Directory(path)),
        Some(path) => Ok(DownloadDestination::File(path)),
        None => std::env::current_dir()
            .map(DownloadDestination::Directory)
            .map_err(|err| CliError::failure(anyhow!("cannot resolve current directory: {err}"))),
    }
}

/// Archive entries with their directory flag, stat-checked once per parent directory.
async fn archive_items(
    ctx: &AppContext,
    target: TargetKind,
    session_id: Option<&str>,
    paths: &[String],
) -> CliResult<Vec<ArchiveItem>> {
    let mut items = Vec::with_capacity(paths.len());
    let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
    for (index, path) in paths.iter().enumerate() {
        let (dir, name) = split_entry(path);
        if name.is_empty() {
            return Err(CliError::validation(format!("'{path}' names no entry")));
        }
        items.push(ArchiveItem {
            path: path.trim_end_matches('/').to_string(),
            name,
            is_dir: false,
        });
        match groups.iter_mut().find(|(existing, _)| *existing == dir) {
            Some((_, indexes)) => indexes.push(index),
            None => groups.push((dir, vec![index])),
        }
    }

    let backend = ctx.session.transfers().backend();
    for (dir, indexes) in groups {
        let names: Vec<String> = indexes.iter().map(|&index| items[index].name.clone()).collect();
        let statuses = backend.stat_batch(target, session_id, &dir, &names).await?;
        for (index, status) in indexes.into_iter().zip(statuses) {
            items[index].is_dir = status.kind == Some(EntryKind::Dir);
        }
    }
    Ok(items)
}

pub(crate) async fn handle_upload(
    ctx: &AppContext,
    args: UploadArgs,
    ui: &mut dyn Interaction,
) -> CliResult<()> {
    if let Some(missing) = args.files.iter().find(|path| !path.is_file()) {
        return Err(CliError::validation(format!(
            "'{}' is not a readable file",
            missing.display()
        )));
    }
    let plan = UploadPlan {
        target: args.target.into(),
        session_id: args.sid,
        dir: args.dir,
        files: args.files.into_iter().map(UploadSource::from_path).collect(),
    };

    let report = ctx.session.upload_batch(&plan, ui).await;
    for name in &report.uploaded {
        println!("uploaded {name}");
    }
    for name in &report.skipped {
        println!("skipped {name}");
    }
    match report.end {
        BatchEnd::Completed => Ok(()),
        BatchEnd::Canceled { file } => {
            println!("upload canceled while sending {file}; remaining files were not sent");
            Ok(())
        }
        BatchEnd::Failed { file, error } => Err(CliError::failure(anyhow!(
            "upload of {file} failed: {}",
            error.describe()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use fileops_core::ClientConfig;
    use httpmock::prelude::*;
    use serde_json::json;
    use url::Url;

    use crate::cli::{OutputFormat, TargetArg};
    use crate::prompt::TerminalInteraction;

    fn context_with(server: &MockServer) -> AppContext {
        let config = ClientConfig::new(Url::parse(&server.base_url()).expect("valid URL"));
        AppContext::new(config, OutputFormat::Table).expect("valid config")
    }

    fn download_args(paths: &[&str], out: PathBuf) -> DownloadArgs {
        DownloadArgs {
            target: TargetArg::Local,
            sid: None,
            paths: paths.iter().map(ToString::to_string).collect(),
            zip: false,
            zip_name: None,
            out: Some(out),
        }
    }

    #[test]
    fn entries_split_into_parent_and_name() {
        assert_eq!(split_entry("/srv/a.txt"), ("/srv".into(), "a.txt".into()));
        assert_eq!(split_entry("/top/"), ("/".into(), "top".into()));
        assert_eq!(split_entry("plain"), (String::new(), "plain".into()));
        assert_eq!(split_entry("/").1, "");
    }

    #[tokio::test]
    async fn single_file_lands_in_output_directory() {
        let server = MockServer::start_async().await;
        let download = server.mock(|when, then| {
            when.method(GET)
                .path("/api/fs/download")
                .query_param("target", "local")
                .query_param("path", "/srv/notes.txt");
            then.status(200)
                .header("content-disposition", "attachment; filename=\"notes.txt\"")
                .body("hello");
        });
        let out = tempfile::tempdir().expect("tempdir");

        let ctx = context_with(&server);
        let mut ui = TerminalInteraction::new(&b""[..], Vec::new());
        handle_download(
            &ctx,
            download_args(&["/srv/notes.txt"], out.path().to_path_buf()),
            &mut ui,
        )
        .await
        .expect("download should succeed");

        let saved = std::fs::read_to_string(out.path().join("notes.txt")).expect("saved file");
        assert_eq!(saved, "hello");
        download.assert();
    }

    #[tokio::test]
    async fn several_paths_download_as_one_archive() {
        let server = MockServer::start_async().await;
        let stat = server.mock(|when, then| {
            when.method(POST)
                .path("/api/fs/stat-batch")
                .json_body(json!({"target": "local", "cwd": "/srv", "paths": ["photos", "a.txt"]}));
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({
                    "ok": true,
                    "items": [
                        {"path": "/srv/photos", "exists": true, "type": "dir"},
                        {"path": "/srv/a.txt", "exists": true, "type": "file"}
                    ]
                }));
        });
        let archive = server.mock(|when, then| {
            when.method(POST)
                .path("/api/fs/archive")
                .query_param("target", "local")
                .json_body(json!({
                    "items": [
                        {"path": "/srv/photos", "name": "photos", "is_dir": true},
                        {"path": "/srv/a.txt", "name": "a.txt", "is_dir": false}
                    ],
                    "zip_name": "bundle.zip"
                }));
            then.status(200).body("PK");
        });
        let out = tempfile::tempdir().expect("tempdir");

        let ctx = context_with(&server);
        let mut args = download_args(&["/srv/photos/", "/srv/a.txt"], out.path().to_path_buf());
        args.zip_name = Some("bundle.zip".into());
        let mut ui = TerminalInteraction::new(&b""[..], Vec::new());
        handle_download(&ctx, args, &mut ui)
            .await
            .expect("archive download should succeed");

        assert!(out.path().join("bundle.zip").is_file());
        stat.assert();
        archive.assert();
    }

    #[tokio::test]
    async fn upload_sends_each_file_into_directory() {
        let server = MockServer::start_async().await;
        let stat = server.mock(|when, then| {
            when.method(POST)
                .path("/api/fs/stat-batch")
                .json_body(json!({"target": "local", "cwd": "/srv/in", "paths": ["a.txt"]}));
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({"ok": true, "items": [{"path": "/srv/in/a.txt", "exists": false}]}));
        });
        let upload = server.mock(|when, then| {
            when.method(POST)
                .path("/api/fs/upload")
                .query_param("target", "local")
                .query_param("path", "/srv/in/a.txt");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({"ok": true}));
        });
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "hello").expect("write source");

        let ctx = context_with(&server);
        let args = UploadArgs {
            target: TargetArg::Local,
            sid: None,
            dir: "/srv/in".into(),
            files: vec![file],
        };
        let mut ui = TerminalInteraction::new(&b""[..], Vec::new());
        handle_upload(&ctx, args, &mut ui)
            .await
            .expect("upload should succeed");

        stat.assert();
        upload.assert();
    }

    #[allow(deprecated)]
    #[tokio::test]
    async fn missing_local_file_is_rejected_before_sending() {
        let server = MockServer::start_async().await;
        let upload = server.mock(|when, then| {
            when.method(POST).path("/api/fs/upload");
            then.status(200);
        });
        let dir = tempfile::tempdir().expect("tempdir");

        let ctx = context_with(&server);
        let args = UploadArgs {
            target: TargetArg::Local,
            sid: None,
            dir: "/srv/in".into(),
            files: vec![dir.path().join("absent.txt")],
        };
        let mut ui = TerminalInteraction::new(&b""[..], Vec::new());
        let err = handle_upload(&ctx, args, &mut ui)
            .await
            .expect_err("missing file must be rejected");

        assert_eq!(err.exit_code(), 2);
        upload.assert_hits(0);
    }
}
