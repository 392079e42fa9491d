// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job supervision: drive one scan job from request to terminal state.
//
// The lifecycle is a small sequential state machine: resolve inputs, write
// the initial running manifest, try the planned capture commands in order
// (logging each failed attempt with its exit detail and output tails),
// collect and hash the captured pages, segment them into documents,
// assemble each document, then complete. Cancellation arrives out-of-band
// through the process registry; the supervisor kills the live child and
// backs off without ever overwriting a terminal state.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::{debug, info, warn};

use blattwerk_core::config::EngineConfig;
use blattwerk_core::error::{BlattwerkError, Result};
use blattwerk_core::types::{
    DocumentRecord, JobEvent, JobEventKind, JobId, JobState, Manifest, PageRecord, ResolvedParams,
    ScanRequest, mime_for_format,
};
use blattwerk_device::resolve_request;
use blattwerk_document::{assemble_document, segment_pages};

use crate::engine::StartScanOutcome;
use crate::plan::{PlannedCommand, plan_commands};
use crate::preference::PreferenceStore;
use crate::registry::ProcessRegistry;
use crate::store::JobStore;

/// How many trailing lines of the capture tool's output are attached to
/// failure events.
const LOG_TAIL_LINES: usize = 80;

/// Outcome of the capture phase.
enum CaptureOutcome {
    /// A planned command succeeded; pages are waiting in the run directory.
    Success,
    /// The job was cancelled while (or before) a command ran.
    Cancelled,
    /// Every planned command failed.
    AllFailed,
}

/// Result of supervising one external command.
enum CommandExit {
    Success,
    Cancelled,
    Failed {
        exit_code: Option<i32>,
        detail: String,
    },
}

/// Run one scan job to a settled state and report it.
pub(crate) async fn run_job(
    config: &EngineConfig,
    store: &JobStore,
    registry: &ProcessRegistry,
    preference: &PreferenceStore,
    request: ScanRequest,
) -> Result<StartScanOutcome> {
    let job_id = JobId::new();
    let run_dir = store.create_run_dir(&job_id).await?;

    let last_used = if config.persist_last_device {
        preference.last_device().await
    } else {
        None
    };
    let params = resolve_request(config, &request, last_used.as_deref()).await;

    let mut manifest = Manifest::new(job_id.clone(), params.clone());
    store.write_manifest(&manifest).await?;
    store
        .append_event(
            &job_id,
            JobEvent::now(JobEventKind::JobStarted, json!({ "input": request })),
        )
        .await?;
    info!(job_id = %job_id, device = ?params.device_id, "scan job started");

    let capture = if config.mock {
        write_mock_pages(&run_dir, &params.output_format, config.mock_pages).await?;
        CaptureOutcome::Success
    } else {
        run_capture(config, store, registry, &job_id, &run_dir, &params).await?
    };

    match capture {
        CaptureOutcome::Cancelled => {
            info!(job_id = %job_id, "scan job cancelled during capture");
            return current_outcome(store, &job_id, run_dir).await;
        }
        CaptureOutcome::AllFailed => {
            let event = JobEvent::now(
                JobEventKind::JobError,
                json!({ "reason": "all capture commands failed" }),
            );
            match store
                .transition_terminal(&job_id, JobState::Error, event)
                .await
            {
                Ok(()) => warn!(job_id = %job_id, "scan job failed: no capture command succeeded"),
                // A concurrent cancel got there first; its state stands.
                Err(BlattwerkError::JobTerminal { .. }) => {}
                Err(err) => return Err(err),
            }
            return current_outcome(store, &job_id, run_dir).await;
        }
        CaptureOutcome::Success => {}
    }

    // Pages: collect in filename order (the zero-padded batch pattern makes
    // that capture order), hash, and persist before any assembly work.
    let pages = collect_pages(&run_dir, &params.output_format).await?;
    for page in &pages {
        store
            .append_event(
                &job_id,
                JobEvent::now(
                    JobEventKind::PageCaptured,
                    json!({ "index": page.index, "path": page.path }),
                ),
            )
            .await?;
    }
    manifest.pages = pages;
    if !persist_progress(store, &manifest).await? {
        return current_outcome(store, &job_id, run_dir).await;
    }

    if let Some(policy) = &params.doc_break_policy {
        if !policy.is_implemented() {
            warn!(job_id = %job_id, policy = policy.kind_name(), "break policy not implemented, producing a single document");
            store
                .append_event(
                    &job_id,
                    JobEvent::now(
                        JobEventKind::BreakPolicyIgnored,
                        json!({ "policy": policy.kind_name() }),
                    ),
                )
                .await?;
        }
    }

    assemble_documents(config, store, &job_id, &run_dir, &params, &mut manifest).await?;
    if !persist_progress(store, &manifest).await? {
        return current_outcome(store, &job_id, run_dir).await;
    }

    let completed = JobEvent::now(
        JobEventKind::JobCompleted,
        json!({
            "pages": manifest.pages.len(),
            "documents": manifest.documents.len(),
        }),
    );
    match store
        .transition_terminal(&job_id, JobState::Completed, completed)
        .await
    {
        Ok(()) => {
            info!(
                job_id = %job_id,
                pages = manifest.pages.len(),
                documents = manifest.documents.len(),
                "scan job completed"
            );
            if config.persist_last_device {
                if let Some(device) = &manifest.device_id {
                    if let Err(err) = preference.remember_device(device).await {
                        warn!(device = %device, error = %err, "failed to persist last used device");
                    }
                }
            }
        }
        Err(BlattwerkError::JobTerminal { .. }) => {}
        Err(err) => return Err(err),
    }

    current_outcome(store, &job_id, run_dir).await
}

/// Persist a mid-flight manifest update. Returns false when the job has
/// concurrently reached a terminal state and the supervisor must back off.
async fn persist_progress(store: &JobStore, manifest: &Manifest) -> Result<bool> {
    match store.update_running(manifest).await {
        Ok(()) => Ok(true),
        Err(BlattwerkError::JobTerminal { .. }) => Ok(false),
        Err(err) => Err(err),
    }
}

/// Try the planned commands in order until one succeeds.
async fn run_capture(
    config: &EngineConfig,
    store: &JobStore,
    registry: &ProcessRegistry,
    job_id: &JobId,
    run_dir: &Path,
    params: &ResolvedParams,
) -> Result<CaptureOutcome> {
    let commands = plan_commands(params, run_dir, config);
    let total = commands.len();

    for (attempt, command) in commands.iter().enumerate() {
        // A cancel can land between attempts, when no process is live; the
        // manifest is the source of truth for that gap.
        if store.read_manifest(job_id).await?.state.is_terminal() {
            return Ok(CaptureOutcome::Cancelled);
        }

        store
            .append_event(
                job_id,
                JobEvent::now(
                    JobEventKind::ScannerExec,
                    json!({ "command": command.render(), "attempt": attempt + 1 }),
                ),
            )
            .await?;
        debug!(job_id = %job_id, command = %command.render(), "executing capture command");

        match run_command(command, run_dir, registry, job_id).await? {
            CommandExit::Success => return Ok(CaptureOutcome::Success),
            CommandExit::Cancelled => return Ok(CaptureOutcome::Cancelled),
            CommandExit::Failed { exit_code, detail } => {
                let kind = if attempt + 1 < total {
                    JobEventKind::ScannerPrimaryFailed
                } else {
                    JobEventKind::ScannerFailed
                };
                warn!(job_id = %job_id, command = %command.render(), %detail, "capture command failed");
                store
                    .append_event(
                        job_id,
                        JobEvent::now(
                            kind,
                            json!({
                                "command": command.render(),
                                "exit_code": exit_code,
                                "detail": detail,
                                "stdout_tail": tail_lines(&run_dir.join("scan.out")).await,
                                "stderr_tail": tail_lines(&run_dir.join("scan.err")).await,
                            }),
                        ),
                    )
                    .await?;
            }
        }
    }

    Ok(CaptureOutcome::AllFailed)
}

/// Supervise one external command: registered as live for exactly the span
/// of its execution, killed on cancellation.
async fn run_command(
    command: &PlannedCommand,
    run_dir: &Path,
    registry: &ProcessRegistry,
    job_id: &JobId,
) -> Result<CommandExit> {
    let stdout_log = std::fs::File::create(run_dir.join("scan.out"))?;
    let stderr_log = std::fs::File::create(run_dir.join("scan.err"))?;

    let mut child = match Command::new(&command.bin)
        .args(&command.args)
        .current_dir(run_dir)
        .stdin(Stdio::null())
        .stdout(stdout_log)
        .stderr(stderr_log)
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            return Ok(CommandExit::Failed {
                exit_code: None,
                detail: format!("spawn failed: {err}"),
            });
        }
    };

    // Registered for the duration of this command only; the guard removes
    // the entry again on every exit path.
    let signal = registry.register(job_id);

    tokio::select! {
        status = child.wait() => {
            let status = status?;
            if status.success() {
                Ok(CommandExit::Success)
            } else {
                Ok(CommandExit::Failed {
                    exit_code: status.code(),
                    detail: describe_exit(&status),
                })
            }
        }
        _ = signal.cancelled() => {
            info!(job_id = %job_id, "terminating live capture process");
            if let Err(err) = child.start_kill() {
                warn!(job_id = %job_id, error = %err, "failed to signal capture process");
            }
            let _ = child.wait().await;
            Ok(CommandExit::Cancelled)
        }
    }
}

fn describe_exit(status: &std::process::ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exited with status {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("terminated by signal {signal}");
        }
    }
    "terminated without exit status".to_string()
}

/// Segment the collected pages and assemble one artifact per group.
async fn assemble_documents(
    config: &EngineConfig,
    store: &JobStore,
    job_id: &JobId,
    run_dir: &Path,
    params: &ResolvedParams,
    manifest: &mut Manifest,
) -> Result<()> {
    let indices: Vec<u32> = manifest.pages.iter().map(|p| p.index).collect();
    let groups = segment_pages(&indices, params.doc_break_policy.as_ref());
    let mime = mime_for_format(&params.output_format);

    for (position, group) in groups.iter().enumerate() {
        let index = (position + 1) as u32;
        let dest = run_dir.join(format!("doc_{index:04}.{}", params.output_format));
        let paths: Vec<PathBuf> = manifest
            .pages
            .iter()
            .filter(|page| group.contains(&page.index))
            .map(|page| page.path.clone())
            .collect();

        let Some(assembly) = assemble_document(&paths, &dest, &config.tiffcp_bin).await? else {
            continue;
        };
        if assembly.fallback {
            store
                .append_event(
                    job_id,
                    JobEvent::now(
                        JobEventKind::AssemblyFallback,
                        json!({ "index": index, "pages": group }),
                    ),
                )
                .await?;
        }

        let sha256 = sha256_file(&assembly.path).await?;
        manifest.documents.push(DocumentRecord {
            index,
            pages: group.clone(),
            path: assembly.path.clone(),
            sha256,
            mime_type: mime.to_string(),
        });
        store
            .append_event(
                job_id,
                JobEvent::now(
                    JobEventKind::DocumentAssembled,
                    json!({ "index": index, "pages": group }),
                ),
            )
            .await?;
    }
    Ok(())
}

/// Collect captured page files from the run directory, in filename order.
async fn collect_pages(run_dir: &Path, format: &str) -> Result<Vec<PageRecord>> {
    let suffix = format!(".{format}");
    let mut names = Vec::new();
    let mut read_dir = tokio::fs::read_dir(run_dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with("page_") && name.ends_with(&suffix) {
            names.push(name);
        }
    }
    names.sort();

    let mime = mime_for_format(format);
    let mut pages = Vec::with_capacity(names.len());
    for (position, name) in names.iter().enumerate() {
        let path = run_dir.join(name);
        let sha256 = sha256_file(&path).await?;
        pages.push(PageRecord {
            index: (position + 1) as u32,
            path,
            sha256,
            mime_type: mime.to_string(),
        });
    }
    debug!(count = pages.len(), "collected captured pages");
    Ok(pages)
}

/// Simulated capture: fixture pages instead of driving any hardware.
async fn write_mock_pages(run_dir: &Path, format: &str, count: u32) -> Result<()> {
    for index in 1..=count {
        let path = run_dir.join(format!("page_{index:04}.{format}"));
        tokio::fs::write(&path, format!("MOCK_TIFF_PAGE_{index}")).await?;
    }
    debug!(count, "wrote mock pages");
    Ok(())
}

async fn sha256_file(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path).await?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Last lines of a capture log, for failure events. `None` when the log
/// does not exist or cannot be read.
async fn tail_lines(path: &Path) -> Option<String> {
    let text = tokio::fs::read_to_string(path).await.ok()?;
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(LOG_TAIL_LINES);
    Some(lines[start..].join("\n"))
}

async fn current_outcome(
    store: &JobStore,
    job_id: &JobId,
    run_dir: PathBuf,
) -> Result<StartScanOutcome> {
    let manifest = store.read_manifest(job_id).await?;
    Ok(StartScanOutcome {
        job_id: job_id.clone(),
        run_dir,
        state: manifest.state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use blattwerk_core::types::DocBreakPolicy;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        config: EngineConfig,
        store: JobStore,
        registry: ProcessRegistry,
        preference: PreferenceStore,
    }

    fn mock_harness(mock_pages: u32) -> Harness {
        let dir = TempDir::new().expect("tempdir");
        let config = EngineConfig {
            mock: true,
            mock_pages,
            inbox_dir: dir.path().join("inbox"),
            state_dir: dir.path().join(".state"),
            // Force the assembler onto its copy fallback in tests.
            tiffcp_bin: "/nonexistent/tiffcp-for-tests".into(),
            ..Default::default()
        };
        let store = JobStore::new(config.inbox_dir.clone());
        let preference = PreferenceStore::new(&config.state_dir);
        Harness {
            _dir: dir,
            config,
            store,
            registry: ProcessRegistry::new(),
            preference,
        }
    }

    async fn start(harness: &Harness, request: ScanRequest) -> StartScanOutcome {
        run_job(
            &harness.config,
            &harness.store,
            &harness.registry,
            &harness.preference,
            request,
        )
        .await
        .expect("run job")
    }

    #[tokio::test]
    async fn mock_job_completes_with_pages_and_documents() {
        let harness = mock_harness(2);
        let outcome = start(&harness, ScanRequest::default()).await;

        assert_eq!(outcome.state, JobState::Completed);
        assert!(outcome.run_dir.join("manifest.json").exists());
        assert!(outcome.run_dir.join("events.jsonl").exists());
        assert!(outcome.run_dir.join("page_0001.tiff").exists());
        assert!(outcome.run_dir.join("doc_0001.tiff").exists());

        let manifest = harness
            .store
            .read_manifest(&outcome.job_id)
            .await
            .expect("manifest");
        assert_eq!(manifest.state, JobState::Completed);
        assert_eq!(manifest.pages.len(), 2);
        assert_eq!(manifest.documents.len(), 1);
        assert_eq!(manifest.documents[0].pages, vec![1, 2]);
        assert_eq!(manifest.pages[0].mime_type, "image/tiff");
        assert_eq!(manifest.pages[0].sha256.len(), 64);

        let events = harness
            .store
            .read_events(&outcome.job_id)
            .await
            .expect("events");
        let kinds: Vec<JobEventKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds.first(), Some(&JobEventKind::JobStarted));
        assert_eq!(kinds.last(), Some(&JobEventKind::JobCompleted));
        assert_eq!(
            kinds
                .iter()
                .filter(|k| matches!(k, JobEventKind::PageCaptured))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn fixed_count_policy_segments_documents() {
        let harness = mock_harness(5);
        let request = ScanRequest {
            doc_break_policy: Some(DocBreakPolicy::PageCount { page_count: 2 }),
            ..Default::default()
        };
        let outcome = start(&harness, request).await;

        let manifest = harness
            .store
            .read_manifest(&outcome.job_id)
            .await
            .expect("manifest");
        assert_eq!(manifest.pages.len(), 5);
        let groups: Vec<Vec<u32>> =
            manifest.documents.iter().map(|d| d.pages.clone()).collect();
        assert_eq!(groups, vec![vec![1, 2], vec![3, 4], vec![5]]);
        assert!(outcome.run_dir.join("doc_0003.tiff").exists());

        // The union of document pages partitions the job's pages in order.
        let rejoined: Vec<u32> = groups.concat();
        let all: Vec<u32> = manifest.pages.iter().map(|p| p.index).collect();
        assert_eq!(rejoined, all);
    }

    #[tokio::test]
    async fn unimplemented_policy_records_an_event() {
        let harness = mock_harness(3);
        let request = ScanRequest {
            doc_break_policy: Some(DocBreakPolicy::Timer { timer_ms: 2000 }),
            ..Default::default()
        };
        let outcome = start(&harness, request).await;

        let manifest = harness
            .store
            .read_manifest(&outcome.job_id)
            .await
            .expect("manifest");
        assert_eq!(manifest.documents.len(), 1, "degrades to a single group");

        let events = harness
            .store
            .read_events(&outcome.job_id)
            .await
            .expect("events");
        let ignored: Vec<_> = events
            .iter()
            .filter(|e| e.kind == JobEventKind::BreakPolicyIgnored)
            .collect();
        assert_eq!(ignored.len(), 1);
        assert_eq!(ignored[0].data["policy"], "timer");
    }

    #[tokio::test]
    async fn last_used_device_is_persisted_on_completion() {
        let harness = mock_harness(2);
        start(&harness, ScanRequest::default()).await;
        assert_eq!(
            harness.preference.last_device().await.as_deref(),
            Some("epjitsu:libusb:001:004")
        );
    }

    #[tokio::test]
    async fn persistence_toggle_is_honoured() {
        let mut harness = mock_harness(2);
        harness.config.persist_last_device = false;
        start(&harness, ScanRequest::default()).await;
        assert_eq!(harness.preference.last_device().await, None);
    }

    #[tokio::test]
    async fn all_commands_failing_ends_in_error_state() {
        let mut harness = mock_harness(0);
        harness.config.mock = false;
        harness.config.scanimage_bin = "/nonexistent/scanimage-for-tests".into();
        harness.config.scanadf_bin = "/nonexistent/scanadf-for-tests".into();

        let request = ScanRequest {
            source: Some(blattwerk_core::types::ScanSource::Adf),
            ..Default::default()
        };
        let outcome = start(&harness, request).await;
        assert_eq!(outcome.state, JobState::Error);

        let events = harness
            .store
            .read_events(&outcome.job_id)
            .await
            .expect("events");
        let kinds: Vec<JobEventKind> = events.iter().map(|e| e.kind).collect();
        // Primary (scanadf) failure, then final (scanimage) failure, then
        // the single terminal error event.
        assert!(kinds.contains(&JobEventKind::ScannerPrimaryFailed));
        assert!(kinds.contains(&JobEventKind::ScannerFailed));
        assert_eq!(
            kinds
                .iter()
                .filter(|k| matches!(
                    k,
                    JobEventKind::JobError
                        | JobEventKind::JobCompleted
                        | JobEventKind::JobCancelled
                ))
                .count(),
            1
        );
        assert_eq!(kinds.last(), Some(&JobEventKind::JobError));

        // The run directory survives for post-mortem inspection.
        assert!(outcome.run_dir.is_dir());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_kills_a_live_command() {
        let dir = TempDir::new().expect("tempdir");
        let registry = ProcessRegistry::new();
        let job_id = JobId::new();
        let command = PlannedCommand {
            bin: "sleep".into(),
            args: vec!["30".into()],
        };

        let run_dir = dir.path().to_path_buf();
        let task_registry = registry.clone();
        let task_job = job_id.clone();
        let supervised = tokio::spawn(async move {
            run_command(&command, &run_dir, &task_registry, &task_job).await
        });

        // Wait until the child is registered as live, then cancel.
        for _ in 0..200 {
            if registry.is_live(&job_id) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(registry.is_live(&job_id), "subprocess never registered");
        assert!(registry.cancel(&job_id));

        let exit = tokio::time::timeout(std::time::Duration::from_secs(5), supervised)
            .await
            .expect("cancel takes effect quickly")
            .expect("task")
            .expect("run_command");
        assert!(matches!(exit, CommandExit::Cancelled));
        assert!(!registry.is_live(&job_id), "registry entry cleaned up");
    }

    #[tokio::test]
    async fn failed_spawn_reports_detail() {
        let dir = TempDir::new().expect("tempdir");
        let registry = ProcessRegistry::new();
        let job_id = JobId::new();
        let command = PlannedCommand {
            bin: "/nonexistent/scanimage-for-tests".into(),
            args: vec![],
        };
        let exit = run_command(&command, dir.path(), &registry, &job_id)
            .await
            .expect("run_command");
        match exit {
            CommandExit::Failed { exit_code, detail } => {
                assert_eq!(exit_code, None);
                assert!(detail.contains("spawn failed"));
            }
            _ => panic!("expected failure"),
        }
        assert!(!registry.is_live(&job_id));
    }
}
