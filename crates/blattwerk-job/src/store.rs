// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Durable per-job persistence: an atomically-replaced `manifest.json`
// snapshot plus an append-only `events.jsonl` audit trail, one directory
// per job under the store's base directory.
//
// Only validated `JobId` values reach this module, so joining them onto the
// base directory cannot escape it. The manifest is written via
// write-temp-then-rename; concurrent readers never observe a partial file.
// Terminal state transitions are serialised through a store-level lock so a
// job can never receive two terminal events.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use blattwerk_core::error::{BlattwerkError, Result};
use blattwerk_core::types::{JobEvent, JobId, JobState, JobSummary, Manifest};

/// Filesystem store for job manifests and event logs.
#[derive(Debug, Clone)]
pub struct JobStore {
    base_dir: PathBuf,
    /// Serialises read-check-write state transitions.
    transition: Arc<tokio::sync::Mutex<()>>,
}

impl JobStore {
    /// A store rooted at `base_dir` (made absolute, created lazily).
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let base_dir = std::path::absolute(&base_dir).unwrap_or(base_dir);
        Self {
            base_dir,
            transition: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// The run directory owned by one job.
    pub fn run_dir(&self, job_id: &JobId) -> PathBuf {
        self.base_dir.join(job_id.as_str())
    }

    /// Create a job's run directory (and the base directory with it).
    pub async fn create_run_dir(&self, job_id: &JobId) -> Result<PathBuf> {
        let dir = self.run_dir(job_id);
        tokio::fs::create_dir_all(&dir).await?;
        debug!(job_id = %job_id, dir = %dir.display(), "created run directory");
        Ok(dir)
    }

    fn manifest_path(&self, job_id: &JobId) -> PathBuf {
        self.run_dir(job_id).join("manifest.json")
    }

    fn events_path(&self, job_id: &JobId) -> PathBuf {
        self.run_dir(job_id).join("events.jsonl")
    }

    /// Atomically replace the manifest snapshot.
    pub async fn write_manifest(&self, manifest: &Manifest) -> Result<()> {
        let path = self.manifest_path(&manifest.job_id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(manifest)?;
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Read a job's manifest. A missing manifest is `NotFound`: the job
    /// either never started or its run directory was purged.
    pub async fn read_manifest(&self, job_id: &JobId) -> Result<Manifest> {
        let path = self.manifest_path(job_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(BlattwerkError::NotFound(job_id.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Replace the manifest of a still-running job.
    ///
    /// Refuses with `JobTerminal` when the persisted snapshot has already
    /// reached a terminal state (e.g. a concurrent cancel), so mid-flight
    /// progress writes can never resurrect a finished job.
    pub async fn update_running(&self, manifest: &Manifest) -> Result<()> {
        let _guard = self.transition.lock().await;
        let current = self.read_manifest(&manifest.job_id).await?;
        if current.state.is_terminal() {
            return Err(BlattwerkError::JobTerminal {
                job_id: manifest.job_id.to_string(),
                state: current.state,
            });
        }
        self.write_manifest(manifest).await
    }

    /// Move a job into a terminal state, appending its terminal event.
    ///
    /// Exactly-once: a job already in a terminal state refuses the
    /// transition with `JobTerminal`, which is also how cancelling a
    /// finished job surfaces to the caller.
    pub async fn transition_terminal(
        &self,
        job_id: &JobId,
        state: JobState,
        event: JobEvent,
    ) -> Result<()> {
        debug_assert!(state.is_terminal());
        let _guard = self.transition.lock().await;
        let mut manifest = self.read_manifest(job_id).await?;
        if manifest.state.is_terminal() {
            return Err(BlattwerkError::JobTerminal {
                job_id: job_id.to_string(),
                state: manifest.state,
            });
        }
        manifest.state = state;
        self.write_manifest(&manifest).await?;
        self.append_event(job_id, event).await?;
        debug!(job_id = %job_id, state = %state, "job reached terminal state");
        Ok(())
    }

    /// Append one event to the job's audit trail.
    pub async fn append_event(&self, job_id: &JobId, event: JobEvent) -> Result<()> {
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.events_path(job_id))
            .await?;
        file.write_all(&line).await?;
        Ok(())
    }

    /// Read the full event log of a job, oldest first.
    pub async fn read_events(&self, job_id: &JobId) -> Result<Vec<JobEvent>> {
        let path = self.events_path(job_id);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(BlattwerkError::NotFound(job_id.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        let mut events = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            events.push(serde_json::from_str(line)?);
        }
        Ok(events)
    }

    /// Compact status view of one job.
    pub async fn status(&self, job_id: &JobId) -> Result<JobSummary> {
        let manifest = self.read_manifest(job_id).await?;
        Ok(summary_of(&manifest, self.run_dir(job_id)))
    }

    /// List jobs under the base directory, newest first.
    ///
    /// Directories without a readable manifest (mid-creation, foreign, or
    /// corrupt) are skipped rather than failing the listing.
    pub async fn list_jobs(
        &self,
        limit: Option<usize>,
        state: Option<JobState>,
    ) -> Result<Vec<JobSummary>> {
        let mut read_dir = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Vec::new());
            }
            Err(err) => return Err(err.into()),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name();
            let Ok(job_id) = JobId::parse(&name.to_string_lossy()) else {
                continue;
            };
            match self.read_manifest(&job_id).await {
                Ok(manifest) => summaries.push(summary_of(&manifest, entry.path())),
                Err(err) => {
                    warn!(job_id = %job_id, error = %err, "skipping unreadable job");
                }
            }
        }

        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(wanted) = state {
            summaries.retain(|s| s.state == wanted);
        }
        if let Some(limit) = limit {
            summaries.truncate(limit);
        }
        Ok(summaries)
    }
}

fn summary_of(manifest: &Manifest, run_dir: PathBuf) -> JobSummary {
    JobSummary {
        job_id: manifest.job_id.clone(),
        state: manifest.state,
        pages: manifest.pages.len(),
        documents: manifest.documents.len(),
        created_at: manifest.created_at,
        run_dir,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blattwerk_core::types::{
        DocumentRecord, JobEventKind, PageRecord, ResolvedParams, ScanSource,
    };
    use serde_json::json;
    use tempfile::TempDir;

    fn test_params() -> ResolvedParams {
        ResolvedParams {
            device_id: Some("epjitsu:libusb:001:004".into()),
            resolution_dpi: 300,
            color_mode: "Lineart".into(),
            source: ScanSource::AdfDuplex,
            page_size: None,
            doc_break_policy: None,
            output_format: "tiff".into(),
        }
    }

    fn test_manifest() -> Manifest {
        let mut manifest = Manifest::new(JobId::new(), test_params());
        manifest.pages.push(PageRecord {
            index: 1,
            path: "page_0001.tiff".into(),
            sha256: "ab".repeat(32),
            mime_type: "image/tiff".into(),
        });
        manifest.documents.push(DocumentRecord {
            index: 1,
            pages: vec![1],
            path: "doc_0001.tiff".into(),
            sha256: "cd".repeat(32),
            mime_type: "image/tiff".into(),
        });
        manifest
    }

    #[tokio::test]
    async fn manifest_round_trip() {
        let dir = TempDir::new().expect("tempdir");
        let store = JobStore::new(dir.path());
        let manifest = test_manifest();
        store.create_run_dir(&manifest.job_id).await.expect("mkdir");
        store.write_manifest(&manifest).await.expect("write");

        let read_back = store.read_manifest(&manifest.job_id).await.expect("read");
        assert_eq!(read_back, manifest);
        assert_eq!(read_back.pages.len(), 1);
        assert_eq!(read_back.pages[0].sha256, manifest.pages[0].sha256);
        assert_eq!(read_back.documents.len(), 1);
    }

    #[tokio::test]
    async fn missing_manifest_is_not_found() {
        let dir = TempDir::new().expect("tempdir");
        let store = JobStore::new(dir.path());
        let err = store.read_manifest(&JobId::new()).await.expect_err("miss");
        assert!(matches!(err, BlattwerkError::NotFound(_)));
    }

    #[tokio::test]
    async fn no_stray_temp_file_after_write() {
        let dir = TempDir::new().expect("tempdir");
        let store = JobStore::new(dir.path());
        let manifest = test_manifest();
        store.create_run_dir(&manifest.job_id).await.expect("mkdir");
        store.write_manifest(&manifest).await.expect("write");
        store.write_manifest(&manifest).await.expect("rewrite");

        let run_dir = store.run_dir(&manifest.job_id);
        assert!(run_dir.join("manifest.json").exists());
        assert!(!run_dir.join("manifest.json.tmp").exists());
    }

    #[tokio::test]
    async fn events_append_in_order() {
        let dir = TempDir::new().expect("tempdir");
        let store = JobStore::new(dir.path());
        let job_id = JobId::new();
        store.create_run_dir(&job_id).await.expect("mkdir");

        store
            .append_event(&job_id, JobEvent::now(JobEventKind::JobStarted, json!({})))
            .await
            .expect("append");
        store
            .append_event(
                &job_id,
                JobEvent::now(JobEventKind::PageCaptured, json!({"index": 1})),
            )
            .await
            .expect("append");

        let events = store.read_events(&job_id).await.expect("read");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, JobEventKind::JobStarted);
        assert_eq!(events[1].kind, JobEventKind::PageCaptured);
        assert_eq!(events[1].data["index"], 1);
    }

    #[tokio::test]
    async fn terminal_transition_is_exactly_once() {
        let dir = TempDir::new().expect("tempdir");
        let store = JobStore::new(dir.path());
        let manifest = test_manifest();
        store.create_run_dir(&manifest.job_id).await.expect("mkdir");
        store.write_manifest(&manifest).await.expect("write");

        store
            .transition_terminal(
                &manifest.job_id,
                JobState::Cancelled,
                JobEvent::now(JobEventKind::JobCancelled, json!({})),
            )
            .await
            .expect("first transition");

        let err = store
            .transition_terminal(
                &manifest.job_id,
                JobState::Completed,
                JobEvent::now(JobEventKind::JobCompleted, json!({})),
            )
            .await
            .expect_err("second transition must fail");
        assert!(matches!(
            err,
            BlattwerkError::JobTerminal {
                state: JobState::Cancelled,
                ..
            }
        ));

        // Exactly one terminal event was appended.
        let events = store.read_events(&manifest.job_id).await.expect("events");
        let terminal: Vec<_> = events
            .iter()
            .filter(|e| {
                matches!(
                    e.kind,
                    JobEventKind::JobCompleted
                        | JobEventKind::JobCancelled
                        | JobEventKind::JobError
                )
            })
            .collect();
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].kind, JobEventKind::JobCancelled);
    }

    #[tokio::test]
    async fn update_running_refuses_terminal_jobs() {
        let dir = TempDir::new().expect("tempdir");
        let store = JobStore::new(dir.path());
        let mut manifest = test_manifest();
        store.create_run_dir(&manifest.job_id).await.expect("mkdir");
        store.write_manifest(&manifest).await.expect("write");
        store
            .transition_terminal(
                &manifest.job_id,
                JobState::Cancelled,
                JobEvent::now(JobEventKind::JobCancelled, json!({})),
            )
            .await
            .expect("cancel");

        manifest.pages.clear();
        let err = store
            .update_running(&manifest)
            .await
            .expect_err("stale write must fail");
        assert!(matches!(err, BlattwerkError::JobTerminal { .. }));

        // The cancelled snapshot survives untouched.
        let persisted = store.read_manifest(&manifest.job_id).await.expect("read");
        assert_eq!(persisted.state, JobState::Cancelled);
        assert_eq!(persisted.pages.len(), 1);
    }

    #[tokio::test]
    async fn list_jobs_newest_first_with_filters() {
        let dir = TempDir::new().expect("tempdir");
        let store = JobStore::new(dir.path());

        let mut first = Manifest::new(JobId::new(), test_params());
        first.created_at = chrono::Utc::now() - chrono::Duration::seconds(10);
        let mut second = Manifest::new(JobId::new(), test_params());
        second.state = JobState::Completed;

        for manifest in [&first, &second] {
            store.create_run_dir(&manifest.job_id).await.expect("mkdir");
            store.write_manifest(manifest).await.expect("write");
        }
        // A stray non-job directory must be ignored.
        tokio::fs::create_dir(dir.path().join("not-a-job"))
            .await
            .expect("mkdir");

        let all = store.list_jobs(None, None).await.expect("list");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].job_id, second.job_id, "newest first");

        let completed = store
            .list_jobs(None, Some(JobState::Completed))
            .await
            .expect("list");
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].job_id, second.job_id);

        let limited = store.list_jobs(Some(1), None).await.expect("list");
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn listing_missing_base_dir_is_empty() {
        let dir = TempDir::new().expect("tempdir");
        let store = JobStore::new(dir.path().join("never-created"));
        let jobs = store.list_jobs(None, None).await.expect("list");
        assert!(jobs.is_empty());
    }
}
