// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The engine facade: every operation a transport adapter exposes, with the
// per-instance state (store, live-process registry, preference store) that
// makes multiple engines coexist cleanly in one process.

use std::path::PathBuf;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use blattwerk_core::config::EngineConfig;
use blattwerk_core::error::{BlattwerkError, Result};
use blattwerk_core::types::{
    Device, DeviceCapabilities, JobEvent, JobEventKind, JobId, JobState, JobSummary, Manifest,
    ScanRequest,
};
use blattwerk_device::{DesiredProfile, ScoredCandidate, probe};

use crate::preference::PreferenceStore;
use crate::preflight::{PreflightReport, run_preflight};
use crate::registry::ProcessRegistry;
use crate::store::JobStore;
use crate::supervisor;

/// What `start_scan_job` reports back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartScanOutcome {
    pub job_id: JobId,
    pub run_dir: PathBuf,
    pub state: JobState,
}

/// The job orchestration engine.
///
/// Safe to share across concurrent callers; each job owns its run directory
/// and the only cross-job state is the registry and the preference file.
#[derive(Debug, Clone)]
pub struct ScanEngine {
    config: EngineConfig,
    store: JobStore,
    registry: ProcessRegistry,
    preference: PreferenceStore,
}

impl ScanEngine {
    pub fn new(config: EngineConfig) -> Self {
        let store = JobStore::new(config.inbox_dir.clone());
        let preference = PreferenceStore::new(&config.state_dir);
        Self {
            config,
            store,
            registry: ProcessRegistry::new(),
            preference,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Check external tools and directories before serving jobs.
    pub fn preflight(&self) -> PreflightReport {
        run_preflight(&self.config)
    }

    /// List connected scan devices.
    pub async fn list_devices(&self) -> Result<Vec<Device>> {
        probe::list_devices(&self.config).await
    }

    /// Probe one device's capabilities.
    pub async fn device_options(&self, device_id: &str) -> Result<DeviceCapabilities> {
        probe::device_options(&self.config, device_id).await
    }

    /// Pick the best device for a desired capability profile.
    ///
    /// Returns the winning candidate with its score and rationale, or
    /// `DeviceUnavailable` when no device exists or every candidate is
    /// excluded.
    pub async fn select_device(&self, desired: &DesiredProfile) -> Result<ScoredCandidate> {
        let last_used = if self.config.persist_last_device {
            self.preference.last_device().await
        } else {
            None
        };
        blattwerk_device::select_device(&self.config, desired, last_used.as_deref())
            .await?
            .ok_or_else(|| {
                BlattwerkError::DeviceUnavailable(
                    "no devices found, or every candidate is excluded".to_string(),
                )
            })
    }

    /// Start a scan job and drive it to a settled state.
    ///
    /// A job whose capture fails still counts as successfully started: the
    /// failure lives in the returned `error` state and the event log, not
    /// in this function's `Result`.
    pub async fn start_scan_job(&self, request: ScanRequest) -> Result<StartScanOutcome> {
        let store = match &request.tmp_dir {
            Some(dir) => JobStore::new(dir.clone()),
            None => self.store.clone(),
        };
        supervisor::run_job(
            &self.config,
            &store,
            &self.registry,
            &self.preference,
            request,
        )
        .await
    }

    /// Status summary for one job.
    pub async fn job_status(&self, raw_id: &str) -> Result<JobSummary> {
        let job_id = JobId::parse(raw_id)?;
        self.store.status(&job_id).await
    }

    /// Full manifest for one job.
    pub async fn job_manifest(&self, raw_id: &str) -> Result<Manifest> {
        let job_id = JobId::parse(raw_id)?;
        self.store.read_manifest(&job_id).await
    }

    /// Full event log for one job.
    pub async fn job_events(&self, raw_id: &str) -> Result<Vec<JobEvent>> {
        let job_id = JobId::parse(raw_id)?;
        self.store.read_events(&job_id).await
    }

    /// Cancel a running job.
    ///
    /// The manifest flips to `cancelled` whenever a running manifest exists,
    /// whether or not a subprocess was live; any live subprocess is then
    /// terminated best-effort. A job with no manifest is `NotFound`; a job
    /// already in a terminal state is `JobTerminal`. Cancellation is never
    /// silently swallowed, and `job_cancelled` is appended exactly once.
    pub async fn cancel_job(&self, raw_id: &str) -> Result<()> {
        let job_id = JobId::parse(raw_id)?;
        self.store
            .transition_terminal(
                &job_id,
                JobState::Cancelled,
                JobEvent::now(JobEventKind::JobCancelled, json!({})),
            )
            .await?;
        let had_live_process = self.registry.cancel(&job_id);
        info!(job_id = %job_id, had_live_process, "job cancelled");
        Ok(())
    }

    /// List recent jobs, newest first.
    pub async fn list_jobs(
        &self,
        limit: Option<usize>,
        state: Option<JobState>,
    ) -> Result<Vec<JobSummary>> {
        let jobs = self.store.list_jobs(limit, state).await?;
        debug!(count = jobs.len(), "listed jobs");
        Ok(jobs)
    }
}
