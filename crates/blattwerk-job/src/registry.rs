// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Live-process registry: one entry per job while a capture command is
// actually executing, used to deliver cancellation to the supervising task.
//
// The map lock is held only for O(1) insert/remove/lookup, never across
// I/O. Each `ScanEngine` owns its own registry instance, so supervisors in
// different engines (and tests) cannot cross-contaminate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::debug;

use blattwerk_core::types::JobId;

/// Concurrency-safe map of job id to cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    inner: Arc<Mutex<HashMap<JobId, Arc<Notify>>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job as having a live subprocess.
    ///
    /// The returned guard removes the entry again when dropped, on success
    /// and failure paths alike.
    pub(crate) fn register(&self, job_id: &JobId) -> CancelSignal {
        let notify = Arc::new(Notify::new());
        self.inner
            .lock()
            .expect("process registry lock poisoned")
            .insert(job_id.clone(), Arc::clone(&notify));
        debug!(job_id = %job_id, "registered live subprocess");
        CancelSignal {
            registry: self.clone(),
            job_id: job_id.clone(),
            notify,
        }
    }

    /// Signal cancellation to the job's live subprocess, if any.
    ///
    /// Returns whether a live entry existed. Best-effort: the supervising
    /// task terminates the child asynchronously.
    pub fn cancel(&self, job_id: &JobId) -> bool {
        let guard = self
            .inner
            .lock()
            .expect("process registry lock poisoned");
        match guard.get(job_id) {
            Some(notify) => {
                notify.notify_one();
                debug!(job_id = %job_id, "sent cancel signal to live subprocess");
                true
            }
            None => {
                debug!(job_id = %job_id, "no live subprocess to cancel");
                false
            }
        }
    }

    /// Whether a live subprocess is registered for the job.
    pub fn is_live(&self, job_id: &JobId) -> bool {
        self.inner
            .lock()
            .expect("process registry lock poisoned")
            .contains_key(job_id)
    }

    fn remove(&self, job_id: &JobId) {
        self.inner
            .lock()
            .expect("process registry lock poisoned")
            .remove(job_id);
    }
}

/// RAII handle to a registry entry.
///
/// Held by the supervising task for the duration of one command execution;
/// dropping it (on any exit path) removes the job from the registry.
pub(crate) struct CancelSignal {
    registry: ProcessRegistry,
    job_id: JobId,
    notify: Arc<Notify>,
}

impl CancelSignal {
    /// Resolves when cancellation is requested. A signal sent before this
    /// is first awaited is not lost (`Notify` stores the permit).
    pub(crate) async fn cancelled(&self) {
        self.notify.notified().await;
    }
}

impl Drop for CancelSignal {
    fn drop(&mut self) {
        self.registry.remove(&self.job_id);
        debug!(job_id = %self.job_id, "unregistered live subprocess");
    }
}
