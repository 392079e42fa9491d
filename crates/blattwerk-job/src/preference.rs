// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Last-used-device preference: a single small JSON file in the state
// directory, read when resolving a request that names no device, written
// after a job completes successfully with a known device.
//
// Deliberately unlocked: concurrent completions race last-writer-wins,
// which is acceptable for a soft selection hint.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use blattwerk_core::error::Result;

const STATE_FILE: &str = "scan-state.json";

/// Persisted preference record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LastUsedDevice {
    device_id: String,
}

/// Store for the last-used-device hint.
#[derive(Debug, Clone)]
pub struct PreferenceStore {
    path: PathBuf,
}

impl PreferenceStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(STATE_FILE),
        }
    }

    /// The remembered device id, if any.
    ///
    /// Tolerant: a missing or malformed state file reads as "no hint".
    pub async fn last_device(&self) -> Option<String> {
        let bytes = tokio::fs::read(&self.path).await.ok()?;
        match serde_json::from_slice::<LastUsedDevice>(&bytes) {
            Ok(record) => Some(record.device_id),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "ignoring malformed state file");
                None
            }
        }
    }

    /// Remember `device_id` as the last successfully used device.
    pub async fn remember_device(&self, device_id: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let record = LastUsedDevice {
            device_id: device_id.to_string(),
        };
        tokio::fs::write(&self.path, serde_json::to_vec_pretty(&record)?).await?;
        debug!(device = %device_id, "remembered last used device");
        Ok(())
    }
}
