// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Engine configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BlattwerkError, Result};

/// Resolution used when the caller specifies none and the device either
/// accepts it or reports nothing.
pub const DEFAULT_RESOLUTION_DPI: u32 = 300;

/// Capture output format used when the caller specifies none.
pub const DEFAULT_OUTPUT_FORMAT: &str = "tiff";

/// Engine settings, normally loaded from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base directory holding one run directory per job.
    pub inbox_dir: PathBuf,
    /// Directory for small persistent state (last-used device).
    pub state_dir: PathBuf,
    /// Path to the `scanimage` binary.
    pub scanimage_bin: PathBuf,
    /// Path to the `scanadf` binary (feeder-batch capture).
    pub scanadf_bin: PathBuf,
    /// Path to the `tiffcp` binary (multi-page merge).
    pub tiffcp_bin: PathBuf,
    /// SANE backends that must never be listed or selected.
    pub exclude_backends: Vec<String>,
    /// SANE backends given a small selection bonus.
    pub prefer_backends: Vec<String>,
    /// Simulate capture without any hardware or external tools.
    pub mock: bool,
    /// Number of fixture pages a mock capture produces.
    pub mock_pages: u32,
    /// Remember the device of a successfully completed job.
    pub persist_last_device: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            inbox_dir: PathBuf::from("inbox"),
            state_dir: PathBuf::from(".state"),
            scanimage_bin: PathBuf::from("scanimage"),
            scanadf_bin: PathBuf::from("scanadf"),
            tiffcp_bin: PathBuf::from("tiffcp"),
            exclude_backends: Vec::new(),
            prefer_backends: Vec::new(),
            mock: false,
            mock_pages: 2,
            persist_last_device: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// Split out from [`from_env`](Self::from_env) so tests can feed a plain
    /// map instead of mutating process-global environment variables.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let inbox_dir = lookup("INBOX_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.inbox_dir);
        // The state directory defaults to a `.state` sibling of the inbox so
        // that pointing INBOX_DIR somewhere else moves both together.
        let state_dir = lookup("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_state_dir(&inbox_dir));

        Ok(Self {
            inbox_dir,
            state_dir,
            scanimage_bin: lookup("SCANIMAGE_BIN")
                .map(PathBuf::from)
                .unwrap_or(defaults.scanimage_bin),
            scanadf_bin: lookup("SCANADF_BIN")
                .map(PathBuf::from)
                .unwrap_or(defaults.scanadf_bin),
            tiffcp_bin: lookup("TIFFCP_BIN")
                .map(PathBuf::from)
                .unwrap_or(defaults.tiffcp_bin),
            exclude_backends: lookup("SCAN_EXCLUDE_BACKENDS")
                .map(|v| parse_csv(&v))
                .unwrap_or(defaults.exclude_backends),
            prefer_backends: lookup("SCAN_PREFER_BACKENDS")
                .map(|v| parse_csv(&v))
                .unwrap_or(defaults.prefer_backends),
            mock: lookup("SCAN_MOCK")
                .map(|v| parse_bool("SCAN_MOCK", &v))
                .transpose()?
                .unwrap_or(defaults.mock),
            mock_pages: lookup("SCAN_MOCK_PAGES")
                .map(|v| {
                    v.parse::<u32>().map_err(|_| {
                        BlattwerkError::Configuration(format!(
                            "SCAN_MOCK_PAGES must be an integer, got {v:?}"
                        ))
                    })
                })
                .transpose()?
                .unwrap_or(defaults.mock_pages),
            persist_last_device: lookup("SCAN_PERSIST_LAST_DEVICE")
                .map(|v| parse_bool("SCAN_PERSIST_LAST_DEVICE", &v))
                .transpose()?
                .unwrap_or(defaults.persist_last_device),
        })
    }
}

/// `.state` next to the inbox directory.
fn default_state_dir(inbox_dir: &Path) -> PathBuf {
    inbox_dir
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .join(".state")
}

fn parse_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(BlattwerkError::Configuration(format!(
            "{key} must be a boolean, got {other:?}"
        ))),
    }
}
