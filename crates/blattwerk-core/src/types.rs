// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Blattwerk scan orchestrator.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BlattwerkError;

/// Unique identifier for a scan job.
///
/// Rendered as `job-<uuid>` so the id doubles as the job's directory name.
/// Every externally supplied id must pass [`JobId::parse`] before it is used
/// to build a filesystem path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh job id.
    pub fn new() -> Self {
        Self(format!("job-{}", Uuid::new_v4()))
    }

    /// Validate an externally supplied job id.
    ///
    /// Accepts exactly `job-` followed by the 36-character textual form of a
    /// UUID (hex digits and dashes). Anything else is rejected, including
    /// path separators, `..` sequences, and absolute paths, which is what
    /// keeps job lookups confined to the base directory.
    pub fn parse(raw: &str) -> Result<Self, BlattwerkError> {
        let Some(rest) = raw.strip_prefix("job-") else {
            return Err(BlattwerkError::InvalidIdentifier(raw.to_string()));
        };
        let valid = rest.len() == 36 && rest.chars().all(|c| c.is_ascii_hexdigit() || c == '-');
        if !valid {
            return Err(BlattwerkError::InvalidIdentifier(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where the scanner pulls paper from.
///
/// Serialised with the SANE vocabulary (`"ADF Duplex"` with a space) so the
/// values match what `scanimage --source` expects verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanSource {
    Flatbed,
    #[serde(rename = "ADF")]
    Adf,
    #[serde(rename = "ADF Duplex")]
    AdfDuplex,
}

impl ScanSource {
    /// The SANE option value for this source.
    pub fn sane_name(&self) -> &'static str {
        match self {
            Self::Flatbed => "Flatbed",
            Self::Adf => "ADF",
            Self::AdfDuplex => "ADF Duplex",
        }
    }

    /// Whether this source uses the automatic document feeder.
    pub fn wants_feeder(&self) -> bool {
        matches!(self, Self::Adf | Self::AdfDuplex)
    }

    /// Match a device-advertised source name, case-insensitively.
    pub fn from_sane_name(name: &str) -> Option<Self> {
        let trimmed = name.trim();
        if trimmed.eq_ignore_ascii_case("flatbed") {
            Some(Self::Flatbed)
        } else if trimmed.eq_ignore_ascii_case("adf duplex") {
            Some(Self::AdfDuplex)
        } else if trimmed.eq_ignore_ascii_case("adf") {
            Some(Self::Adf)
        } else {
            None
        }
    }
}

impl std::fmt::Display for ScanSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.sane_name())
    }
}

/// Standard page sizes, plus explicit custom dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PageSize {
    Letter,
    A4,
    Legal,
    Custom { width_mm: f64, height_mm: f64 },
}

impl PageSize {
    /// Physical dimensions in millimetres (width, height).
    pub fn dimensions_mm(&self) -> (f64, f64) {
        match self {
            Self::Letter => (215.9, 279.4),
            Self::A4 => (210.0, 297.0),
            Self::Legal => (215.9, 355.6),
            Self::Custom {
                width_mm,
                height_mm,
            } => (*width_mm, *height_mm),
        }
    }
}

/// How a contiguous page stream is split into logical documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocBreakPolicy {
    None,
    PageCount {
        page_count: u32,
    },
    BlankPage {
        blank_threshold: Option<f64>,
    },
    Timer {
        timer_ms: u64,
    },
    Barcode {
        barcode_values: Vec<String>,
    },
}

impl DocBreakPolicy {
    /// Whether the segmenter actually honours this policy.
    ///
    /// Blank-page, timer, and barcode detection are accepted as input but
    /// currently collapse to a single document; the supervisor records a
    /// `break_policy_ignored` event when that happens.
    pub fn is_implemented(&self) -> bool {
        matches!(self, Self::None | Self::PageCount { .. })
    }

    /// Short name of the policy kind, for events and logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::PageCount { .. } => "page_count",
            Self::BlankPage { .. } => "blank_page",
            Self::Timer { .. } => "timer",
            Self::Barcode { .. } => "barcode",
        }
    }
}

/// Lifecycle states of a scan job.
///
/// `Running` is the only initial state; the other three are terminal and
/// mutually exclusive. No transition ever leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Running,
    Completed,
    Cancelled,
    Error,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for JobState {
    type Err = BlattwerkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "error" => Ok(Self::Error),
            other => Err(BlattwerkError::Configuration(format!(
                "unknown job state: {other}"
            ))),
        }
    }
}

/// A scanner as reported by the device listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Backend-qualified SANE device id, e.g. `epjitsu:libusb:001:004`.
    pub id: String,
    pub vendor: Option<String>,
    pub model: Option<String>,
}

impl Device {
    /// The SANE backend prefix of the device id (`epjitsu`, `v4l`, ...).
    pub fn backend(&self) -> &str {
        backend_of(&self.id)
    }
}

/// Backend prefix of a SANE device id.
pub fn backend_of(device_id: &str) -> &str {
    device_id.split(':').next().unwrap_or("")
}

/// Capabilities probed from a specific device.
///
/// `None` means the probe produced no information for that option; backends
/// vary widely in what they report, so absence is an explicit state rather
/// than an empty sentinel. Source and mode names are compared
/// case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub sources: Option<Vec<String>>,
    pub color_modes: Option<Vec<String>>,
    pub resolutions: Option<Vec<u32>>,
    /// Derived: any source name mentions a feeder.
    pub adf: bool,
    /// Derived: any source name mentions duplex.
    pub duplex: bool,
}

impl DeviceCapabilities {
    /// Whether the device advertises the named source (case-insensitive).
    pub fn supports_source(&self, name: &str) -> bool {
        self.sources
            .as_deref()
            .is_some_and(|sources| sources.iter().any(|s| s.eq_ignore_ascii_case(name)))
    }

    /// Whether the device lists the given resolution.
    pub fn supports_resolution(&self, dpi: u32) -> bool {
        self.resolutions
            .as_deref()
            .is_some_and(|list| list.contains(&dpi))
    }
}

/// A caller's scan request. Every field is optional; the input resolver
/// fills the gaps from probed capabilities and documented defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub device_id: Option<String>,
    pub resolution_dpi: Option<u32>,
    /// Free-form: device mode vocabularies vary (`Lineart`, `Gray`, ...).
    pub color_mode: Option<String>,
    pub source: Option<ScanSource>,
    pub duplex: Option<bool>,
    pub page_size: Option<PageSize>,
    pub doc_break_policy: Option<DocBreakPolicy>,
    pub output_format: Option<String>,
    /// Override the base directory for this job's run directory.
    pub tmp_dir: Option<PathBuf>,
}

/// The fully resolved capture parameters recorded in the manifest.
///
/// `device_id` stays optional: with no device information at all the capture
/// tool is invoked without `-d` and picks its own default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedParams {
    pub device_id: Option<String>,
    pub resolution_dpi: u32,
    pub color_mode: String,
    pub source: ScanSource,
    pub page_size: Option<PageSize>,
    pub doc_break_policy: Option<DocBreakPolicy>,
    pub output_format: String,
}

/// One captured page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    /// 1-based, contiguous, in capture order.
    pub index: u32,
    pub path: PathBuf,
    /// SHA-256 hex digest of the page file.
    pub sha256: String,
    pub mime_type: String,
}

/// One assembled multi-page document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// 1-based document index.
    pub index: u32,
    /// Constituent page indices, ascending, non-empty.
    pub pages: Vec<u32>,
    pub path: PathBuf,
    pub sha256: String,
    pub mime_type: String,
}

/// The mutable per-job snapshot, atomically replaced on every update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub job_id: JobId,
    pub device_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub params: ResolvedParams,
    pub pages: Vec<PageRecord>,
    pub documents: Vec<DocumentRecord>,
    pub state: JobState,
}

impl Manifest {
    /// A fresh manifest in the `running` state with no artifacts yet.
    pub fn new(job_id: JobId, params: ResolvedParams) -> Self {
        Self {
            job_id,
            device_id: params.device_id.clone(),
            created_at: Utc::now(),
            params,
            pages: Vec::new(),
            documents: Vec::new(),
            state: JobState::Running,
        }
    }
}

/// Lifecycle event kinds, serialised snake_case into the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    JobStarted,
    ScannerExec,
    ScannerPrimaryFailed,
    ScannerFailed,
    PageCaptured,
    DocumentAssembled,
    AssemblyFallback,
    BreakPolicyIgnored,
    JobCompleted,
    JobError,
    JobCancelled,
}

/// One append-only audit record in `events.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub ts: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: JobEventKind,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl JobEvent {
    /// An event stamped with the current time.
    pub fn now(kind: JobEventKind, data: serde_json::Value) -> Self {
        Self {
            ts: Utc::now(),
            kind,
            data,
        }
    }
}

/// Compact job view returned by status queries and listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub state: JobState,
    pub pages: usize,
    pub documents: usize,
    pub created_at: DateTime<Utc>,
    pub run_dir: PathBuf,
}

/// MIME type for a capture output format extension.
pub fn mime_for_format(format: &str) -> &'static str {
    match format.to_ascii_lowercase().as_str() {
        "tiff" | "tif" => "image/tiff",
        "png" => "image/png",
        "jpeg" | "jpg" => "image/jpeg",
        "pnm" => "image/x-portable-anymap",
        _ => "application/octet-stream",
    }
}
