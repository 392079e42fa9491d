// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device selection: score every known device against the desired capability
// profile and pick the best one.
//
// Scoring is a pure function over (device, probed capabilities, desired
// profile, config lists, last-used hint) so the weights are unit-testable
// without any hardware. Each contributing factor is also recorded as a
// rationale string for observability.

use serde::Serialize;
use tracing::{debug, info};

use blattwerk_core::config::EngineConfig;
use blattwerk_core::error::Result;
use blattwerk_core::types::{Device, DeviceCapabilities, ScanSource};

use crate::probe;

/// Backend families that are camera-like rather than scanners, penalised
/// even when not explicitly excluded.
const CAMERA_BACKENDS: &[&str] = &["v4l"];

/// The capability profile a caller wants satisfied.
#[derive(Debug, Clone, Copy, Default)]
pub struct DesiredProfile {
    pub source: Option<ScanSource>,
    pub resolution_dpi: Option<u32>,
}

/// A scored candidate device.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredCandidate {
    pub device_id: String,
    pub score: i64,
    /// Excluded backends are vetoed outright and never win, regardless of
    /// how favourably they would otherwise score.
    pub vetoed: bool,
    /// Human-readable list of every factor that contributed to the score.
    pub rationale: Vec<String>,
}

/// Score one device. Pure; `capabilities` is `None` when probing failed.
pub fn score_device(
    device: &Device,
    capabilities: Option<&DeviceCapabilities>,
    desired: &DesiredProfile,
    config: &EngineConfig,
    last_used: Option<&str>,
) -> ScoredCandidate {
    let backend = device.backend();

    if config.exclude_backends.iter().any(|b| b == backend) {
        return ScoredCandidate {
            device_id: device.id.clone(),
            score: 0,
            vetoed: true,
            rationale: vec![format!("excluded backend: {backend}")],
        };
    }

    let mut score: i64 = 0;
    let mut rationale = Vec::new();

    match capabilities {
        Some(caps) => {
            let has_adf_duplex = caps.supports_source("ADF Duplex");
            let has_adf = has_adf_duplex || caps.supports_source("ADF");

            if desired.source.is_some_and(|s| s.wants_feeder()) {
                if has_adf_duplex {
                    score += 120;
                    rationale.push("supports ADF Duplex".to_string());
                } else if has_adf {
                    score += 100;
                    rationale.push("supports ADF".to_string());
                } else {
                    score -= 50;
                    rationale.push("no ADF support".to_string());
                }
            } else {
                // No explicit preference; reward feeder availability with a
                // smaller weight.
                if has_adf_duplex {
                    score += 40;
                    rationale.push("has feeder (duplex)".to_string());
                } else if has_adf {
                    score += 30;
                    rationale.push("has feeder".to_string());
                }
            }

            if let Some(dpi) = desired.resolution_dpi {
                if caps.supports_resolution(dpi) {
                    score += 10;
                    rationale.push(format!("supports {dpi}dpi"));
                }
            }

            if has_adf_duplex {
                score += 10;
                rationale.push("duplex capable".to_string());
            }

            if config.prefer_backends.iter().any(|b| b == backend) {
                score += 5;
                rationale.push(format!("preferred backend: {backend}"));
            }
        }
        None => {
            // Probe failure: lightly penalise but still consider the device
            // with no other capability information.
            score -= 5;
            rationale.push("options probe failed".to_string());
        }
    }

    if CAMERA_BACKENDS.contains(&backend) {
        score -= 100;
        rationale.push("camera backend penalty".to_string());
    }

    if last_used.is_some_and(|id| id == device.id) {
        score += 1;
        rationale.push("last used".to_string());
    }

    ScoredCandidate {
        device_id: device.id.clone(),
        score,
        vetoed: false,
        rationale,
    }
}

/// Probe and score every known device; return the best usable candidate.
///
/// Deterministic: ties break by lexical device id. Returns `None` when the
/// device list is empty or every candidate is vetoed.
pub async fn select_device(
    config: &EngineConfig,
    desired: &DesiredProfile,
    last_used: Option<&str>,
) -> Result<Option<ScoredCandidate>> {
    let devices = probe::list_devices(config).await?;
    if devices.is_empty() {
        debug!("no devices to select from");
        return Ok(None);
    }

    let mut candidates = Vec::with_capacity(devices.len());
    for device in &devices {
        let capabilities = match probe::device_options(config, &device.id).await {
            Ok(caps) => Some(caps),
            Err(err) => {
                debug!(device = %device.id, error = %err, "options probe failed");
                None
            }
        };
        candidates.push(score_device(
            device,
            capabilities.as_ref(),
            desired,
            config,
            last_used,
        ));
    }

    candidates.retain(|c| !c.vetoed);
    candidates.sort_by(|a, b| b.score.cmp(&a.score).then(a.device_id.cmp(&b.device_id)));

    match candidates.into_iter().next() {
        Some(winner) => {
            info!(device = %winner.device_id, score = winner.score, "selected scan device");
            Ok(Some(winner))
        }
        None => {
            debug!("every candidate was vetoed");
            Ok(None)
        }
    }
}
