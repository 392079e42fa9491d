// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Input resolution: fill every unspecified capture parameter from probed
// capabilities and documented defaults.
//
// Resolution never fails a request. Probe failures are absorbed into
// fallback defaults, and with no device information at all the floor
// defaults apply (Flatbed, 300 dpi, lineart). The only side effects are the
// capability probes themselves; no persisted state is touched.

use tracing::{debug, warn};

use blattwerk_core::config::{DEFAULT_OUTPUT_FORMAT, DEFAULT_RESOLUTION_DPI, EngineConfig};
use blattwerk_core::types::{DeviceCapabilities, ResolvedParams, ScanRequest, ScanSource};

use crate::probe;
use crate::select::{DesiredProfile, select_device};

/// Device-insensitive colour mode preference, most to least wanted.
const COLOR_MODE_PREFERENCE: &[&str] = &["lineart", "gray", "halftone", "color"];

/// Resolve a raw scan request into concrete capture parameters.
///
/// `last_used` is the remembered device id, consulted only when the request
/// names no device.
pub async fn resolve_request(
    config: &EngineConfig,
    request: &ScanRequest,
    last_used: Option<&str>,
) -> ResolvedParams {
    let mut device_id = request.device_id.clone();
    let mut capabilities: Option<DeviceCapabilities> = None;

    // 1. Device. A caller-supplied device that cannot be probed is dropped
    //    in favour of selection rather than failing the whole request.
    if let Some(id) = device_id.clone() {
        match probe::device_options(config, &id).await {
            Ok(caps) => capabilities = Some(caps),
            Err(err) => {
                warn!(device = %id, error = %err, "requested device unprobeable, falling back to selection");
                device_id = None;
            }
        }
    }
    if device_id.is_none() {
        let desired = DesiredProfile {
            source: request.source,
            resolution_dpi: request.resolution_dpi,
        };
        let selected = select_device(config, &desired, last_used)
            .await
            .unwrap_or_default();
        if let Some(winner) = selected {
            capabilities = probe::device_options(config, &winner.device_id).await.ok();
            device_id = Some(winner.device_id);
        } else {
            debug!("no device selected, resolving with floor defaults");
        }
    }

    let source = resolve_source(request, capabilities.as_ref());
    let resolution_dpi = request
        .resolution_dpi
        .unwrap_or_else(|| pick_resolution(capabilities.as_ref()));
    let color_mode = resolve_color_mode(request, capabilities.as_ref());

    ResolvedParams {
        device_id,
        resolution_dpi,
        color_mode,
        source,
        page_size: request.page_size,
        doc_break_policy: request.doc_break_policy.clone(),
        output_format: request
            .output_format
            .clone()
            .unwrap_or_else(|| DEFAULT_OUTPUT_FORMAT.to_string()),
    }
}

/// Derive the scan source.
///
/// An explicit duplex request forces ADF Duplex whenever the device offers
/// it, overriding both derivation and an explicitly requested single-sided
/// source. Otherwise an explicit source is respected, and an absent one is
/// derived as feeder-duplex, then feeder, then the device's first listed
/// source, then the Flatbed floor default.
fn resolve_source(request: &ScanRequest, caps: Option<&DeviceCapabilities>) -> ScanSource {
    let has = |name: &str| caps.is_some_and(|c| c.supports_source(name));

    if request.duplex == Some(true) && has("ADF Duplex") {
        return ScanSource::AdfDuplex;
    }
    if let Some(source) = request.source {
        return source;
    }
    if has("ADF Duplex") {
        return ScanSource::AdfDuplex;
    }
    if has("ADF") {
        return ScanSource::Adf;
    }
    caps.and_then(|c| c.sources.as_deref())
        .and_then(|sources| sources.first())
        .and_then(|first| ScanSource::from_sane_name(first))
        .unwrap_or(ScanSource::Flatbed)
}

/// Pick a resolution when the caller named none.
///
/// The default DPI wins when the device accepts it or reports nothing.
/// Otherwise the closest listed value at-or-below the default is used, and
/// only when nothing is at-or-below, the closest value above. An arbitrary
/// unrelated value is never chosen.
fn pick_resolution(caps: Option<&DeviceCapabilities>) -> u32 {
    let listed = caps
        .and_then(|c| c.resolutions.as_deref())
        .filter(|list| !list.is_empty());
    let Some(list) = listed else {
        return DEFAULT_RESOLUTION_DPI;
    };
    if list.contains(&DEFAULT_RESOLUTION_DPI) {
        return DEFAULT_RESOLUTION_DPI;
    }
    if let Some(below) = list
        .iter()
        .filter(|&&dpi| dpi < DEFAULT_RESOLUTION_DPI)
        .max()
    {
        return *below;
    }
    list.iter()
        .filter(|&&dpi| dpi > DEFAULT_RESOLUTION_DPI)
        .min()
        .copied()
        .unwrap_or(DEFAULT_RESOLUTION_DPI)
}

/// Pick the colour mode.
///
/// A caller-supplied mode is normalised case-insensitively against the
/// device's advertised vocabulary, keeping the caller's casing only when
/// nothing matches. An absent mode takes the first preference the device
/// advertises, then the device's first listed mode, then the lineart floor.
fn resolve_color_mode(request: &ScanRequest, caps: Option<&DeviceCapabilities>) -> String {
    let advertised = caps.and_then(|c| c.color_modes.as_deref());

    if let Some(requested) = &request.color_mode {
        let normalised = advertised.and_then(|modes| {
            modes
                .iter()
                .find(|m| m.eq_ignore_ascii_case(requested))
                .cloned()
        });
        return normalised.unwrap_or_else(|| requested.clone());
    }

    if let Some(modes) = advertised {
        for preferred in COLOR_MODE_PREFERENCE {
            if let Some(hit) = modes.iter().find(|m| m.eq_ignore_ascii_case(preferred)) {
                return hit.clone();
            }
        }
        if let Some(first) = modes.first() {
            return first.clone();
        }
    }
    "Lineart".to_string()
}
