// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Capability probing via the SANE command-line tools.
//
// `scanimage -L` lists devices; `scanimage -A -d <id>` dumps every backend
// option in a human-readable form. Both dumps are parsed with narrow,
// tolerant heuristics: backends disagree wildly on formatting, so anything
// unrecognised is simply dropped rather than failing the probe.

use tokio::process::Command;
use tracing::{debug, warn};

use blattwerk_core::config::EngineConfig;
use blattwerk_core::error::{BlattwerkError, Result};
use blattwerk_core::types::{Device, DeviceCapabilities};

/// List connected scan devices.
///
/// Tool-invocation failure is tolerated: an unlistable bus yields an empty
/// list, not an error. Devices on an excluded backend are filtered out here
/// as well as vetoed during selection.
pub async fn list_devices(config: &EngineConfig) -> Result<Vec<Device>> {
    if config.mock {
        return Ok(vec![mock_device()]);
    }

    let output = match Command::new(&config.scanimage_bin).arg("-L").output().await {
        Ok(output) => output,
        Err(err) => {
            warn!(error = %err, bin = %config.scanimage_bin.display(), "device listing failed");
            return Ok(Vec::new());
        }
    };
    if !output.status.success() {
        warn!(status = ?output.status.code(), "device listing exited non-zero");
        return Ok(Vec::new());
    }

    let text = String::from_utf8_lossy(&output.stdout);
    let devices: Vec<Device> = parse_device_list(&text)
        .into_iter()
        .filter(|d| !config.exclude_backends.iter().any(|b| b == d.backend()))
        .collect();
    debug!(count = devices.len(), "listed scan devices");
    Ok(devices)
}

/// Probe the capabilities of one device.
///
/// Returns an error when the option dump cannot be produced at all; callers
/// treat that as "no information" (the selector applies a small penalty, the
/// resolver falls back to selection or floor defaults).
pub async fn device_options(config: &EngineConfig, device_id: &str) -> Result<DeviceCapabilities> {
    if config.mock {
        return Ok(mock_capabilities());
    }

    let output = Command::new(&config.scanimage_bin)
        .args(["-A", "-d", device_id])
        .output()
        .await
        .map_err(|err| BlattwerkError::Probe(format!("{device_id}: {err}")))?;
    if !output.status.success() {
        return Err(BlattwerkError::Probe(format!(
            "{device_id}: option dump exited with {:?}",
            output.status.code()
        )));
    }

    let text = String::from_utf8_lossy(&output.stdout);
    Ok(parse_device_options(&text))
}

/// The fixture device used in mock mode and throughout the tests.
pub fn mock_device() -> Device {
    Device {
        id: "epjitsu:libusb:001:004".to_string(),
        vendor: Some("FUJITSU".to_string()),
        model: Some("ScanSnap S1500".to_string()),
    }
}

/// Capabilities of the mock fixture device.
pub fn mock_capabilities() -> DeviceCapabilities {
    DeviceCapabilities {
        sources: Some(vec![
            "Flatbed".to_string(),
            "ADF".to_string(),
            "ADF Duplex".to_string(),
        ]),
        color_modes: Some(vec![
            "Color".to_string(),
            "Gray".to_string(),
            "Lineart".to_string(),
        ]),
        resolutions: Some(vec![200, 300, 600]),
        adf: true,
        duplex: true,
    }
}

/// Parse `scanimage -L` output.
///
/// Lines look like:
/// ``device `epjitsu:libusb:001:004' is a FUJITSU ScanSnap S1500 scanner``
pub fn parse_device_list(text: &str) -> Vec<Device> {
    let mut devices = Vec::new();
    for line in text.lines() {
        let Some(rest) = line.trim().strip_prefix("device `") else {
            continue;
        };
        let Some((id, description)) = rest.split_once("' is a ") else {
            continue;
        };

        // Drop the trailing "scanner"/"... scanner" noise before splitting
        // into vendor and model words.
        let described = match description.to_ascii_lowercase().find(" scanner") {
            Some(pos) => &description[..pos],
            None => description,
        };
        let mut words = described.split_whitespace();
        let vendor = words.next().map(str::to_string);
        let model = {
            let rest: Vec<&str> = words.collect();
            if rest.is_empty() {
                None
            } else {
                Some(rest.join(" "))
            }
        };

        devices.push(Device {
            id: id.to_string(),
            vendor,
            model,
        });
    }
    devices
}

/// Parse `scanimage -A` output into a capability record.
pub fn parse_device_options(text: &str) -> DeviceCapabilities {
    let mut caps = DeviceCapabilities::default();
    for line in text.lines() {
        if line.contains("--source") {
            let values = enum_values_after(line, "--source");
            if !values.is_empty() {
                caps.adf = values
                    .iter()
                    .any(|v| v.to_ascii_lowercase().contains("adf"));
                caps.duplex = values
                    .iter()
                    .any(|v| v.to_ascii_lowercase().contains("duplex"));
                caps.sources = Some(values);
            }
        } else if line.contains("--mode") {
            let values = enum_values_after(line, "--mode");
            if !values.is_empty() {
                caps.color_modes = Some(values);
            }
        } else if line.contains("--resolution") {
            let dpis = numbers_in(line);
            if !dpis.is_empty() {
                caps.resolutions = Some(dpis);
            }
        }
    }
    caps
}

/// Extract a pipe-separated enumeration following an option flag, e.g.
/// `    --source Flatbed|ADF|ADF Duplex [Flatbed]` → the three names.
fn enum_values_after(line: &str, flag: &str) -> Vec<String> {
    let Some(idx) = line.find(flag) else {
        return Vec::new();
    };
    let rest = line[idx + flag.len()..].trim_start();
    // Cut the "[current value]" suffix scanimage appends.
    let rest = rest.split(" [").next().unwrap_or(rest).trim_end();
    if !rest.contains('|') {
        return Vec::new();
    }
    rest.split('|')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Collect the distinct 2-4 digit numbers on a line, sorted ascending.
///
/// Matches both `300dpi` and bare `300`; good enough for the resolution
/// enumerations every observed backend prints.
fn numbers_in(line: &str) -> Vec<u32> {
    let mut numbers = Vec::new();
    let mut current = String::new();
    for c in line.chars().chain(std::iter::once(' ')) {
        if c.is_ascii_digit() {
            current.push(c);
        } else {
            if (2..=4).contains(&current.len()) {
                if let Ok(n) = current.parse::<u32>() {
                    if !numbers.contains(&n) {
                        numbers.push(n);
                    }
                }
            }
            current.clear();
        }
    }
    numbers.sort_unstable();
    numbers
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST_OUTPUT: &str = "\
device `epjitsu:libusb:001:004' is a FUJITSU ScanSnap S1500 scanner
device `v4l:/dev/video0' is a Noname Integrated Camera virtual device
device `genesys:libusb:001:007' is a Canon LiDE 210 flatbed scanner
";

    const OPTIONS_OUTPUT: &str = "\
All options specific to device `epjitsu:libusb:001:004':
  Scan Mode:
    --source ADF Front|ADF Back|ADF Duplex [ADF Front]
        Selects the scan source (such as a document-feeder).
    --mode Lineart|Gray|Color [Lineart]
        Selects the scan mode (e.g., lineart, monochrome, or color).
    --resolution 50..600dpi (in steps of 1) [300]
        Sets the resolution of the scanned image.
";

    #[test]
    fn parses_device_listing() {
        let devices = parse_device_list(LIST_OUTPUT);
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0].id, "epjitsu:libusb:001:004");
        assert_eq!(devices[0].vendor.as_deref(), Some("FUJITSU"));
        assert_eq!(devices[0].model.as_deref(), Some("ScanSnap S1500"));
        assert_eq!(devices[1].backend(), "v4l");
        assert_eq!(devices[2].vendor.as_deref(), Some("Canon"));
        assert_eq!(devices[2].model.as_deref(), Some("LiDE 210 flatbed"));
    }

    #[test]
    fn ignores_unrelated_lines() {
        let devices = parse_device_list("No scanners were identified.\n");
        assert!(devices.is_empty());
    }

    #[test]
    fn parses_option_dump() {
        let caps = parse_device_options(OPTIONS_OUTPUT);
        assert_eq!(
            caps.sources.as_deref(),
            Some(&["ADF Front".to_string(), "ADF Back".to_string(), "ADF Duplex".to_string()][..])
        );
        assert!(caps.adf);
        assert!(caps.duplex);
        assert_eq!(
            caps.color_modes.as_deref(),
            Some(&["Lineart".to_string(), "Gray".to_string(), "Color".to_string()][..])
        );
        // The range line yields its endpoints and the current value.
        assert_eq!(caps.resolutions.as_deref(), Some(&[50, 300, 600][..]));
    }

    #[test]
    fn discrete_resolution_list() {
        let caps =
            parse_device_options("    --resolution 75|150|300|600dpi [300]\n");
        assert_eq!(caps.resolutions.as_deref(), Some(&[75, 150, 300, 600][..]));
    }

    #[test]
    fn empty_dump_yields_unknown_capabilities() {
        let caps = parse_device_options("");
        assert_eq!(caps, DeviceCapabilities::default());
        assert!(caps.sources.is_none());
    }

    #[tokio::test]
    async fn mock_mode_lists_fixture() {
        let config = EngineConfig {
            mock: true,
            ..Default::default()
        };
        let devices = list_devices(&config).await.expect("list");
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].backend(), "epjitsu");

        let caps = device_options(&config, &devices[0].id).await.expect("probe");
        assert!(caps.supports_source("ADF Duplex"));
        assert!(caps.supports_resolution(300));
    }

    #[tokio::test]
    async fn listing_tolerates_missing_tool() {
        let config = EngineConfig {
            scanimage_bin: "/nonexistent/scanimage-for-tests".into(),
            ..Default::default()
        };
        let devices = list_devices(&config).await.expect("list");
        assert!(devices.is_empty());
    }

    #[tokio::test]
    async fn probe_surfaces_missing_tool() {
        let config = EngineConfig {
            scanimage_bin: "/nonexistent/scanimage-for-tests".into(),
            ..Default::default()
        };
        let err = device_options(&config, "epson:001").await.expect_err("fail");
        assert!(matches!(err, BlattwerkError::Probe(_)));
    }
}
