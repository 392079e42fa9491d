// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Startup preflight: verify the external tools and directories the engine
// depends on before any job runs. A missing capture tool is a
// configuration problem to report up front, not something to discover one
// failed job at a time.

use std::path::Path;

use serde::Serialize;

use blattwerk_core::config::EngineConfig;

/// Result of a single preflight check.
#[derive(Debug, Clone, Serialize)]
pub struct PreflightCheck {
    /// Check name shown to the user.
    pub name: String,
    /// Whether the check passed.
    pub passed: bool,
    /// What was tested and what was found.
    pub detail: String,
    /// What to do if the check failed.
    pub fix: Option<String>,
}

/// Full preflight report.
#[derive(Debug, Clone, Serialize)]
pub struct PreflightReport {
    pub checks: Vec<PreflightCheck>,
    /// True when every required check passed.
    pub ok: bool,
}

/// Run all preflight checks for the given configuration.
///
/// In mock mode the external tools are not required, only the directories.
/// The merge tool is advisory: its absence degrades document assembly to a
/// first-page copy instead of failing jobs, so it never fails the report.
pub fn run_preflight(config: &EngineConfig) -> PreflightReport {
    let mut checks = Vec::new();

    checks.push(check_directory("inbox directory", &config.inbox_dir));
    checks.push(check_directory("state directory", &config.state_dir));

    if config.mock {
        checks.push(PreflightCheck {
            name: "capture tools".to_string(),
            passed: true,
            detail: "mock capture enabled; external tools not required".to_string(),
            fix: None,
        });
    } else {
        checks.push(check_binary("scanimage", &config.scanimage_bin, true));
        checks.push(check_binary("scanadf", &config.scanadf_bin, true));
        checks.push(check_binary("tiffcp", &config.tiffcp_bin, false));
    }

    let ok = checks.iter().all(|c| c.passed);
    PreflightReport { checks, ok }
}

fn check_directory(name: &str, dir: &Path) -> PreflightCheck {
    match std::fs::create_dir_all(dir) {
        Ok(()) => PreflightCheck {
            name: name.to_string(),
            passed: true,
            detail: format!("{} is writable", dir.display()),
            fix: None,
        },
        Err(err) => PreflightCheck {
            name: name.to_string(),
            passed: false,
            detail: format!("cannot create {}: {err}", dir.display()),
            fix: Some("point the directory somewhere writable".to_string()),
        },
    }
}

fn check_binary(name: &str, bin: &Path, required: bool) -> PreflightCheck {
    let found = locate(bin);
    match found {
        Some(path) => PreflightCheck {
            name: name.to_string(),
            passed: true,
            detail: format!("found {}", path.display()),
            fix: None,
        },
        None => PreflightCheck {
            name: name.to_string(),
            // An absent merge tool only degrades assembly, so it reports
            // as passed with an explanatory detail.
            passed: !required,
            detail: if required {
                format!("{} not found", bin.display())
            } else {
                format!(
                    "{} not found; documents will fall back to first-page copies",
                    bin.display()
                )
            },
            fix: Some(format!("install {name} or set its path in the environment")),
        },
    }
}

/// Find a binary: explicit paths are checked directly, bare names are
/// searched on PATH.
fn locate(bin: &Path) -> Option<std::path::PathBuf> {
    if bin.components().count() > 1 {
        return bin.is_file().then(|| bin.to_path_buf());
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(bin))
        .find(|candidate| candidate.is_file())
}
