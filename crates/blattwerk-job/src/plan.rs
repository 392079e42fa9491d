// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Command planning: translate resolved capture parameters into the ordered
// list of external commands to attempt.
//
// Pure data transformation, no I/O. Feeder sources prefer `scanadf` (built
// for batch feeding) with `scanimage` as the fallback; flatbed captures go
// straight to `scanimage`.

use std::path::{Path, PathBuf};

use blattwerk_core::config::EngineConfig;
use blattwerk_core::types::ResolvedParams;

/// One candidate invocation of an external capture tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCommand {
    pub bin: PathBuf,
    pub args: Vec<String>,
}

impl PlannedCommand {
    /// Single-line rendering for events and logs.
    pub fn render(&self) -> String {
        let mut line = self.bin.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Plan the ordered command candidates for one job.
pub fn plan_commands(
    params: &ResolvedParams,
    run_dir: &Path,
    config: &EngineConfig,
) -> Vec<PlannedCommand> {
    let args = capture_args(params, run_dir);

    let mut commands = Vec::with_capacity(2);
    if params.source.wants_feeder() {
        commands.push(PlannedCommand {
            bin: config.scanadf_bin.clone(),
            args: args.clone(),
        });
    }
    commands.push(PlannedCommand {
        bin: config.scanimage_bin.clone(),
        args,
    });
    commands
}

/// The shared argument list both capture tools accept.
fn capture_args(params: &ResolvedParams, run_dir: &Path) -> Vec<String> {
    let format = &params.output_format;
    let mut args = Vec::new();

    if let Some(device) = &params.device_id {
        args.push("-d".to_string());
        args.push(device.clone());
    }
    args.push("--resolution".to_string());
    args.push(params.resolution_dpi.to_string());
    args.push("--mode".to_string());
    args.push(params.color_mode.clone());
    args.push("--source".to_string());
    args.push(params.source.sane_name().to_string());

    if let Some(size) = params.page_size {
        let (width, height) = size.dimensions_mm();
        args.push("-x".to_string());
        args.push(format_mm(width));
        args.push("-y".to_string());
        args.push(format_mm(height));
    }

    args.push(format!(
        "--batch={}",
        run_dir.join(format!("page_%04d.{format}")).display()
    ));
    args.push(format!("--format={format}"));
    args
}

/// Millimetre value as scanimage expects it: `210mm`, `215.9mm`.
fn format_mm(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}mm", value as i64)
    } else {
        format!("{value}mm")
    }
}
