// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Blattwerk — local scan-job orchestrator CLI.
//
// A thin adapter over the engine: each subcommand parses its flags into the
// engine's input types, invokes one engine operation, and prints the result
// as JSON on stdout. No validation or business logic lives here.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use blattwerk_core::config::EngineConfig;
use blattwerk_core::error::{BlattwerkError, Result};
use blattwerk_core::types::{DocBreakPolicy, JobState, PageSize, ScanRequest, ScanSource};
use blattwerk_device::DesiredProfile;
use blattwerk_job::ScanEngine;

#[derive(Parser)]
#[command(name = "blattwerk", version, about = "Local scan-job orchestrator for SANE scanners")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List connected scanner devices
    Devices,
    /// Show the probed options of one device
    Options {
        /// Backend-qualified SANE device id
        device_id: String,
    },
    /// Pick the best device for a desired profile, with scoring rationale
    Select {
        /// Desired source: flatbed, adf, or adf-duplex
        #[arg(long)]
        source: Option<String>,
        /// Desired resolution in DPI
        #[arg(long)]
        resolution: Option<u32>,
    },
    /// Start a scan job and wait for it to settle
    Scan(ScanArgs),
    /// Show the status of a job
    Status { job_id: String },
    /// Show the full manifest of a job
    Manifest { job_id: String },
    /// Show the event log of a job
    Events { job_id: String },
    /// Cancel a running job
    Cancel { job_id: String },
    /// List recent jobs, newest first
    Jobs {
        /// Maximum number of jobs to show
        #[arg(long)]
        limit: Option<usize>,
        /// Only jobs in this state (running, completed, cancelled, error)
        #[arg(long)]
        state: Option<String>,
    },
    /// Check external tools and directories
    Doctor,
}

#[derive(Args)]
struct ScanArgs {
    /// Device to use; omitted means automatic selection
    #[arg(long)]
    device_id: Option<String>,
    /// Resolution in DPI
    #[arg(long)]
    resolution: Option<u32>,
    /// Colour mode (device vocabulary, e.g. Lineart, Gray, Color)
    #[arg(long)]
    mode: Option<String>,
    /// Scan source: flatbed, adf, or adf-duplex
    #[arg(long)]
    source: Option<String>,
    /// Prefer double-sided feeder capture when available
    #[arg(long)]
    duplex: bool,
    /// Page size: letter, a4, legal, or WIDTHxHEIGHT in millimetres
    #[arg(long)]
    page_size: Option<String>,
    /// Split the capture into documents of N pages each
    #[arg(long)]
    pages_per_doc: Option<u32>,
    /// Output image format (default tiff)
    #[arg(long)]
    output_format: Option<String>,
    /// Base directory override for this job's run directory
    #[arg(long)]
    tmp_dir: Option<PathBuf>,
}

impl ScanArgs {
    fn into_request(self) -> Result<ScanRequest> {
        Ok(ScanRequest {
            device_id: self.device_id,
            resolution_dpi: self.resolution,
            color_mode: self.mode,
            source: self.source.as_deref().map(parse_source).transpose()?,
            duplex: self.duplex.then_some(true),
            page_size: self.page_size.as_deref().map(parse_page_size).transpose()?,
            doc_break_policy: self
                .pages_per_doc
                .map(|page_count| DocBreakPolicy::PageCount { page_count }),
            output_format: self.output_format,
            tmp_dir: self.tmp_dir,
        })
    }
}

fn parse_source(raw: &str) -> Result<ScanSource> {
    let normalised = raw.replace(['-', '_'], " ");
    ScanSource::from_sane_name(&normalised).ok_or_else(|| {
        BlattwerkError::Configuration(format!(
            "unknown source {raw:?}; expected flatbed, adf, or adf-duplex"
        ))
    })
}

fn parse_page_size(raw: &str) -> Result<PageSize> {
    match raw.to_ascii_lowercase().as_str() {
        "letter" => return Ok(PageSize::Letter),
        "a4" => return Ok(PageSize::A4),
        "legal" => return Ok(PageSize::Legal),
        _ => {}
    }
    let custom = raw.split_once(['x', 'X']).and_then(|(width, height)| {
        let width_mm = width.trim().parse::<f64>().ok()?;
        let height_mm = height.trim().parse::<f64>().ok()?;
        (width_mm > 0.0 && height_mm > 0.0).then_some(PageSize::Custom {
            width_mm,
            height_mm,
        })
    });
    custom.ok_or_else(|| {
        BlattwerkError::Configuration(format!(
            "unknown page size {raw:?}; expected letter, a4, legal, or WIDTHxHEIGHT"
        ))
    })
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(command: Command, engine: &ScanEngine) -> Result<()> {
    match command {
        Command::Devices => {
            let devices = engine.list_devices().await?;
            print_json(&serde_json::json!({ "devices": devices }))
        }
        Command::Options { device_id } => {
            let options = engine.device_options(&device_id).await?;
            print_json(&options)
        }
        Command::Select { source, resolution } => {
            let desired = DesiredProfile {
                source: source.as_deref().map(parse_source).transpose()?,
                resolution_dpi: resolution,
            };
            let winner = engine.select_device(&desired).await?;
            print_json(&winner)
        }
        Command::Scan(args) => {
            let outcome = engine.start_scan_job(args.into_request()?).await?;
            print_json(&outcome)
        }
        Command::Status { job_id } => {
            let status = engine.job_status(&job_id).await?;
            print_json(&status)
        }
        Command::Manifest { job_id } => {
            let manifest = engine.job_manifest(&job_id).await?;
            print_json(&manifest)
        }
        Command::Events { job_id } => {
            let events = engine.job_events(&job_id).await?;
            print_json(&events)
        }
        Command::Cancel { job_id } => {
            engine.cancel_job(&job_id).await?;
            print_json(&serde_json::json!({ "ok": true }))
        }
        Command::Jobs { limit, state } => {
            let state = state.as_deref().map(str::parse::<JobState>).transpose()?;
            let jobs = engine.list_jobs(limit, state).await?;
            print_json(&serde_json::json!({ "jobs": jobs }))
        }
        Command::Doctor => {
            let report = engine.preflight();
            print_json(&report)?;
            if !report.ok {
                return Err(BlattwerkError::Configuration(
                    "preflight checks failed".to_string(),
                ));
            }
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    };
    let engine = ScanEngine::new(config);
    tracing::debug!(inbox = %engine.config().inbox_dir.display(), "blattwerk starting");

    if let Err(err) = run(cli.command, &engine).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
