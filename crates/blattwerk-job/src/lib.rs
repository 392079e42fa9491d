// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// blattwerk-job — Job orchestration for the Blattwerk scan engine.
//
// Plans capture commands, supervises their execution with fallback and
// cancellation, segments and assembles the captured pages, and keeps every
// job durable through an atomically-replaced manifest plus an append-only
// event log. The `ScanEngine` facade ties the pieces together for callers.

pub mod engine;
pub mod plan;
pub mod preference;
pub mod preflight;
pub mod registry;
pub mod store;
mod supervisor;

pub use engine::{ScanEngine, StartScanOutcome};
pub use plan::{PlannedCommand, plan_commands};
pub use preflight::{PreflightCheck, PreflightReport, run_preflight};
pub use registry::ProcessRegistry;
pub use store::JobStore;
