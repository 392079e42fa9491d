// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// blattwerk-device — the device layer of the Blattwerk scan orchestrator.
//
// Wraps the SANE command-line tools: listing devices, probing per-device
// capabilities, scoring candidates against a desired profile, and resolving
// a partial scan request into concrete capture parameters.

pub mod probe;
pub mod resolve;
pub mod select;

pub use resolve::resolve_request;
pub use select::{DesiredProfile, ScoredCandidate, select_device};
