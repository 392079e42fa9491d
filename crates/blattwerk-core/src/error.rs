// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Blattwerk.

use thiserror::Error;

use crate::types::JobState;

/// Top-level error type for all Blattwerk operations.
#[derive(Debug, Error)]
pub enum BlattwerkError {
    // -- Job lookup --
    #[error("job {0} not found")]
    NotFound(String),

    #[error("invalid job id: {0}")]
    InvalidIdentifier(String),

    #[error("job {job_id} is already {state}")]
    JobTerminal { job_id: String, state: JobState },

    // -- Device layer --
    #[error("no usable scan device: {0}")]
    DeviceUnavailable(String),

    #[error("device probe failed: {0}")]
    Probe(String),

    // -- Execution --
    #[error("command execution failed: {0}")]
    CommandFailed(String),

    // -- Configuration / persistence --
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BlattwerkError>;
