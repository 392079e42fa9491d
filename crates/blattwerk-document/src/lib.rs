// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// blattwerk-document — Document shaping for the Blattwerk scan orchestrator.
//
// Provides pure page segmentation (splitting a captured page stream into
// logical documents according to a break policy) and multi-page document
// assembly via an external merge tool with a verbatim-copy fallback.

pub mod assemble;
pub mod segment;

pub use assemble::{Assembly, assemble_document};
pub use segment::segment_pages;
