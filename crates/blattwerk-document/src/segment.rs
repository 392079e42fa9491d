// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page segmentation: partition an ordered page stream into document groups.

use blattwerk_core::types::DocBreakPolicy;

/// Split an ordered list of page indices into document groups.
///
/// The groups are non-empty, non-overlapping, index-ascending, and their
/// concatenation reproduces the input exactly.
///
/// `page_count` with a positive N produces consecutive chunks of N pages
/// (the last chunk may be shorter). Every other case yields a single group
/// containing everything: no policy, an explicit `none`, a non-positive
/// count, or a policy kind the segmenter does not implement (blank-page,
/// timer, barcode). The supervisor records an event when an unimplemented
/// policy is collapsed this way.
pub fn segment_pages(pages: &[u32], policy: Option<&DocBreakPolicy>) -> Vec<Vec<u32>> {
    if pages.is_empty() {
        return Vec::new();
    }
    match policy {
        Some(DocBreakPolicy::PageCount { page_count }) if *page_count > 0 => pages
            .chunks(*page_count as usize)
            .map(<[u32]>::to_vec)
            .collect(),
        _ => vec![pages.to_vec()],
    }
}
