// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Document assembly: merge a group of page files into one multi-page
// artifact via an external tool, falling back to a verbatim copy of the
// first page when the tool is absent or fails.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, warn};

use blattwerk_core::error::Result;

/// Outcome of assembling one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembly {
    pub path: PathBuf,
    /// True when the merge tool was unavailable or failed and the document
    /// is a verbatim copy of its first page only. Callers can detect the
    /// degradation through the manifest's page-count/segment mismatch and
    /// through the `assembly_fallback` event.
    pub fallback: bool,
}

/// Merge `pages` into a single multi-page file at `dest`.
///
/// An empty page list is a no-op: no file is produced and no error raised.
/// The merge tool failing is a non-fatal degradation, not an error; only a
/// failure of the fallback copy itself propagates.
pub async fn assemble_document(
    pages: &[PathBuf],
    dest: &Path,
    tiffcp_bin: &Path,
) -> Result<Option<Assembly>> {
    let Some(first) = pages.first() else {
        return Ok(None);
    };

    match Command::new(tiffcp_bin).args(pages).arg(dest).output().await {
        Ok(output) if output.status.success() => {
            debug!(dest = %dest.display(), pages = pages.len(), "merged document");
            return Ok(Some(Assembly {
                path: dest.to_path_buf(),
                fallback: false,
            }));
        }
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                status = ?output.status.code(),
                stderr = %stderr.trim(),
                "merge tool failed, copying first page instead"
            );
        }
        Err(err) => {
            warn!(
                bin = %tiffcp_bin.display(),
                error = %err,
                "merge tool unavailable, copying first page instead"
            );
        }
    }

    tokio::fs::copy(first, dest).await?;
    Ok(Some(Assembly {
        path: dest.to_path_buf(),
        fallback: true,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn empty_input_is_a_no_op() {
        let dir = TempDir::new().expect("tempdir");
        let dest = dir.path().join("doc_0001.tiff");
        let result = assemble_document(&[], &dest, Path::new("tiffcp"))
            .await
            .expect("assemble");
        assert!(result.is_none());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn missing_tool_falls_back_to_first_page_copy() {
        let dir = TempDir::new().expect("tempdir");
        let page1 = dir.path().join("page_0001.tiff");
        let page2 = dir.path().join("page_0002.tiff");
        tokio::fs::write(&page1, b"PAGE_ONE").await.expect("write");
        tokio::fs::write(&page2, b"PAGE_TWO").await.expect("write");

        let dest = dir.path().join("doc_0001.tiff");
        let assembly = assemble_document(
            &[page1.clone(), page2],
            &dest,
            Path::new("/nonexistent/tiffcp-for-tests"),
        )
        .await
        .expect("assemble")
        .expect("produced");

        assert!(assembly.fallback);
        assert_eq!(assembly.path, dest);
        let copied = tokio::fs::read(&dest).await.expect("read");
        assert_eq!(copied, b"PAGE_ONE");
    }

    #[tokio::test]
    async fn failing_tool_falls_back_to_first_page_copy() {
        let dir = TempDir::new().expect("tempdir");
        let page = dir.path().join("page_0001.tiff");
        tokio::fs::write(&page, b"PAGE_ONE").await.expect("write");

        // `false` exists on every test host and always exits non-zero.
        let dest = dir.path().join("doc_0001.tiff");
        let assembly = assemble_document(&[page], &dest, Path::new("false"))
            .await
            .expect("assemble")
            .expect("produced");

        assert!(assembly.fallback);
        assert_eq!(
            tokio::fs::read(&dest).await.expect("read"),
            b"PAGE_ONE"
        );
    }
}
