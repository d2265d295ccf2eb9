//! Result types describing a flattening run.
//!
//! [`FlattenOutput`] is returned from the top-level entry points whenever an
//! output document was actually written — including partial documents under
//! the placeholder policy, which callers can detect via
//! [`FlattenOutput::is_partial`] or escalate with
//! [`FlattenOutput::into_result`].

use crate::error::FlattenError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Terminal status of one page after the pipeline has run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PageStatus {
    /// Rendered by the in-process renderer.
    Success,
    /// The primary renderer failed (or was disabled); the external tool
    /// produced this page.
    FallbackUsed,
    /// Every configured renderer failed. Present in an output document only
    /// under the placeholder policy, where the page is a blank substitute.
    Failed { reason: String },
}

impl PageStatus {
    /// True when the page carries real rendered content.
    pub fn is_rendered(&self) -> bool {
        !matches!(self, PageStatus::Failed { .. })
    }
}

/// Width and height of a page in points (1/72 in), as a viewer displays it.
///
/// Intrinsic page rotation is already applied: a portrait A4 page with
/// `/Rotate 90` reports landscape dimensions here, and the output page is
/// created with exactly these dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageGeometry {
    pub width_pts: f32,
    pub height_pts: f32,
}

/// Per-page record in a [`FlattenOutput`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    /// 1-indexed page number.
    pub page: usize,
    /// Output page size in points, equal to the source page size.
    pub geometry: PageGeometry,
    #[serde(flatten)]
    pub status: PageStatus,
}

/// Basic facts about a source document, available without rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub page_count: usize,
    pub pdf_version: String,
    /// Per-page visual dimensions, in page order.
    pub pages: Vec<PageGeometry>,
}

/// Aggregate statistics for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlattenStats {
    /// Pages in the source document.
    pub total_pages: usize,
    /// Pages rendered by the primary renderer.
    pub rendered_pages: usize,
    /// Pages served by the fallback tool.
    pub fallback_pages: usize,
    /// Pages that failed every renderer (placeholders in the output).
    pub failed_pages: usize,
    /// Wall-clock time spent rendering (both renderers).
    pub render_duration_ms: u64,
    /// Wall-clock time spent encoding and assembling the output document.
    pub assemble_duration_ms: u64,
    /// Total wall-clock time for the run.
    pub total_duration_ms: u64,
    /// Size of the written output file in bytes.
    pub output_bytes: u64,
}

/// The result of a flattening run that produced an output document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlattenOutput {
    /// Where the flattened document was written.
    pub output_path: PathBuf,
    /// One record per output page, in page order.
    pub pages: Vec<PageRecord>,
    pub stats: FlattenStats,
}

impl FlattenOutput {
    /// True when at least one page is a placeholder rather than a render.
    pub fn is_partial(&self) -> bool {
        self.stats.failed_pages > 0
    }

    /// Treat a partial document as an error.
    ///
    /// Fully-rendered documents pass through unchanged; a document with
    /// placeholder pages becomes [`FlattenError::PartialFailure`]. The
    /// output file stays on disk either way.
    pub fn into_result(self) -> Result<FlattenOutput, FlattenError> {
        if self.is_partial() {
            Err(FlattenError::PartialFailure {
                success: self.stats.rendered_pages + self.stats.fallback_pages,
                failed: self.stats.failed_pages,
                total: self.stats.total_pages,
            })
        } else {
            Ok(self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output_with_failures(failed: usize) -> FlattenOutput {
        FlattenOutput {
            output_path: PathBuf::from("/tmp/out.pdf"),
            pages: vec![],
            stats: FlattenStats {
                total_pages: 3,
                rendered_pages: 3 - failed,
                failed_pages: failed,
                ..Default::default()
            },
        }
    }

    #[test]
    fn full_success_is_not_partial() {
        let out = output_with_failures(0);
        assert!(!out.is_partial());
        assert!(out.into_result().is_ok());
    }

    #[test]
    fn placeholder_pages_make_partial() {
        let out = output_with_failures(1);
        assert!(out.is_partial());
        match out.into_result() {
            Err(FlattenError::PartialFailure { failed, total, .. }) => {
                assert_eq!(failed, 1);
                assert_eq!(total, 3);
            }
            other => panic!("expected PartialFailure, got {other:?}"),
        }
    }

    #[test]
    fn page_status_serializes_with_reason() {
        let rec = PageRecord {
            page: 2,
            geometry: PageGeometry {
                width_pts: 612.0,
                height_pts: 792.0,
            },
            status: PageStatus::Failed {
                reason: "timeout".into(),
            },
        };
        let json = serde_json::to_string(&rec).unwrap();
        assert!(json.contains("\"status\":\"failed\""));
        assert!(json.contains("timeout"));

        let back: PageRecord = serde_json::from_str(&json).unwrap();
        assert!(!back.status.is_rendered());
    }
}
