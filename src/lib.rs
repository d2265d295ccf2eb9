//! # pdf-flatten
//!
//! Strip the embedded text layer from PDF documents by rasterising every
//! page and rebuilding the file as pure images.
//!
//! ## Why this crate?
//!
//! OCR'd archives and exported documents carry an invisible text layer on
//! top of the page image. That layer makes the file searchable — and also
//! copyable, indexable, and scrapable, which is exactly wrong for
//! documents that must be shared as-seen (redacted records, exam papers,
//! signed contracts). Flattening renders each page to pixels and assembles
//! a new PDF that is visually identical but contains zero extractable text.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input     validate path and %PDF magic, probe page geometry
//!  ├─ 2. Render    rasterise pages via pdfium (CPU-bound, spawn_blocking)
//!  │     └─ on a page failure: external tool (pdftoppm), same pixel size
//!  ├─ 3. Encode    JPEG or zlib-compressed samples, RGB or grayscale
//!  ├─ 4. Store     re-order pages by index after concurrent completion
//!  ├─ 5. Assemble  one image XObject per page, MediaBox from the source
//!  └─ 6. Output    write to a temp file, rename into place atomically
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf_flatten::{flatten, FlattenConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = FlattenConfig::default();
//!     let output = flatten("scan.pdf", "scan-flat.pdf", &config).await?;
//!     eprintln!(
//!         "{} pages ({} via fallback) → {}",
//!         output.stats.total_pages,
//!         output.stats.fallback_pages,
//!         output.output_path.display()
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Renderers
//!
//! The primary renderer is pdfium (via `pdfium-render`); a page the
//! primary renderer cannot handle is retried with an external
//! `pdftoppm`-style tool at identical pixel dimensions. Either renderer can
//! be disabled through [`RendererPreference`] — a machine without a pdfium
//! library can run fallback-only, and a machine without poppler can run
//! primary-only.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfflatten` binary (clap + anyhow + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only
//! deps:
//! ```toml
//! pdf-flatten = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod flatten;
pub mod output;
pub mod pipeline;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ColorMode, FailurePolicy, FlattenConfig, FlattenConfigBuilder, ImageFormat,
    RendererPreference,
};
pub use error::{FlattenError, RenderError};
pub use flatten::{export_page_images, flatten, flatten_sync, inspect};
pub use output::{
    DocumentInfo, FlattenOutput, FlattenStats, PageGeometry, PageRecord, PageStatus,
};
pub use progress::{FlattenProgressCallback, NoopProgressCallback, ProgressCallback};
