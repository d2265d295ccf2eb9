//! Error types for the pdf-flatten library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`FlattenError`] — **Fatal**: the run cannot produce an output document
//!   at all (unreadable input, bad password, write failure, or a page
//!   failure under the abort policy). Returned as `Err(FlattenError)` from
//!   the top-level `flatten*` functions. A fatal error never leaves a file
//!   at the output path.
//!
//! * [`RenderError`] — **Page-local**: one page could not be rendered by one
//!   renderer. The pipeline absorbs these: a primary-renderer failure
//!   triggers the fallback renderer, and a second failure is resolved by the
//!   configured failure policy (abort the document, or substitute a
//!   placeholder page and flag it in the result).
//!
//! The separation keeps the retry/fallback policy visible as data rather
//! than control flow: every page ends up with a terminal
//! [`crate::output::PageStatus`] and callers can inspect exactly which
//! renderer served which page.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdf-flatten library.
///
/// Page-level failures use [`RenderError`] and are resolved by the failure
/// policy rather than propagated here (except as [`FlattenError::PageFailed`]
/// under the abort policy).
#[derive(Debug, Error)]
pub enum FlattenError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// Output path would overwrite the input document in place.
    #[error("Output path '{path}' is the input file.\nFlattening never overwrites the source; choose a different output path.")]
    OutputClobbersInput { path: PathBuf },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be opened.
    #[error("PDF '{path}' is corrupt: {detail}\nTry repairing with: qpdf input.pdf repaired.pdf")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    // ── Page-failure verdicts ─────────────────────────────────────────────
    /// A page failed every configured renderer and the abort policy is in
    /// effect. No output file is written.
    #[error("Page {page} could not be rendered by any configured renderer: {reason}\nNo output was written. Use the placeholder policy to emit a blank page instead.")]
    PageFailed { page: usize, reason: String },

    /// Some pages are placeholders in an otherwise-written output.
    ///
    /// Returned by [`crate::output::FlattenOutput::into_result`] when the
    /// caller wants to treat a partial document as an error.
    #[error("{failed}/{total} pages are placeholders in the output document")]
    PartialFailure {
        success: usize,
        failed: usize,
        total: usize,
    },

    /// The run was cancelled via the configured cancel flag.
    /// No output file is written.
    #[error("Flattening was cancelled before completion")]
    Cancelled,

    // ── Output errors ─────────────────────────────────────────────────────
    /// A rendered page could not be compressed for embedding.
    #[error("Failed to encode page {page} for embedding: {detail}")]
    EncodingFailed { page: usize, detail: String },

    /// Could not create or write the output PDF file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install pdfium (e.g. from bblanchon/pdfium-binaries) and either place it\n\
on the loader path or set PDFIUM_DYNAMIC_LIB_PATH=/path/to/dir.\n\
Alternatively run with --renderer fallback-only to use the external tool.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A page-local rendering failure.
///
/// Recoverable: the pipeline retries the page with the fallback renderer,
/// and only escalates per the configured failure policy. Stored in
/// [`crate::output::PageStatus::Failed`] so results serialize cleanly.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum RenderError {
    /// The renderer could not draw this page's content.
    #[error("Page {page}: renderer could not draw this page: {detail}")]
    Unsupported { page: usize, detail: String },

    /// The page object itself is damaged.
    #[error("Page {page}: page data is corrupt: {detail}")]
    Corrupt { page: usize, detail: String },

    /// Rendering exceeded the per-page timeout.
    #[error("Page {page}: rendering timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },

    /// The external fallback tool is not installed or not on PATH.
    #[error("Fallback tool '{tool}' not found.\nInstall poppler-utils or point --fallback-tool at the executable.")]
    ToolUnavailable { tool: String },

    /// The external fallback tool ran but exited unsuccessfully.
    #[error("Page {page}: fallback tool exited with {status}: {stderr}")]
    ToolFailed {
        page: usize,
        status: String,
        stderr: String,
    },
}
