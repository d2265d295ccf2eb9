//! Pipeline stages for PDF flattening.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (e.g. switch rendering backend) without touching
//! other stages.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ store ──▶ assemble
//! (path)   (pdfium)   (jpeg/     (order    (lopdf → output.pdf)
//!             │         flate)    by idx)
//!             └─▶ fallback
//!                 (pdftoppm)
//! ```
//!
//! 1. [`input`]    — validate the source path and PDF magic bytes
//! 2. [`render`]   — rasterise pages via pdfium; runs in `spawn_blocking`
//!    because pdfium is not async-safe
//! 3. [`fallback`] — external-tool renderer for pages the primary path
//!    failed on (or all pages when so configured)
//! 4. [`encode`]   — compress each rendered page for embedding
//! 5. [`store`]    — re-establish page order after concurrent completion
//! 6. [`assemble`] — build the image-only output document and publish it
//!    atomically

pub mod assemble;
pub mod encode;
pub mod fallback;
pub mod input;
pub mod render;
pub mod store;
