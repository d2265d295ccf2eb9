//! Progress-callback trait for per-page pipeline events.
//!
//! Inject an [`Arc<dyn FlattenProgressCallback>`] via
//! [`crate::config::FlattenConfigBuilder::progress_callback`] to receive
//! real-time events as pages reach terminal status.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers
//! can forward events to a terminal progress bar, a channel, or a log sink
//! without the library knowing anything about how the host application
//! communicates. The trait is `Send + Sync` because fallback renders run
//! concurrently and report completion from different tasks.

use std::sync::Arc;

/// Called by the pipeline as it processes each page.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
///
/// # Thread safety
///
/// `on_page_complete` and `on_page_error` may be called concurrently from
/// different threads during the fallback phase. Implementations must protect
/// shared mutable state with appropriate synchronisation primitives.
pub trait FlattenProgressCallback: Send + Sync {
    /// Called once after the document is opened, before any page is rendered.
    fn on_flatten_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before a page render is attempted.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page reaches a rendered state.
    ///
    /// `used_fallback` is true when the external tool produced the page.
    fn on_page_complete(&self, page_num: usize, total_pages: usize, used_fallback: bool) {
        let _ = (page_num, total_pages, used_fallback);
    }

    /// Called when a page fails every configured renderer.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: String) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after all pages have a terminal status, before assembly.
    fn on_flatten_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl FlattenProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::FlattenConfig`].
pub type ProgressCallback = Arc<dyn FlattenProgressCallback>;
