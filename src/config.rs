//! Configuration types for PDF flattening.
//!
//! All behaviour is controlled through [`FlattenConfig`], built via its
//! [`FlattenConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share configs across threads, serialise them for logging, and
//! run several documents concurrently with different settings without any
//! ambient global state.

use crate::error::FlattenError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Configuration for a flattening run.
///
/// Built via [`FlattenConfig::builder()`] or [`FlattenConfig::default()`].
///
/// # Example
/// ```rust
/// use pdf_flatten::{FlattenConfig, ImageFormat};
///
/// let config = FlattenConfig::builder()
///     .dpi(150)
///     .image_format(ImageFormat::Png)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct FlattenConfig {
    /// Rendering DPI used when rasterising each page. Range: 72–600. Default: 200.
    ///
    /// 200 DPI keeps scanned-document text crisp while the embedded JPEGs
    /// stay well below the size of a 300-DPI render. Drop to 150 for
    /// screen-only output; raise to 300 when the result will be printed.
    pub dpi: u32,

    /// Maximum rendered page dimension (width or height) in pixels. Default: 8000.
    ///
    /// A safety cap independent of DPI. A 300-DPI render of an A0 poster
    /// would produce a 14 000 × 20 000 px image and exhaust memory. When the
    /// cap bites, both dimensions scale down proportionally so the aspect
    /// ratio of the page is untouched.
    pub max_render_pixels: u32,

    /// Compression used for the embedded page images. Default: JPEG.
    pub image_format: ImageFormat,

    /// JPEG quality 1–100, used when `image_format` is JPEG. Default: 85.
    ///
    /// 85 is visually indistinguishable from lossless for rendered page
    /// content at 200 DPI while cutting file size roughly 10×.
    pub jpeg_quality: u8,

    /// Colour mode of the output pages. Default: RGB.
    pub color_mode: ColorMode,

    /// What to do when a page fails every configured renderer. Default: abort.
    pub on_page_failure: FailurePolicy,

    /// Which renderers to use, and in what order. Default: primary, then fallback.
    pub renderer: RendererPreference,

    /// Name or path of the external fallback renderer. Default: "pdftoppm".
    pub fallback_tool: String,

    /// Timeout for a single fallback-tool invocation in seconds. Default: 60.
    ///
    /// A timed-out invocation is killed and the page fails with
    /// [`crate::RenderError::Timeout`]; no child process is ever left
    /// running.
    pub page_timeout_secs: u64,

    /// Number of concurrent fallback-tool invocations. Default: 4.
    ///
    /// Fallback renders are independent subprocesses, so running a few in
    /// parallel hides their startup latency. Output order is restored by
    /// page index afterwards, so this never affects the document.
    pub concurrency: usize,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Progress callback fired as pages reach terminal status.
    pub progress_callback: Option<ProgressCallback>,

    /// Cooperative cancellation flag, checked between page iterations.
    ///
    /// Setting the flag aborts the run with [`crate::FlattenError::Cancelled`]
    /// before the next page starts; an in-flight page render is allowed to
    /// finish. No output file is written on cancellation.
    pub cancel_flag: Option<Arc<AtomicBool>>,
}

impl Default for FlattenConfig {
    fn default() -> Self {
        Self {
            dpi: 200,
            max_render_pixels: 8000,
            image_format: ImageFormat::default(),
            jpeg_quality: 85,
            color_mode: ColorMode::default(),
            on_page_failure: FailurePolicy::default(),
            renderer: RendererPreference::default(),
            fallback_tool: "pdftoppm".to_string(),
            page_timeout_secs: 60,
            concurrency: 4,
            password: None,
            progress_callback: None,
            cancel_flag: None,
        }
    }
}

impl fmt::Debug for FlattenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlattenConfig")
            .field("dpi", &self.dpi)
            .field("max_render_pixels", &self.max_render_pixels)
            .field("image_format", &self.image_format)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("color_mode", &self.color_mode)
            .field("on_page_failure", &self.on_page_failure)
            .field("renderer", &self.renderer)
            .field("fallback_tool", &self.fallback_tool)
            .field("page_timeout_secs", &self.page_timeout_secs)
            .field("concurrency", &self.concurrency)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn callback>"),
            )
            .field("cancel_flag", &self.cancel_flag.is_some())
            .finish()
    }
}

impl FlattenConfig {
    /// Create a new builder for `FlattenConfig`.
    pub fn builder() -> FlattenConfigBuilder {
        FlattenConfigBuilder {
            config: Self::default(),
        }
    }

    /// Scale factor from page points (1/72 in) to output pixels.
    pub(crate) fn scale(&self) -> f32 {
        self.dpi as f32 / 72.0
    }
}

/// Builder for [`FlattenConfig`].
#[derive(Debug)]
pub struct FlattenConfigBuilder {
    config: FlattenConfig,
}

impl FlattenConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn max_render_pixels(mut self, px: u32) -> Self {
        self.config.max_render_pixels = px.max(100);
        self
    }

    pub fn image_format(mut self, format: ImageFormat) -> Self {
        self.config.image_format = format;
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn color_mode(mut self, mode: ColorMode) -> Self {
        self.config.color_mode = mode;
        self
    }

    pub fn on_page_failure(mut self, policy: FailurePolicy) -> Self {
        self.config.on_page_failure = policy;
        self
    }

    pub fn renderer(mut self, preference: RendererPreference) -> Self {
        self.config.renderer = preference;
        self
    }

    pub fn fallback_tool(mut self, tool: impl Into<String>) -> Self {
        self.config.fallback_tool = tool.into();
        self
    }

    pub fn page_timeout_secs(mut self, secs: u64) -> Self {
        self.config.page_timeout_secs = secs.max(1);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.config.cancel_flag = Some(flag);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<FlattenConfig, FlattenError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 600 {
            return Err(FlattenError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.jpeg_quality == 0 || c.jpeg_quality > 100 {
            return Err(FlattenError::InvalidConfig(format!(
                "JPEG quality must be 1–100, got {}",
                c.jpeg_quality
            )));
        }
        if c.fallback_tool.is_empty() {
            return Err(FlattenError::InvalidConfig(
                "Fallback tool name must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Compression used for the page images embedded in the output PDF.
///
/// JPEG is the default because flattened documents are usually archived in
/// bulk and the lossy artefacts are invisible at 200 DPI. PNG keeps the
/// samples lossless (stored zlib-compressed in the PDF) at several times
/// the size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// Lossy DCT compression, tunable via `jpeg_quality`. (default)
    #[default]
    Jpeg,
    /// Lossless: raw samples, zlib-compressed. PNG files in image-export mode.
    Png,
}

/// Colour mode of the rendered pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    /// Full-colour output. (default)
    #[default]
    Rgb,
    /// Single-channel output; roughly a third of the RGB size.
    Grayscale,
}

/// What happens when a page fails both the primary and fallback renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Abort the whole document; no output file is written. (default)
    #[default]
    Abort,
    /// Substitute a blank page of the correct size and flag it in the result.
    Placeholder,
}

/// Which renderers the pipeline may use for a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RendererPreference {
    /// Try the in-process renderer; on a page failure, retry that page with
    /// the external tool. (default)
    #[default]
    PrimaryThenFallback,
    /// In-process renderer only; a page failure goes straight to the policy.
    PrimaryOnly,
    /// External tool only. Useful when no pdfium library is installed.
    FallbackOnly,
}

impl RendererPreference {
    /// Whether the in-process renderer participates at all.
    pub(crate) fn uses_primary(self) -> bool {
        !matches!(self, RendererPreference::FallbackOnly)
    }

    /// Whether a failed page may be retried with the external tool.
    pub(crate) fn uses_fallback(self) -> bool {
        !matches!(self, RendererPreference::PrimaryOnly)
    }
}
