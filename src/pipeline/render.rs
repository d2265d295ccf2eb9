//! Primary rasterisation: render pages to `DynamicImage` via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async
//! contexts. `tokio::task::spawn_blocking` moves the work onto a dedicated
//! thread pool thread designed for blocking operations, and the whole
//! document is rendered inside a single blocking call so pdfium never sees
//! two threads.
//!
//! ## Geometry and rotation
//!
//! Target pixel sizes derive from the probed page geometry
//! (`ceil(points × dpi/72)`, longest edge capped), which keeps the raster
//! aspect ratio equal to the page aspect ratio by construction. The probe
//! folds each page's intrinsic `/Rotate` into its dimensions, and pdfium
//! applies the same rotation while drawing, so the raster comes out upright
//! exactly as a viewer would show the page.

use crate::config::FlattenConfig;
use crate::error::{FlattenError, RenderError};
use crate::output::{DocumentInfo, PageGeometry};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::Path;
use std::sync::atomic::Ordering;
use tracing::{debug, info};

/// Outcome of one primary-render attempt.
pub struct RenderedPage {
    /// 0-based page index.
    pub index: usize,
    pub geometry: PageGeometry,
    pub result: Result<DynamicImage, RenderError>,
}

/// Compute the output pixel dimensions for a page.
///
/// `ceil(points × scale)` on both axes, then a proportional shrink when the
/// longest edge exceeds the configured cap. Shared by both renderers so a
/// fallback-rendered page is pixel-for-pixel the same size as a primary one.
pub(crate) fn target_pixels(geometry: &PageGeometry, config: &FlattenConfig) -> (u32, u32) {
    let scale = config.scale();
    let mut w = (geometry.width_pts * scale).ceil().max(1.0);
    let mut h = (geometry.height_pts * scale).ceil().max(1.0);

    let cap = config.max_render_pixels as f32;
    let longest = w.max(h);
    if longest > cap {
        let ratio = cap / longest;
        w = (w * ratio).round().max(1.0);
        h = (h * ratio).round().max(1.0);
    }

    (w as u32, h as u32)
}

/// Render every page of the document, capturing per-page failures.
///
/// Returns one [`RenderedPage`] per source page, in page order. A page-level
/// pdfium error never aborts the document — it is recorded in the page's
/// `result` for the fallback pass to pick up. Rendering is deterministic for
/// a fixed (document, page, pixel size) and never mutates the source.
pub async fn render_document(
    pdf_path: &Path,
    config: &FlattenConfig,
    info: &DocumentInfo,
) -> Result<Vec<RenderedPage>, FlattenError> {
    let path = pdf_path.to_path_buf();
    let config = config.clone();
    let info = info.clone();

    tokio::task::spawn_blocking(move || render_document_blocking(&path, &config, &info))
        .await
        .map_err(|e| FlattenError::Internal(format!("Render task panicked: {e}")))?
}

fn render_document_blocking(
    pdf_path: &Path,
    config: &FlattenConfig,
    info: &DocumentInfo,
) -> Result<Vec<RenderedPage>, FlattenError> {
    let pdfium = bind_pdfium()?;
    let document = open_document(&pdfium, pdf_path, config.password.as_deref())?;

    let pages = document.pages();
    let total = info.page_count;
    info!("Rendering {} pages at {} DPI", total, config.dpi);

    let mut results = Vec::with_capacity(total);

    for index in 0..total {
        if let Some(ref flag) = config.cancel_flag {
            if flag.load(Ordering::SeqCst) {
                return Err(FlattenError::Cancelled);
            }
        }

        if let Some(ref cb) = config.progress_callback {
            cb.on_page_start(index + 1, total);
        }

        let geometry = info.pages[index];
        let (px_w, px_h) = target_pixels(&geometry, config);

        let result = render_one_page(&pages, index, px_w, px_h);
        if let Ok(ref img) = result {
            debug!("Rendered page {} → {}x{} px", index + 1, img.width(), img.height());
            if let Some(ref cb) = config.progress_callback {
                cb.on_page_complete(index + 1, total, false);
            }
        }

        results.push(RenderedPage {
            index,
            geometry,
            result,
        });
    }

    Ok(results)
}

fn render_one_page(
    pages: &PdfPages<'_>,
    index: usize,
    px_w: u32,
    px_h: u32,
) -> Result<DynamicImage, RenderError> {
    let page = pages.get(index as u16).map_err(|e| RenderError::Corrupt {
        page: index + 1,
        detail: format!("{e:?}"),
    })?;

    let render_config = PdfRenderConfig::new()
        .set_target_width(px_w as i32)
        .set_target_height(px_h as i32);

    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| RenderError::Unsupported {
            page: index + 1,
            detail: format!("{e:?}"),
        })?;

    Ok(bitmap.as_image())
}

/// Probe page count and visual geometry through pdfium.
///
/// The structural probe (`lopdf`) cannot open encrypted documents; pdfium
/// applies the password. Raw pdfium page sizes do not fold in `/Rotate`, so
/// 90°/270° pages swap width and height here, matching the structural probe.
pub async fn probe_document(
    pdf_path: &Path,
    password: Option<&str>,
) -> Result<DocumentInfo, FlattenError> {
    let path = pdf_path.to_path_buf();
    let pwd = password.map(str::to_string);

    tokio::task::spawn_blocking(move || probe_document_blocking(&path, pwd.as_deref()))
        .await
        .map_err(|e| FlattenError::Internal(format!("Probe task panicked: {e}")))?
}

fn probe_document_blocking(
    pdf_path: &Path,
    password: Option<&str>,
) -> Result<DocumentInfo, FlattenError> {
    let pdfium = bind_pdfium()?;
    let document = open_document(&pdfium, pdf_path, password)?;

    let mut geometry = Vec::new();
    for page in document.pages().iter() {
        let (w, h) = (page.width().value, page.height().value);
        let swapped = matches!(
            page.rotation(),
            Ok(PdfPageRenderRotation::Degrees90 | PdfPageRenderRotation::Degrees270)
        );
        geometry.push(if swapped {
            PageGeometry {
                width_pts: h,
                height_pts: w,
            }
        } else {
            PageGeometry {
                width_pts: w,
                height_pts: h,
            }
        });
    }

    debug!(
        "Probed {} via pdfium: {} pages",
        pdf_path.display(),
        geometry.len()
    );

    Ok(DocumentInfo {
        page_count: geometry.len(),
        pdf_version: format!("{:?}", document.version()),
        pages: geometry,
    })
}

fn bind_pdfium() -> Result<Pdfium, FlattenError> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| FlattenError::PdfiumBindingFailed(format!("{e:?}")))?;
    Ok(Pdfium::new(bindings))
}

fn open_document<'a>(
    pdfium: &'a Pdfium,
    pdf_path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, FlattenError> {
    pdfium.load_pdf_from_file(pdf_path, password).map_err(|e| {
        let err_str = format!("{e:?}");
        if err_str.contains("Password") || err_str.contains("password") {
            if password.is_some() {
                FlattenError::WrongPassword {
                    path: pdf_path.to_path_buf(),
                }
            } else {
                FlattenError::PasswordRequired {
                    path: pdf_path.to_path_buf(),
                }
            }
        } else {
            FlattenError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: err_str,
            }
        }
    })
}
