//! Top-level flattening entry points and the per-document pipeline.
//!
//! The controller walks a fixed sequence of states per document:
//! validate → probe → render (primary pass, then a fallback pass for any
//! failed pages) → resolve the failure policy → encode/assemble → atomic
//! write. Every page reaches a terminal [`PageStatus`] before assembly
//! starts, and the output file appears only on full completion — a failed
//! or cancelled run leaves nothing at the output path.

use crate::config::{ColorMode, FailurePolicy, FlattenConfig};
use crate::error::{FlattenError, RenderError};
use crate::output::{
    DocumentInfo, FlattenOutput, FlattenStats, PageGeometry, PageRecord, PageStatus,
};
use crate::pipeline::store::{EncodedPage, PageStore};
use crate::pipeline::{assemble, encode, fallback, input, render};
use futures::stream::{self, StreamExt};
use image::DynamicImage;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A page with its terminal status and, when rendered, its image.
struct PageOutcome {
    index: usize,
    geometry: PageGeometry,
    image: Option<DynamicImage>,
    status: PageStatus,
}

/// Flatten a PDF: rasterise every page and write a new, image-only PDF.
///
/// This is the primary entry point for the library.
///
/// # Arguments
/// * `input`  — path to the source PDF (read-only, never modified)
/// * `output` — path for the flattened PDF (never the input path)
/// * `config` — flattening configuration
///
/// # Returns
/// `Ok(FlattenOutput)` whenever an output document was written. Under the
/// placeholder policy this includes partial documents — check
/// [`FlattenOutput::is_partial`] or use [`FlattenOutput::into_result`].
///
/// # Errors
/// Returns `Err(FlattenError)` for fatal conditions: unreadable input,
/// wrong password, write failure, cancellation, or a page failure under
/// the abort policy. No output file exists after an error.
pub async fn flatten(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    config: &FlattenConfig,
) -> Result<FlattenOutput, FlattenError> {
    let total_start = Instant::now();
    let input_path = input.as_ref().to_path_buf();
    let output_path = output.as_ref().to_path_buf();
    info!(
        "Flattening {} → {}",
        input_path.display(),
        output_path.display()
    );

    // ── Step 1: Validate input and output paths ──────────────────────────
    input::validate_source(&input_path)?;
    input::reject_in_place(&input_path, &output_path)?;

    // ── Step 2: Probe page count and geometry ────────────────────────────
    let doc_info = probe(
        &input_path,
        config.password.as_deref(),
        config.renderer.uses_primary(),
    )
    .await?;
    let total_pages = doc_info.page_count;
    info!("PDF has {} pages", total_pages);

    if let Some(ref cb) = config.progress_callback {
        cb.on_flatten_start(total_pages);
    }

    // ── Step 3: Render all pages (primary, then fallback) ────────────────
    let render_start = Instant::now();
    let outcomes = render_all_pages(&input_path, config, &doc_info).await?;
    let render_duration_ms = render_start.elapsed().as_millis() as u64;

    // ── Step 4: Resolve the failure policy ───────────────────────────────
    if let Some(failed) = outcomes.iter().find(|o| o.image.is_none()) {
        if config.on_page_failure == FailurePolicy::Abort {
            return Err(FlattenError::PageFailed {
                page: failed.index + 1,
                reason: status_reason(&failed.status),
            });
        }
    }

    let rendered = outcomes
        .iter()
        .filter(|o| o.status == PageStatus::Success)
        .count();
    let fallback_used = outcomes
        .iter()
        .filter(|o| o.status == PageStatus::FallbackUsed)
        .count();
    let failed = total_pages - rendered - fallback_used;

    if let Some(ref cb) = config.progress_callback {
        cb.on_flatten_complete(total_pages, rendered + fallback_used);
    }

    let records: Vec<PageRecord> = outcomes
        .iter()
        .map(|o| PageRecord {
            page: o.index + 1,
            geometry: o.geometry,
            status: o.status.clone(),
        })
        .collect();

    // ── Step 5: Encode, assemble, and publish atomically ─────────────────
    let assemble_start = Instant::now();
    let output_bytes = {
        let config = config.clone();
        let out_path = output_path.clone();
        tokio::task::spawn_blocking(move || encode_and_write(outcomes, &config, &out_path))
            .await
            .map_err(|e| FlattenError::Internal(format!("Assembly task panicked: {e}")))??
    };
    let assemble_duration_ms = assemble_start.elapsed().as_millis() as u64;

    let stats = FlattenStats {
        total_pages,
        rendered_pages: rendered,
        fallback_pages: fallback_used,
        failed_pages: failed,
        render_duration_ms,
        assemble_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
        output_bytes,
    };

    info!(
        "Flattened {}/{} pages in {}ms → {}",
        rendered + fallback_used,
        total_pages,
        stats.total_duration_ms,
        output_path.display()
    );

    Ok(FlattenOutput {
        output_path,
        pages: records,
        stats,
    })
}

/// Synchronous wrapper around [`flatten`].
///
/// Creates a temporary tokio runtime internally.
pub fn flatten_sync(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    config: &FlattenConfig,
) -> Result<FlattenOutput, FlattenError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| FlattenError::Internal(format!("Failed to create tokio runtime: {e}")))?
        .block_on(flatten(input, output, config))
}

/// Read page count and per-page geometry without rendering anything.
///
/// Works without a pdfium library installed, except for encrypted inputs,
/// which need pdfium to apply `password`.
pub async fn inspect(
    input: impl AsRef<Path>,
    password: Option<&str>,
) -> Result<DocumentInfo, FlattenError> {
    let path = input.as_ref().to_path_buf();
    input::validate_source(&path)?;
    probe(&path, password, true).await
}

/// Render every page to an individual PNG file in `dir`.
///
/// Files are named `page_1.png` … `page_N.png`. Uses the same renderer
/// chain and failure policy as [`flatten`]; under the placeholder policy a
/// failed page becomes a blank PNG.
pub async fn export_page_images(
    input: impl AsRef<Path>,
    dir: impl AsRef<Path>,
    config: &FlattenConfig,
) -> Result<FlattenOutput, FlattenError> {
    let total_start = Instant::now();
    let input_path = input.as_ref().to_path_buf();
    let dir = dir.as_ref().to_path_buf();

    input::validate_source(&input_path)?;

    let doc_info = probe(
        &input_path,
        config.password.as_deref(),
        config.renderer.uses_primary(),
    )
    .await?;
    let total_pages = doc_info.page_count;

    if let Some(ref cb) = config.progress_callback {
        cb.on_flatten_start(total_pages);
    }

    let render_start = Instant::now();
    let outcomes = render_all_pages(&input_path, config, &doc_info).await?;
    let render_duration_ms = render_start.elapsed().as_millis() as u64;

    if let Some(failed) = outcomes.iter().find(|o| o.image.is_none()) {
        if config.on_page_failure == FailurePolicy::Abort {
            return Err(FlattenError::PageFailed {
                page: failed.index + 1,
                reason: status_reason(&failed.status),
            });
        }
    }

    let rendered = outcomes
        .iter()
        .filter(|o| o.status == PageStatus::Success)
        .count();
    let fallback_used = outcomes
        .iter()
        .filter(|o| o.status == PageStatus::FallbackUsed)
        .count();
    let failed = total_pages - rendered - fallback_used;

    if let Some(ref cb) = config.progress_callback {
        cb.on_flatten_complete(total_pages, rendered + fallback_used);
    }

    let records: Vec<PageRecord> = outcomes
        .iter()
        .map(|o| PageRecord {
            page: o.index + 1,
            geometry: o.geometry,
            status: o.status.clone(),
        })
        .collect();

    let write_start = Instant::now();
    let output_bytes = {
        let config = config.clone();
        let dir = dir.clone();
        tokio::task::spawn_blocking(move || write_page_images(outcomes, &config, &dir))
            .await
            .map_err(|e| FlattenError::Internal(format!("Export task panicked: {e}")))??
    };

    let stats = FlattenStats {
        total_pages,
        rendered_pages: rendered,
        fallback_pages: fallback_used,
        failed_pages: failed,
        render_duration_ms,
        assemble_duration_ms: write_start.elapsed().as_millis() as u64,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
        output_bytes,
    };

    Ok(FlattenOutput {
        output_path: dir,
        pages: records,
        stats,
    })
}

// ── Internal pipeline ────────────────────────────────────────────────────

/// Probe the document structurally; for encrypted inputs, retry through
/// pdfium so the configured password is applied.
async fn probe(
    path: &Path,
    password: Option<&str>,
    pdfium_allowed: bool,
) -> Result<DocumentInfo, FlattenError> {
    let structural = {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || input::read_document_info(&path))
            .await
            .map_err(|e| FlattenError::Internal(format!("Probe task panicked: {e}")))?
    };

    match structural {
        Err(FlattenError::PasswordRequired { .. }) if pdfium_allowed && password.is_some() => {
            render::probe_document(path, password).await
        }
        other => other,
    }
}

/// Run the primary pass, then the fallback pass, giving every page a
/// terminal status.
async fn render_all_pages(
    input_path: &Path,
    config: &FlattenConfig,
    doc_info: &DocumentInfo,
) -> Result<Vec<PageOutcome>, FlattenError> {
    let total = doc_info.page_count;

    // ── Primary pass ─────────────────────────────────────────────────────
    let mut outcomes: Vec<PageOutcome> = if config.renderer.uses_primary() {
        render::render_document(input_path, config, doc_info)
            .await?
            .into_iter()
            .map(|page| match page.result {
                // success events were already fired from the render loop
                Ok(img) => PageOutcome {
                    index: page.index,
                    geometry: page.geometry,
                    image: Some(img),
                    status: PageStatus::Success,
                },
                Err(e) => {
                    warn!("Primary renderer failed on page {}: {}", page.index + 1, e);
                    if !config.renderer.uses_fallback() {
                        if let Some(ref cb) = config.progress_callback {
                            cb.on_page_error(page.index + 1, total, e.to_string());
                        }
                    }
                    PageOutcome {
                        index: page.index,
                        geometry: page.geometry,
                        image: None,
                        status: PageStatus::Failed {
                            reason: e.to_string(),
                        },
                    }
                }
            })
            .collect()
    } else {
        doc_info
            .pages
            .iter()
            .copied()
            .enumerate()
            .map(|(index, geometry)| PageOutcome {
                index,
                geometry,
                image: None,
                status: PageStatus::Failed {
                    reason: "primary renderer disabled".to_string(),
                },
            })
            .collect()
    };

    // ── Fallback pass ────────────────────────────────────────────────────
    if config.renderer.uses_fallback() {
        check_cancelled(config)?;

        let retry: Vec<(usize, PageGeometry)> = outcomes
            .iter()
            .filter(|o| o.image.is_none())
            .map(|o| (o.index, o.geometry))
            .collect();

        if !retry.is_empty() {
            debug!("Retrying {} pages with fallback tool", retry.len());
            let results = run_fallback_pass(input_path, config, retry, total).await;

            for (index, result) in results {
                let outcome = &mut outcomes[index];
                match result {
                    Ok(img) => {
                        if let Some(ref cb) = config.progress_callback {
                            cb.on_page_complete(index + 1, total, true);
                        }
                        outcome.image = Some(img);
                        outcome.status = PageStatus::FallbackUsed;
                    }
                    Err(e) => {
                        warn!("Fallback renderer failed on page {}: {}", index + 1, e);
                        let reason = combine_reasons(&outcome.status, &e, config);
                        if let Some(ref cb) = config.progress_callback {
                            cb.on_page_error(index + 1, total, reason.clone());
                        }
                        outcome.status = PageStatus::Failed { reason };
                    }
                }
            }
        }
    }

    check_cancelled(config)?;
    Ok(outcomes)
}

/// Invoke the external tool for each page, a few at a time.
///
/// Completion order is arbitrary; the caller re-indexes results, and the
/// page store guarantees output order regardless.
async fn run_fallback_pass(
    input_path: &Path,
    config: &FlattenConfig,
    pages: Vec<(usize, PageGeometry)>,
    total: usize,
) -> Vec<(usize, Result<DynamicImage, RenderError>)> {
    stream::iter(pages.into_iter().map(|(index, geometry)| {
        let path = input_path.to_path_buf();
        let config = config.clone();
        async move {
            if let Some(ref cb) = config.progress_callback {
                cb.on_page_start(index + 1, total);
            }
            let (px_w, px_h) = render::target_pixels(&geometry, &config);
            let result = tokio::task::spawn_blocking(move || {
                fallback::render_page_with_tool(
                    &config.fallback_tool,
                    &path,
                    index,
                    px_w,
                    px_h,
                    config.color_mode == ColorMode::Grayscale,
                    config.password.as_deref(),
                    Duration::from_secs(config.page_timeout_secs),
                )
            })
            .await
            .unwrap_or_else(|e| {
                Err(RenderError::ToolFailed {
                    page: index + 1,
                    status: "task panicked".to_string(),
                    stderr: e.to_string(),
                })
            });
            (index, result)
        }
    }))
    .buffer_unordered(config.concurrency)
    .collect()
    .await
}

/// Encode every page (substituting placeholders for failures), assemble the
/// document, and publish it atomically. Returns the output size in bytes.
fn encode_and_write(
    outcomes: Vec<PageOutcome>,
    config: &FlattenConfig,
    output_path: &Path,
) -> Result<u64, FlattenError> {
    let mut store = PageStore::new();

    for outcome in outcomes {
        let page_num = outcome.index + 1;
        let img = match outcome.image {
            Some(img) => img,
            None => placeholder_image(&outcome.geometry, config),
        };
        let encoded =
            encode::encode_page(&img, config).map_err(|detail| FlattenError::EncodingFailed {
                page: page_num,
                detail,
            })?;
        store.append(EncodedPage {
            index: outcome.index,
            geometry: outcome.geometry,
            image: encoded,
        });
    }

    let pages = store.drain();
    let bytes = assemble::build_document(&pages)?;
    let size = bytes.len() as u64;
    assemble::write_atomic(output_path, &bytes)?;
    Ok(size)
}

/// Save every page as `page_<n>.png` under `dir`. Returns total bytes written.
fn write_page_images(
    outcomes: Vec<PageOutcome>,
    config: &FlattenConfig,
    dir: &Path,
) -> Result<u64, FlattenError> {
    std::fs::create_dir_all(dir).map_err(|e| FlattenError::OutputWriteFailed {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut total_bytes = 0u64;
    for outcome in outcomes {
        let path = dir.join(format!("page_{}.png", outcome.index + 1));
        let img = match outcome.image {
            Some(img) => img,
            None => placeholder_image(&outcome.geometry, config),
        };
        let img = match config.color_mode {
            ColorMode::Rgb => DynamicImage::ImageRgb8(img.to_rgb8()),
            ColorMode::Grayscale => DynamicImage::ImageLuma8(img.to_luma8()),
        };
        img.save_with_format(&path, image::ImageFormat::Png)
            .map_err(|e| FlattenError::EncodingFailed {
                page: outcome.index + 1,
                detail: e.to_string(),
            })?;
        total_bytes += std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
    }
    Ok(total_bytes)
}

/// Blank white substitute at the same pixel size a render would have had.
fn placeholder_image(geometry: &PageGeometry, config: &FlattenConfig) -> DynamicImage {
    let (w, h) = render::target_pixels(geometry, config);
    DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        w,
        h,
        image::Rgb([255, 255, 255]),
    ))
}

fn check_cancelled(config: &FlattenConfig) -> Result<(), FlattenError> {
    if let Some(ref flag) = config.cancel_flag {
        if flag.load(Ordering::SeqCst) {
            return Err(FlattenError::Cancelled);
        }
    }
    Ok(())
}

fn status_reason(status: &PageStatus) -> String {
    match status {
        PageStatus::Failed { reason } => reason.clone(),
        _ => "unknown".to_string(),
    }
}

/// Fold the primary and fallback failures into one page reason.
fn combine_reasons(prior: &PageStatus, fallback_err: &RenderError, config: &FlattenConfig) -> String {
    match prior {
        PageStatus::Failed { reason } if config.renderer.uses_primary() => {
            format!("primary: {reason}; fallback: {fallback_err}")
        }
        _ => fallback_err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RendererPreference;

    #[test]
    fn placeholder_matches_render_dimensions() {
        let config = FlattenConfig::builder().dpi(144).build().unwrap();
        let geometry = PageGeometry {
            width_pts: 612.0,
            height_pts: 792.0,
        };
        let img = placeholder_image(&geometry, &config);
        assert_eq!((img.width(), img.height()), (1224, 1584));
    }

    #[test]
    fn combined_reason_keeps_both_failures() {
        let config = FlattenConfig::default();
        let prior = PageStatus::Failed {
            reason: "renderer crashed".to_string(),
        };
        let err = RenderError::Timeout { page: 2, secs: 60 };
        let reason = combine_reasons(&prior, &err, &config);
        assert!(reason.contains("renderer crashed"));
        assert!(reason.contains("timed out"));
    }

    #[test]
    fn fallback_only_reason_is_just_the_tool_error() {
        let config = FlattenConfig::builder()
            .renderer(RendererPreference::FallbackOnly)
            .build()
            .unwrap();
        let prior = PageStatus::Failed {
            reason: "primary renderer disabled".to_string(),
        };
        let err = RenderError::ToolUnavailable {
            tool: "pdftoppm".to_string(),
        };
        let reason = combine_reasons(&prior, &err, &config);
        assert!(!reason.contains("disabled"));
        assert!(reason.contains("pdftoppm"));
    }

    #[test]
    fn cancel_flag_aborts_between_iterations() {
        let flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true));
        let config = FlattenConfig::builder().cancel_flag(flag).build().unwrap();
        assert!(matches!(
            check_cancelled(&config),
            Err(FlattenError::Cancelled)
        ));
    }
}
