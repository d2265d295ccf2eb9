//! End-to-end tests for pdf-flatten.
//!
//! The structural tests build small synthetic PDFs in-memory and run the
//! full pipeline with renderers that need no native libraries, so they
//! always run. Tests that exercise a real renderer (pdfium, pdftoppm) are
//! gated behind the `E2E_ENABLED` environment variable so they do not run
//! in CI unless explicitly requested.
//!
//! Run everything with:
//!   E2E_ENABLED=1 cargo test --test flatten -- --nocapture

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, Stream};
use pdf_flatten::{
    flatten, inspect, FailurePolicy, FlattenConfig, FlattenError, ImageFormat, PageStatus,
    RendererPreference,
};
use std::path::{Path, PathBuf};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Description of one synthetic page: width/height in points plus /Rotate.
struct TestPage {
    width: f32,
    height: f32,
    rotate: i64,
}

impl TestPage {
    fn new(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            rotate: 0,
        }
    }

    fn rotated(width: f32, height: f32, rotate: i64) -> Self {
        Self {
            width,
            height,
            rotate,
        }
    }
}

/// Build a small text-bearing PDF with the given pages.
fn create_test_pdf(pages: &[TestPage]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let page_tree_id = doc.new_object_id();

    let font_id = doc.add_object(Dictionary::from_iter([
        ("Type", Object::Name(b"Font".to_vec())),
        ("Subtype", Object::Name(b"Type1".to_vec())),
        ("BaseFont", Object::Name(b"Helvetica".to_vec())),
    ]));

    let resources_id = doc.add_object(Dictionary::from_iter([(
        "Font",
        Object::Dictionary(Dictionary::from_iter([("F1", Object::Reference(font_id))])),
    )]));

    let mut kids = Vec::new();
    for (i, page) in pages.iter().enumerate() {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![72.into(), 72.into()]),
                Operation::new(
                    "Tj",
                    vec![Object::string_literal(format!("Searchable text on page {}", i + 1))],
                ),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            Dictionary::new(),
            content.encode().expect("encode content"),
        ));

        let mut page_dict = Dictionary::from_iter([
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(page_tree_id)),
            ("Contents", Object::Reference(content_id)),
            ("Resources", Object::Reference(resources_id)),
            (
                "MediaBox",
                Object::Array(vec![
                    0.into(),
                    0.into(),
                    Object::Real(page.width),
                    Object::Real(page.height),
                ]),
            ),
        ]);
        if page.rotate != 0 {
            page_dict.set("Rotate", Object::Integer(page.rotate));
        }
        kids.push(Object::Reference(doc.add_object(page_dict)));
    }

    let page_count = pages.len() as i64;
    doc.objects.insert(
        page_tree_id,
        Object::Dictionary(Dictionary::from_iter([
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Kids", Object::Array(kids)),
            ("Count", Object::Integer(page_count)),
        ])),
    );

    let catalog_id = doc.add_object(Dictionary::from_iter([
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(page_tree_id)),
    ]));
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("save test PDF");
    bytes
}

fn write_test_pdf(dir: &Path, name: &str, pages: &[TestPage]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, create_test_pdf(pages)).expect("write test PDF");
    path
}

/// Config that runs without any native renderer installed: fallback-only
/// with a tool name that cannot exist.
fn no_renderer_config(policy: FailurePolicy) -> FlattenConfig {
    FlattenConfig::builder()
        .renderer(RendererPreference::FallbackOnly)
        .fallback_tool("pdftoppm-missing-for-tests")
        .on_page_failure(policy)
        .build()
        .expect("valid config")
}

fn media_boxes(pdf_bytes: &[u8]) -> Vec<[f32; 4]> {
    let doc = Document::load_mem(pdf_bytes).expect("valid output PDF");
    let pages = doc.get_pages();
    let mut boxes = Vec::new();
    for page_num in 1..=pages.len() as u32 {
        let page = doc
            .get_object(pages[&page_num])
            .unwrap()
            .as_dict()
            .unwrap();
        let arr = page.get(b"MediaBox").unwrap().as_array().unwrap();
        let v: Vec<f32> = arr
            .iter()
            .map(|o| match o {
                Object::Integer(i) => *i as f32,
                Object::Real(r) => *r,
                _ => panic!("non-numeric MediaBox entry"),
            })
            .collect();
        boxes.push([v[0], v[1], v[2], v[3]]);
    }
    boxes
}

/// Skip this test unless E2E_ENABLED is set.
macro_rules! e2e_skip_unless_enabled {
    () => {
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP — set E2E_ENABLED=1 to run renderer e2e tests");
            return;
        }
    };
}

// ── Inspect tests (no renderer needed, always run) ───────────────────────────

#[tokio::test]
async fn inspect_reports_count_and_geometry() {
    let dir = tempfile::TempDir::new().unwrap();
    let pdf = write_test_pdf(
        dir.path(),
        "mixed.pdf",
        &[
            TestPage::new(595.0, 842.0),            // A4
            TestPage::new(612.0, 792.0),            // Letter
            TestPage::rotated(595.0, 842.0, 90),    // A4 rotated
        ],
    );

    let info = inspect(&pdf, None).await.expect("inspect must succeed");
    assert_eq!(info.page_count, 3);
    assert_eq!(info.pages[0].width_pts, 595.0);
    assert_eq!(info.pages[1].width_pts, 612.0);
    // rotation folded into visual dimensions
    assert_eq!(info.pages[2].width_pts, 842.0);
    assert_eq!(info.pages[2].height_pts, 595.0);
}

#[tokio::test]
async fn inspect_nonexistent_file_fails() {
    let result = inspect("/definitely/not/a/real/file.pdf", None).await;
    assert!(matches!(result, Err(FlattenError::FileNotFound { .. })));
}

#[tokio::test]
async fn inspect_rejects_non_pdf() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("fake.pdf");
    std::fs::write(&path, b"PK\x03\x04 this is a zip").unwrap();

    let result = inspect(&path, None).await;
    assert!(matches!(result, Err(FlattenError::NotAPdf { .. })));
}

// ── Failure-policy tests (no renderer needed, always run) ────────────────────

#[tokio::test]
async fn abort_policy_writes_nothing_when_all_renderers_fail() {
    let dir = tempfile::TempDir::new().unwrap();
    let pdf = write_test_pdf(dir.path(), "doc.pdf", &[TestPage::new(612.0, 792.0)]);
    let out = dir.path().join("doc-flat.pdf");

    let result = flatten(&pdf, &out, &no_renderer_config(FailurePolicy::Abort)).await;

    match result {
        Err(FlattenError::PageFailed { page, reason }) => {
            assert_eq!(page, 1);
            assert!(reason.contains("pdftoppm-missing-for-tests"), "got: {reason}");
        }
        other => panic!("expected PageFailed, got {other:?}"),
    }
    assert!(!out.exists(), "no output file may exist after an abort");
}

#[tokio::test]
async fn placeholder_policy_writes_flagged_blank_pages() {
    let dir = tempfile::TempDir::new().unwrap();
    let pdf = write_test_pdf(
        dir.path(),
        "doc.pdf",
        &[
            TestPage::new(595.0, 842.0),
            TestPage::new(612.0, 792.0),
            TestPage::rotated(595.0, 842.0, 90),
        ],
    );
    let out = dir.path().join("doc-flat.pdf");

    let output = flatten(&pdf, &out, &no_renderer_config(FailurePolicy::Placeholder))
        .await
        .expect("placeholder policy must still produce a document");

    assert!(out.exists());
    assert!(output.is_partial());
    assert_eq!(output.stats.total_pages, 3);
    assert_eq!(output.stats.failed_pages, 3);
    assert!(output
        .pages
        .iter()
        .all(|p| matches!(p.status, PageStatus::Failed { .. })));

    // geometry preserved, including the rotated page's swapped dimensions
    let bytes = std::fs::read(&out).unwrap();
    let boxes = media_boxes(&bytes);
    assert_eq!(boxes.len(), 3);
    assert_eq!(boxes[0], [0.0, 0.0, 595.0, 842.0]);
    assert_eq!(boxes[1], [0.0, 0.0, 612.0, 792.0]);
    assert_eq!(boxes[2], [0.0, 0.0, 842.0, 595.0]);

    // and the output has no extractable text on any page
    let doc = Document::load_mem(&bytes).unwrap();
    for page_num in 1..=3u32 {
        let text = doc.extract_text(&[page_num]).unwrap_or_default();
        assert!(
            text.trim().is_empty(),
            "page {page_num} must have no text, got: {text:?}"
        );
    }

    // into_result escalates the partial document
    assert!(matches!(
        output.into_result(),
        Err(FlattenError::PartialFailure {
            failed: 3,
            total: 3,
            ..
        })
    ));
}

#[tokio::test]
async fn output_over_input_is_refused() {
    let dir = tempfile::TempDir::new().unwrap();
    let pdf = write_test_pdf(dir.path(), "doc.pdf", &[TestPage::new(612.0, 792.0)]);

    let result = flatten(&pdf, &pdf, &no_renderer_config(FailurePolicy::Placeholder)).await;
    assert!(matches!(
        result,
        Err(FlattenError::OutputClobbersInput { .. })
    ));
}

#[tokio::test]
async fn cancel_flag_aborts_without_output() {
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    let dir = tempfile::TempDir::new().unwrap();
    let pdf = write_test_pdf(dir.path(), "doc.pdf", &[TestPage::new(612.0, 792.0)]);
    let out = dir.path().join("doc-flat.pdf");

    let flag = Arc::new(AtomicBool::new(true));
    let config = FlattenConfig::builder()
        .renderer(RendererPreference::FallbackOnly)
        .fallback_tool("pdftoppm-missing-for-tests")
        .on_page_failure(FailurePolicy::Placeholder)
        .cancel_flag(flag)
        .build()
        .unwrap();

    let result = flatten(&pdf, &out, &config).await;
    assert!(matches!(result, Err(FlattenError::Cancelled)));
    assert!(!out.exists());
}

#[tokio::test]
async fn lossless_grayscale_placeholder_document_is_structurally_valid() {
    let dir = tempfile::TempDir::new().unwrap();
    let pdf = write_test_pdf(dir.path(), "doc.pdf", &[TestPage::new(200.0, 100.0)]);
    let out = dir.path().join("doc-flat.pdf");

    let config = FlattenConfig::builder()
        .renderer(RendererPreference::FallbackOnly)
        .fallback_tool("pdftoppm-missing-for-tests")
        .on_page_failure(FailurePolicy::Placeholder)
        .image_format(ImageFormat::Png)
        .color_mode(pdf_flatten::ColorMode::Grayscale)
        .build()
        .unwrap();

    flatten(&pdf, &out, &config).await.expect("must produce output");

    let doc = Document::load_mem(&std::fs::read(&out).unwrap()).unwrap();
    let image = doc
        .objects
        .values()
        .find_map(|o| match o {
            Object::Stream(s)
                if s.dict.get(b"Subtype").ok() == Some(&Object::Name(b"Image".to_vec())) =>
            {
                Some(s)
            }
            _ => None,
        })
        .expect("image XObject present");
    assert_eq!(
        image.dict.get(b"Filter").unwrap(),
        &Object::Name(b"FlateDecode".to_vec())
    );
    assert_eq!(
        image.dict.get(b"ColorSpace").unwrap(),
        &Object::Name(b"DeviceGray".to_vec())
    );
}

/// Write an executable stand-in for pdftoppm that copies a pre-made PNG to
/// the requested output prefix, whatever pages or scaling were asked for.
#[cfg(unix)]
fn write_fake_renderer(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let png_path = dir.join("canned.png");
    image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        40,
        50,
        image::Rgb([200, 200, 200]),
    ))
    .save_with_format(&png_path, image::ImageFormat::Png)
    .expect("write canned PNG");

    let tool = dir.join("fake-pdftoppm");
    std::fs::write(
        &tool,
        format!(
            "#!/bin/sh\nfor last; do :; done\ncp '{}' \"$last-1.png\"\n",
            png_path.display()
        ),
    )
    .expect("write fake tool");
    std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
    tool
}

#[cfg(unix)]
#[tokio::test]
async fn successful_fallback_marks_pages_fallback_used() {
    let dir = tempfile::TempDir::new().unwrap();
    let pdf = write_test_pdf(
        dir.path(),
        "doc.pdf",
        &[TestPage::new(595.0, 842.0), TestPage::new(612.0, 792.0)],
    );
    let out = dir.path().join("doc-flat.pdf");
    let tool = write_fake_renderer(dir.path());

    let config = FlattenConfig::builder()
        .renderer(RendererPreference::FallbackOnly)
        .fallback_tool(tool.to_string_lossy())
        .build()
        .unwrap();

    let output = flatten(&pdf, &out, &config).await.expect("fallback run");
    assert!(!output.is_partial());
    assert_eq!(output.stats.total_pages, 2);
    assert_eq!(output.stats.fallback_pages, 2);
    assert!(output
        .pages
        .iter()
        .all(|p| p.status == PageStatus::FallbackUsed));

    // structurally valid output: correct count, geometry, and no text
    let bytes = std::fs::read(&out).unwrap();
    let boxes = media_boxes(&bytes);
    assert_eq!(boxes.len(), 2);
    assert_eq!(boxes[0], [0.0, 0.0, 595.0, 842.0]);
    let doc = Document::load_mem(&bytes).unwrap();
    assert!(doc.extract_text(&[1]).unwrap_or_default().trim().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn hung_fallback_tool_is_killed_and_the_page_times_out() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::TempDir::new().unwrap();
    let pdf = write_test_pdf(dir.path(), "doc.pdf", &[TestPage::new(612.0, 792.0)]);
    let out = dir.path().join("doc-flat.pdf");

    let tool = dir.path().join("hanging-pdftoppm");
    std::fs::write(&tool, "#!/bin/sh\nsleep 30\n").unwrap();
    std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

    let config = FlattenConfig::builder()
        .renderer(RendererPreference::FallbackOnly)
        .fallback_tool(tool.to_string_lossy())
        .page_timeout_secs(1)
        .build()
        .unwrap();

    let result = flatten(&pdf, &out, &config).await;
    match result {
        Err(FlattenError::PageFailed { page, reason }) => {
            assert_eq!(page, 1);
            assert!(reason.contains("timed out"), "got: {reason}");
        }
        other => panic!("expected PageFailed, got {other:?}"),
    }
    assert!(!out.exists());
}

#[tokio::test]
async fn result_serializes_to_json() {
    let dir = tempfile::TempDir::new().unwrap();
    let pdf = write_test_pdf(dir.path(), "doc.pdf", &[TestPage::new(612.0, 792.0)]);
    let out = dir.path().join("doc-flat.pdf");

    let output = flatten(&pdf, &out, &no_renderer_config(FailurePolicy::Placeholder))
        .await
        .expect("must produce output");

    let json = serde_json::to_string_pretty(&output).expect("must serialize");
    let back: pdf_flatten::FlattenOutput =
        serde_json::from_str(&json).expect("must deserialize back");
    assert_eq!(back.stats.total_pages, output.stats.total_pages);
}

// ── Renderer e2e tests (gated: need pdfium and/or pdftoppm) ──────────────────

/// Check whether the external tool is runnable on this machine.
fn pdftoppm_available() -> bool {
    std::process::Command::new("pdftoppm")
        .arg("-v")
        .output()
        .is_ok()
}

#[tokio::test]
async fn e2e_flatten_preserves_count_geometry_and_strips_text() {
    e2e_skip_unless_enabled!();

    let dir = tempfile::TempDir::new().unwrap();
    let pdf = write_test_pdf(
        dir.path(),
        "mixed.pdf",
        &[
            TestPage::new(595.0, 842.0),
            TestPage::new(612.0, 792.0),
            TestPage::rotated(595.0, 842.0, 90),
        ],
    );
    let out = dir.path().join("mixed-flat.pdf");

    // source has extractable text before flattening
    let src = Document::load_mem(&std::fs::read(&pdf).unwrap()).unwrap();
    assert!(src
        .extract_text(&[1])
        .unwrap_or_default()
        .contains("Searchable"));

    let config = FlattenConfig::builder()
        .renderer(RendererPreference::PrimaryOnly)
        .build()
        .unwrap();
    let output = flatten(&pdf, &out, &config).await.expect("flatten");

    assert_eq!(output.stats.total_pages, 3);
    assert_eq!(output.stats.rendered_pages, 3);
    assert!(!output.is_partial());
    assert!(output
        .pages
        .iter()
        .all(|p| p.status == PageStatus::Success));

    let bytes = std::fs::read(&out).unwrap();
    let boxes = media_boxes(&bytes);
    for (got, want) in boxes.iter().zip([
        [0.0, 0.0, 595.0, 842.0],
        [0.0, 0.0, 612.0, 792.0],
        [0.0, 0.0, 842.0, 595.0],
    ]) {
        for (g, w) in got.iter().zip(want) {
            assert!((g - w).abs() <= 1.0, "MediaBox {got:?} vs {want:?}");
        }
    }

    let doc = Document::load_mem(&bytes).unwrap();
    for page_num in 1..=3u32 {
        let text = doc.extract_text(&[page_num]).unwrap_or_default();
        assert!(text.trim().is_empty(), "page {page_num}: {text:?}");
    }
}

#[tokio::test]
async fn e2e_flatten_is_deterministic() {
    e2e_skip_unless_enabled!();

    let dir = tempfile::TempDir::new().unwrap();
    let pdf = write_test_pdf(dir.path(), "doc.pdf", &[TestPage::new(612.0, 792.0)]);
    let out_a = dir.path().join("a.pdf");
    let out_b = dir.path().join("b.pdf");

    let config = FlattenConfig::builder()
        .renderer(RendererPreference::PrimaryOnly)
        .build()
        .unwrap();
    flatten(&pdf, &out_a, &config).await.expect("first run");
    flatten(&pdf, &out_b, &config).await.expect("second run");

    assert_eq!(
        std::fs::read(&out_a).unwrap(),
        std::fs::read(&out_b).unwrap(),
        "same document, page, and resolution must produce identical output"
    );
}

#[tokio::test]
async fn e2e_fallback_only_produces_valid_document() {
    e2e_skip_unless_enabled!();
    if !pdftoppm_available() {
        println!("SKIP — pdftoppm not installed");
        return;
    }

    let dir = tempfile::TempDir::new().unwrap();
    let pdf = write_test_pdf(
        dir.path(),
        "doc.pdf",
        &[TestPage::new(595.0, 842.0), TestPage::new(612.0, 792.0)],
    );
    let out = dir.path().join("doc-flat.pdf");

    let config = FlattenConfig::builder()
        .renderer(RendererPreference::FallbackOnly)
        .build()
        .unwrap();
    let output = flatten(&pdf, &out, &config).await.expect("flatten");

    assert_eq!(output.stats.total_pages, 2);
    assert_eq!(output.stats.fallback_pages, 2);
    assert!(output
        .pages
        .iter()
        .all(|p| p.status == PageStatus::FallbackUsed));

    let bytes = std::fs::read(&out).unwrap();
    assert_eq!(media_boxes(&bytes).len(), 2);
    let doc = Document::load_mem(&bytes).unwrap();
    assert!(doc.extract_text(&[1]).unwrap_or_default().trim().is_empty());
}

#[tokio::test]
async fn e2e_export_page_images_writes_one_png_per_page() {
    e2e_skip_unless_enabled!();

    let dir = tempfile::TempDir::new().unwrap();
    let pdf = write_test_pdf(
        dir.path(),
        "doc.pdf",
        &[TestPage::new(595.0, 842.0), TestPage::new(612.0, 792.0)],
    );
    let out_dir = dir.path().join("pages");

    let config = FlattenConfig::builder()
        .renderer(RendererPreference::PrimaryOnly)
        .dpi(96)
        .build()
        .unwrap();
    let output = pdf_flatten::export_page_images(&pdf, &out_dir, &config)
        .await
        .expect("export");

    assert_eq!(output.stats.total_pages, 2);
    for n in 1..=2 {
        let path = out_dir.join(format!("page_{n}.png"));
        assert!(path.exists(), "missing {}", path.display());
        let img = image::open(&path).expect("readable PNG");
        assert!(img.width() > 0 && img.height() > 0);
    }
}
