//! Output document construction: encoded pages → a new PDF.
//!
//! Each output page is an image XObject placed by a four-operator content
//! stream (`q <w> 0 0 <h> 0 0 cm /Im0 Do Q`) on a page whose `MediaBox` is
//! taken from the source page's point dimensions. The image exactly fills
//! the page — no cropping, no letterboxing — and because width and height
//! both derive from the same source geometry, the aspect ratio is preserved
//! by construction. No text operator is ever emitted, so the output
//! contains nothing a text extractor can find.
//!
//! The finished document is published atomically: bytes are written to a
//! temp file in the destination directory and renamed into place only once
//! complete, so a failed run never leaves a partial file at the output path.

use crate::error::FlattenError;
use crate::pipeline::store::EncodedPage;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, Stream};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

/// Build the flattened PDF in memory from ordered pages.
pub fn build_document(pages: &[EncodedPage]) -> Result<Vec<u8>, FlattenError> {
    let mut doc = Document::with_version("1.5");
    let pages_tree_id = doc.new_object_id();

    let mut kids = Vec::with_capacity(pages.len());
    for page in pages {
        kids.push(Object::Reference(add_page(&mut doc, pages_tree_id, page)?));
    }

    doc.objects.insert(
        pages_tree_id,
        Object::Dictionary(Dictionary::from_iter([
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Kids", Object::Array(kids)),
            ("Count", Object::Integer(pages.len() as i64)),
        ])),
    );

    let catalog_id = doc.add_object(Dictionary::from_iter([
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_tree_id)),
    ]));
    doc.trailer.set("Root", Object::Reference(catalog_id));

    // Compresses the uncompressed content streams; image streams already
    // carry a Filter and are left untouched.
    doc.compress();

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| FlattenError::Internal(format!("PDF serialisation failed: {e}")))?;

    info!("Assembled {} pages into {} bytes", pages.len(), bytes.len());
    Ok(bytes)
}

/// Add one image page to the document, returning its object id.
fn add_page(
    doc: &mut Document,
    parent_id: lopdf::ObjectId,
    page: &EncodedPage,
) -> Result<lopdf::ObjectId, FlattenError> {
    let image = &page.image;

    let mut image_dict = Dictionary::new();
    image_dict.set("Type", Object::Name(b"XObject".to_vec()));
    image_dict.set("Subtype", Object::Name(b"Image".to_vec()));
    image_dict.set("Width", Object::Integer(image.pixel_width as i64));
    image_dict.set("Height", Object::Integer(image.pixel_height as i64));
    image_dict.set("ColorSpace", Object::Name(image.color_space.pdf_name().to_vec()));
    image_dict.set("BitsPerComponent", Object::Integer(8));
    image_dict.set("Filter", Object::Name(image.filter.pdf_name().to_vec()));
    let image_id = doc.add_object(Stream::new(image_dict, image.data.clone()));

    let width = page.geometry.width_pts;
    let height = page.geometry.height_pts;

    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Real(width),
                    0.into(),
                    0.into(),
                    Object::Real(height),
                    0.into(),
                    0.into(),
                ],
            ),
            Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_bytes = content
        .encode()
        .map_err(|e| FlattenError::Internal(format!("content stream encoding failed: {e}")))?;
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content_bytes));

    let resources = Dictionary::from_iter([(
        "XObject",
        Object::Dictionary(Dictionary::from_iter([("Im0", Object::Reference(image_id))])),
    )]);

    let page_id = doc.add_object(Dictionary::from_iter([
        ("Type", Object::Name(b"Page".to_vec())),
        ("Parent", Object::Reference(parent_id)),
        (
            "MediaBox",
            Object::Array(vec![
                0.into(),
                0.into(),
                Object::Real(width),
                Object::Real(height),
            ]),
        ),
        ("Contents", Object::Reference(content_id)),
        ("Resources", Object::Dictionary(resources)),
    ]));

    debug!(
        "Added page {} ({}x{} pt, {} image bytes)",
        page.index + 1,
        width,
        height,
        image.data.len()
    );
    Ok(page_id)
}

/// Write `bytes` to `output_path` atomically.
///
/// The temp file lives in the destination directory so the final rename
/// never crosses a filesystem boundary; it is cleaned up automatically on
/// any error path.
pub fn write_atomic(output_path: &Path, bytes: &[u8]) -> Result<(), FlattenError> {
    let io_err = |source| FlattenError::OutputWriteFailed {
        path: output_path.to_path_buf(),
        source,
    };

    let dir = match output_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => {
            std::fs::create_dir_all(p).map_err(io_err)?;
            p
        }
        _ => Path::new("."),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(bytes).map_err(io_err)?;
    tmp.persist(output_path).map_err(|e| io_err(e.error))?;

    debug!("Wrote {} bytes to {}", bytes.len(), output_path.display());
    Ok(())
}
