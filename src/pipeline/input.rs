//! Source-document access: validate the input path and read page geometry.
//!
//! Validation checks the `%PDF` magic bytes up front so callers get a
//! meaningful error rather than a renderer crash deep inside the pipeline.
//!
//! Geometry is read directly from the document structure (`lopdf`) rather
//! than through the rendering engine, for two reasons: the numbers come
//! straight from each page's `MediaBox`, and probing keeps working when no
//! pdfium library is installed and the run is configured fallback-only.
//! The page's `/Rotate` entry is folded in here — a portrait page rotated
//! 90° reports landscape dimensions, matching what both renderers draw.
//! The source file is only ever opened read-only.

use crate::error::FlattenError;
use crate::output::{DocumentInfo, PageGeometry};
use lopdf::{Dictionary, Document, Object};
use std::path::Path;
use tracing::debug;

/// Fallback page size when a malformed document carries no MediaBox (US Letter).
const DEFAULT_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

/// How far up the Pages tree inherited attributes are searched.
const INHERIT_DEPTH: usize = 10;

/// Validate that `path` exists, is readable, and starts with the PDF magic.
pub fn validate_source(path: &Path) -> Result<(), FlattenError> {
    if !path.exists() {
        return Err(FlattenError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    match std::fs::File::open(path) {
        Ok(mut f) => {
            use std::io::Read;
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
                return Err(FlattenError::NotAPdf {
                    path: path.to_path_buf(),
                    magic,
                });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(FlattenError::PermissionDenied {
                path: path.to_path_buf(),
            });
        }
        Err(_) => {
            return Err(FlattenError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
    }

    debug!("Validated source PDF: {}", path.display());
    Ok(())
}

/// Refuse to write the output over the input document.
///
/// Canonicalises both paths when possible so `./doc.pdf` and `doc.pdf`
/// compare equal; a non-existent output path can never clash.
pub fn reject_in_place(input: &Path, output: &Path) -> Result<(), FlattenError> {
    if !output.exists() {
        return Ok(());
    }
    let same = match (input.canonicalize(), output.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => input == output,
    };
    if same {
        return Err(FlattenError::OutputClobbersInput {
            path: output.to_path_buf(),
        });
    }
    Ok(())
}

/// Read page count, version, and per-page visual geometry.
pub fn read_document_info(path: &Path) -> Result<DocumentInfo, FlattenError> {
    let doc = Document::load(path).map_err(|e| {
        let detail = e.to_string();
        if detail.to_lowercase().contains("crypt") {
            FlattenError::PasswordRequired {
                path: path.to_path_buf(),
            }
        } else {
            FlattenError::CorruptPdf {
                path: path.to_path_buf(),
                detail,
            }
        }
    })?;

    // get_pages is keyed by 1-based page number; BTreeMap keeps page order.
    let pages = doc.get_pages();
    let mut geometry = Vec::with_capacity(pages.len());

    for (&page_num, &page_id) in pages.iter() {
        let page_obj = doc
            .get_object(page_id)
            .map_err(|e| FlattenError::CorruptPdf {
                path: path.to_path_buf(),
                detail: format!("page {page_num}: {e}"),
            })?;

        let media_box = inherited_media_box(&doc, page_obj, INHERIT_DEPTH);
        let rotation = inherited_rotation(&doc, page_obj, INHERIT_DEPTH);

        let width = media_box[2] - media_box[0];
        let height = media_box[3] - media_box[1];

        // 90/270 swap so geometry describes the page as a viewer sees it.
        let (width, height) = if rotation == 90 || rotation == 270 {
            (height, width)
        } else {
            (width, height)
        };

        geometry.push(PageGeometry {
            width_pts: width,
            height_pts: height,
        });
    }

    debug!(
        "Probed {}: {} pages, version {}",
        path.display(),
        geometry.len(),
        doc.version
    );

    Ok(DocumentInfo {
        page_count: geometry.len(),
        pdf_version: doc.version.clone(),
        pages: geometry,
    })
}

/// Resolve a page's MediaBox, walking up the Pages tree for inherited values.
fn inherited_media_box(doc: &Document, page_obj: &Object, depth: usize) -> [f32; 4] {
    if depth == 0 {
        return DEFAULT_MEDIA_BOX;
    }

    let Object::Dictionary(dict) = page_obj else {
        return DEFAULT_MEDIA_BOX;
    };

    if let Ok(media_box_obj) = dict.get(b"MediaBox") {
        let arr = match media_box_obj {
            Object::Array(arr) => Some(arr),
            Object::Reference(id) => match doc.get_object(*id) {
                Ok(Object::Array(arr)) => Some(arr),
                _ => None,
            },
            _ => None,
        };
        if let Some(arr) = arr {
            if arr.len() == 4 {
                let values: Vec<f32> = arr.iter().filter_map(as_number).collect();
                if values.len() == 4 {
                    return [values[0], values[1], values[2], values[3]];
                }
            }
        }
    }

    if let Some(parent) = parent_of(doc, dict) {
        return inherited_media_box(doc, parent, depth - 1);
    }

    DEFAULT_MEDIA_BOX
}

/// Resolve a page's /Rotate entry (inheritable), normalised to 0/90/180/270.
fn inherited_rotation(doc: &Document, page_obj: &Object, depth: usize) -> i64 {
    if depth == 0 {
        return 0;
    }

    let Object::Dictionary(dict) = page_obj else {
        return 0;
    };

    if let Ok(rotate) = dict.get(b"Rotate") {
        let value = match rotate {
            Object::Integer(i) => Some(*i),
            Object::Reference(id) => match doc.get_object(*id) {
                Ok(Object::Integer(i)) => Some(*i),
                _ => None,
            },
            _ => None,
        };
        if let Some(v) = value {
            return ((v % 360) + 360) % 360;
        }
    }

    if let Some(parent) = parent_of(doc, dict) {
        return inherited_rotation(doc, parent, depth - 1);
    }

    0
}

fn parent_of<'a>(doc: &'a Document, dict: &Dictionary) -> Option<&'a Object> {
    match dict.get(b"Parent") {
        Ok(Object::Reference(parent_id)) => doc.get_object(*parent_id).ok(),
        _ => None,
    }
}

fn as_number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}
