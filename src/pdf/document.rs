//! Loading, inspecting and saving PDF documents

use std::path::Path;

use lopdf::{Document, Object, ObjectId};

use crate::error::{Error, Result};
use crate::layout::PageGeometry;

/// Page attributes that may be inherited from an ancestor Pages node
pub const INHERITABLE_PAGE_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Page tree depth beyond which we assume a Parent cycle
const MAX_TREE_DEPTH: usize = 64;

/// Load a PDF, reporting unparseable input as [`Error::DocumentParse`]
pub fn open_document(path: &Path) -> Result<Document> {
    if !path.exists() {
        return Err(Error::FileNotFound(path.to_path_buf()));
    }

    Document::load(path).map_err(|e| Error::DocumentParse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Load a PDF, retrying once with leading junk stripped when the strict parse fails
///
/// Some producers (mail gateways, scanners) prepend bytes before the `%PDF-`
/// header. The strict failure is logged as a warning either way.
pub fn open_document_lenient(path: &Path) -> Result<Document> {
    let strict_error = match open_document(path) {
        Ok(doc) => return Ok(doc),
        Err(e @ Error::FileNotFound(_)) => return Err(e),
        Err(e) => e,
    };

    tracing::warn!("Could not read PDF structure: {}", strict_error);
    tracing::warn!("Will attempt processing anyway");

    let bytes = std::fs::read(path)?;
    match find_header(&bytes) {
        Some(offset) if offset > 0 => {
            tracing::debug!("Skipping {} bytes before the PDF header", offset);
            Document::load_mem(&bytes[offset..]).map_err(|e| Error::DocumentParse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }
        _ => Err(strict_error),
    }
}

/// Offset of the `%PDF-` marker within the first kilobyte
fn find_header(bytes: &[u8]) -> Option<usize> {
    let window = &bytes[..bytes.len().min(1024)];
    window.windows(5).position(|w| w == b"%PDF-")
}

/// Page object IDs in page order
pub fn page_ids(doc: &Document) -> Vec<ObjectId> {
    doc.get_pages().into_values().collect()
}

/// Count the pages of a PDF file
pub fn count_pages(path: &Path) -> Result<usize> {
    let doc = open_document(path)?;
    Ok(doc.get_pages().len())
}

/// Compress and write a document
pub fn save_document(doc: &mut Document, path: &Path) -> Result<()> {
    doc.compress();
    doc.save(path)?;
    Ok(())
}

/// Follow a reference to the object it points at
///
/// Dangling references resolve to themselves.
pub fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

/// Look up a page attribute, walking up the page tree when the page lacks it
pub fn inherited_attribute(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut node_id = page_id;

    for _ in 0..MAX_TREE_DEPTH {
        let node = doc.get_dictionary(node_id).ok()?;
        if let Ok(value) = node.get(key) {
            return Some(value.clone());
        }
        node_id = node.get(b"Parent").and_then(|p| p.as_reference()).ok()?;
    }

    None
}

/// Read a number that may be stored as an integer or a real
pub fn number(doc: &Document, obj: &Object) -> Option<f32> {
    match resolve(doc, obj) {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

/// The page's MediaBox as origin and size, US Letter when missing or malformed
pub fn page_geometry(doc: &Document, page_id: ObjectId) -> PageGeometry {
    let media_box = inherited_attribute(doc, page_id, b"MediaBox");

    let coords: Option<Vec<f32>> = media_box.as_ref().and_then(|mb| {
        let arr = resolve(doc, mb).as_array().ok()?;
        arr.iter().map(|o| number(doc, o)).collect()
    });

    match coords.as_deref() {
        Some([a, b, c, d]) => {
            let (x0, x1) = (a.min(*c), a.max(*c));
            let (y0, y1) = (b.min(*d), b.max(*d));
            if x1 - x0 > 0.0 && y1 - y0 > 0.0 {
                return PageGeometry {
                    x0,
                    y0,
                    width: x1 - x0,
                    height: y1 - y0,
                };
            }
            tracing::debug!("Degenerate MediaBox on page {:?}, assuming Letter", page_id);
            PageGeometry::letter()
        }
        _ => {
            tracing::debug!("No usable MediaBox on page {:?}, assuming Letter", page_id);
            PageGeometry::letter()
        }
    }
}
