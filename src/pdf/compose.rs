//! Compositing stamp overlays onto document pages using lopdf
//!
//! The overlay page becomes a Form XObject that is painted after the page's
//! own content. The original content is wrapped in `q`/`Q` first so any
//! transformation it leaves behind does not move the stamp.

use std::collections::HashMap;

use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

use crate::bates::StampSpec;
use crate::error::{Error, Result};
use crate::pdf::document::{inherited_attribute, page_geometry, page_ids, resolve};
use crate::pdf::stamp::{fmt_num, render_page_stamp, StampOverlay};

/// Resource name prefix for imported stamp XObjects
pub const STAMP_XOBJECT_PREFIX: &str = "BatesStamp";

/// Stamp every page of `doc`, numbering from `first_number`
///
/// Returns the number of pages stamped. Pages are visited in document order and
/// none are added, removed or reordered. A document whose numbers would run
/// past `u64::MAX` is rejected before any page is touched.
pub fn stamp_document(doc: &mut Document, spec: &StampSpec, first_number: u64) -> Result<usize> {
    let pages = page_ids(doc);
    if first_number.checked_add(pages.len() as u64).is_none() {
        return Err(Error::InvalidStampSpec(format!(
            "{} pages starting at {} exceed the largest Bates number",
            pages.len(),
            first_number
        )));
    }

    for (i, page_id) in pages.iter().enumerate() {
        let label = spec.label(first_number + i as u64);
        let geometry = page_geometry(doc, *page_id);
        let overlay = render_page_stamp(spec, &label, &geometry);

        compose_page(doc, *page_id, &overlay)?;
        tracing::debug!("Stamped page {} with {}", i + 1, label);
    }

    Ok(pages.len())
}

/// Paint `overlay` on top of one page of `doc`
///
/// Only the target page's dictionary is modified; shared or inherited
/// resources are copied onto the page rather than edited in place.
pub fn compose_page(doc: &mut Document, page_id: ObjectId, overlay: &StampOverlay) -> Result<()> {
    if !matches!(doc.get_object(page_id)?, Object::Dictionary(_)) {
        return Err(Error::General(format!("Object {:?} is not a page dictionary", page_id)));
    }

    let geometry = page_geometry(doc, page_id);
    let xobject_id = import_overlay_as_xobject(doc, overlay)?;
    let name = add_xobject_to_page_resources(doc, page_id, xobject_id)?;

    let existing = page_content_refs(doc, page_id);
    let mut contents = Vec::with_capacity(existing.len() + 3);
    if !existing.is_empty() {
        let save_id = doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
        let restore_id = doc.add_object(Stream::new(Dictionary::new(), b"\nQ\n".to_vec()));
        contents.push(Object::Reference(save_id));
        contents.extend(existing);
        contents.push(Object::Reference(restore_id));
    }

    // Overlay space starts at the MediaBox origin
    let invoke_content = format!(
        "q\n1 0 0 1 {} {} cm\n/{} Do\nQ\n",
        fmt_num(geometry.x0),
        fmt_num(geometry.y0),
        name
    );
    let invoke_id = doc.add_object(Stream::new(Dictionary::new(), invoke_content.into_bytes()));
    contents.push(Object::Reference(invoke_id));

    let page_dict = doc.get_dictionary_mut(page_id)?;
    page_dict.set("Contents", Object::Array(contents));

    Ok(())
}

/// Copy the overlay's page into `doc` as a Form XObject
fn import_overlay_as_xobject(doc: &mut Document, overlay: &StampOverlay) -> Result<ObjectId> {
    let source = overlay.document();
    let content = source.get_page_content(overlay.page_id())?;

    let mut xobject_dict = Dictionary::new();
    xobject_dict.set("Type", Object::Name(b"XObject".to_vec()));
    xobject_dict.set("Subtype", Object::Name(b"Form".to_vec()));
    xobject_dict.set("FormType", Object::Integer(1));
    xobject_dict.set(
        "BBox",
        Object::Array(vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Real(overlay.width()),
            Object::Real(overlay.height()),
        ]),
    );

    let mut cache = HashMap::new();
    if let Ok(resources) = source.get_dictionary(overlay.page_id())?.get(b"Resources") {
        xobject_dict.set("Resources", copy_object_deep(doc, source, resources, &mut cache)?);
    }

    Ok(doc.add_object(Stream::new(xobject_dict, content)))
}

/// Register an XObject on the page under a fresh name, returning that name
fn add_xobject_to_page_resources(doc: &mut Document, page_id: ObjectId, xobject_id: ObjectId) -> Result<String> {
    let mut resources = inherited_attribute(doc, page_id, b"Resources")
        .and_then(|res| resolve(doc, &res).as_dict().ok().cloned())
        .unwrap_or_else(Dictionary::new);

    let mut xobjects = resources
        .get(b"XObject")
        .ok()
        .and_then(|xo| resolve(doc, xo).as_dict().ok().cloned())
        .unwrap_or_else(Dictionary::new);

    let name = (0..)
        .map(|n| format!("{}{}", STAMP_XOBJECT_PREFIX, n))
        .find(|candidate| !xobjects.has(candidate.as_bytes()))
        .unwrap_or_else(|| STAMP_XOBJECT_PREFIX.to_string());

    xobjects.set(name.as_bytes(), Object::Reference(xobject_id));
    resources.set("XObject", Object::Dictionary(xobjects));

    // Page-local copy so pages sharing a Resources object are not affected
    let page_dict = doc.get_dictionary_mut(page_id)?;
    page_dict.set("Resources", Object::Dictionary(resources));

    Ok(name)
}

/// The page's content stream references, flattened into one list
fn page_content_refs(doc: &Document, page_id: ObjectId) -> Vec<Object> {
    let Ok(page_dict) = doc.get_dictionary(page_id) else {
        return Vec::new();
    };

    match page_dict.get(b"Contents") {
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Array(arr)) => arr.clone(),
            Ok(_) => vec![Object::Reference(*id)],
            Err(_) => Vec::new(),
        },
        Ok(Object::Array(arr)) => arr.clone(),
        _ => Vec::new(),
    }
}

/// Deep copy an object from `source` into `output`, following references
///
/// Each referenced object is assigned its new ID before its children are
/// copied, so reference cycles terminate.
pub(crate) fn copy_object_deep(
    output: &mut Document,
    source: &Document,
    obj: &Object,
    cache: &mut HashMap<ObjectId, ObjectId>,
) -> Result<Object> {
    match obj {
        Object::Reference(id) => {
            if let Some(&new_id) = cache.get(id) {
                return Ok(Object::Reference(new_id));
            }

            let Ok(referenced) = source.get_object(*id) else {
                return Ok(Object::Null);
            };

            let new_id = output.new_object_id();
            cache.insert(*id, new_id);
            let copied = copy_object_deep(output, source, referenced, cache)?;
            output.objects.insert(new_id, copied);

            Ok(Object::Reference(new_id))
        }
        Object::Dictionary(dict) => Ok(Object::Dictionary(copy_dictionary_deep(output, source, dict, cache)?)),
        Object::Array(arr) => {
            let new_arr: Result<Vec<_>> = arr
                .iter()
                .map(|item| copy_object_deep(output, source, item, cache))
                .collect();
            Ok(Object::Array(new_arr?))
        }
        Object::Stream(stream) => Ok(Object::Stream(Stream {
            dict: copy_dictionary_deep(output, source, &stream.dict, cache)?,
            content: stream.content.clone(),
            allows_compression: stream.allows_compression,
            start_position: None,
        })),
        _ => Ok(obj.clone()),
    }
}

pub(crate) fn copy_dictionary_deep(
    output: &mut Document,
    source: &Document,
    dict: &Dictionary,
    cache: &mut HashMap<ObjectId, ObjectId>,
) -> Result<Dictionary> {
    let mut new_dict = Dictionary::new();
    for (key, value) in dict.iter() {
        new_dict.set(key.clone(), copy_object_deep(output, source, value, cache)?);
    }
    Ok(new_dict)
}
