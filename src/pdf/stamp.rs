//! Rendering the single-page stamp overlay
//!
//! The overlay is a standalone one-page PDF sized exactly like the page it is
//! meant for, so the stamp coordinates mean the same thing on both.

use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

use crate::bates::StampSpec;
use crate::color::StampColor;
use crate::error::Result;
use crate::layout::{resolve_position, PageGeometry};

/// Resource name of the stamp font inside the overlay
pub const STAMP_FONT_NAME: &str = "F1";

/// Base font used for every stamp (one of the standard 14 PDF fonts)
pub const STAMP_BASE_FONT: &str = "Helvetica-Bold";

/// A rendered stamp: a one-page document holding only the label
#[derive(Debug, Clone)]
pub struct StampOverlay {
    document: Document,
    page_id: ObjectId,
    width: f32,
    height: f32,
    text: String,
}

impl StampOverlay {
    /// The overlay's own document
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// The overlay's only page
    pub fn page_id(&self) -> ObjectId {
        self.page_id
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    /// The label drawn on the overlay
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Decoded content stream of the overlay page
    pub fn content(&self) -> Result<Vec<u8>> {
        Ok(self.document.get_page_content(self.page_id)?)
    }
}

/// Render `text` at `(x, y)` on a fresh page of `page_width` × `page_height`
///
/// An invalid color has already been degraded to black by [`StampColor`], so
/// rendering never fails because of it.
pub fn render_stamp(
    text: &str,
    x: f32,
    y: f32,
    font_size: f32,
    color: &StampColor,
    page_width: f32,
    page_height: f32,
) -> StampOverlay {
    if let StampColor::FallbackBlack { requested } = color {
        tracing::debug!("Rendering '{}' in black instead of '{}'", text, requested);
    }

    let mut doc = Document::with_version("1.4");
    let pages_id = doc.new_object_id();

    let font_id = use_helvetica_bold_font(&mut doc);
    let content = generate_stamp_content(text, x, y, font_size, color);
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content));

    let mut fonts = Dictionary::new();
    fonts.set(STAMP_FONT_NAME, Object::Reference(font_id));
    let mut resources = Dictionary::new();
    resources.set("Font", Object::Dictionary(fonts));

    let page_id = doc.add_object(Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Page".to_vec())),
        ("Parent", Object::Reference(pages_id)),
        (
            "MediaBox",
            Object::Array(vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(page_width),
                Object::Real(page_height),
            ]),
        ),
        ("Resources", Object::Dictionary(resources)),
        ("Contents", Object::Reference(content_id)),
    ]));

    let pages = Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Pages".to_vec())),
        ("Kids", Object::Array(vec![Object::Reference(page_id)])),
        ("Count", Object::Integer(1)),
    ]);
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]));
    doc.trailer.set("Root", Object::Reference(catalog_id));

    StampOverlay {
        document: doc,
        page_id,
        width: page_width,
        height: page_height,
        text: text.to_string(),
    }
}

/// Lay out and render the stamp for one page
pub fn render_page_stamp(spec: &StampSpec, label: &str, page: &PageGeometry) -> StampOverlay {
    let (x, y) = resolve_position(
        spec.placement(),
        page.width,
        page.height,
        label.chars().count(),
        spec.font_size(),
        spec.margin(),
    );

    render_stamp(
        label,
        x,
        y,
        spec.font_size(),
        spec.color(),
        page.width,
        page.height,
    )
}

/// Use Helvetica-Bold (standard PDF font, nothing to embed)
fn use_helvetica_bold_font(doc: &mut Document) -> ObjectId {
    let mut font = Dictionary::new();
    font.set("Type", Object::Name(b"Font".to_vec()));
    font.set("Subtype", Object::Name(b"Type1".to_vec()));
    font.set("BaseFont", Object::Name(STAMP_BASE_FONT.as_bytes().to_vec()));
    font.set("Encoding", Object::Name(b"WinAnsiEncoding".to_vec()));

    doc.add_object(Object::Dictionary(font))
}

/// Content stream drawing one left-anchored line of text
fn generate_stamp_content(text: &str, x: f32, y: f32, font_size: f32, color: &StampColor) -> Vec<u8> {
    let (r, g, b) = color.effective().to_unit();

    let mut content = Vec::new();
    content.extend_from_slice(b"q\n");
    content.extend_from_slice(format!("{} {} {} rg\n", fmt_num(r), fmt_num(g), fmt_num(b)).as_bytes());
    content.extend_from_slice(b"BT\n");
    content.extend_from_slice(format!("/{} {} Tf\n", STAMP_FONT_NAME, fmt_num(font_size)).as_bytes());
    content.extend_from_slice(format!("1 0 0 1 {} {} Tm\n", fmt_num(x), fmt_num(y)).as_bytes());
    content.push(b'(');
    content.extend_from_slice(&escape_pdf_string(&encode_win_ansi(text)));
    content.extend_from_slice(b") Tj\n");
    content.extend_from_slice(b"ET\n");
    content.extend_from_slice(b"Q\n");
    content
}

/// Format a number for a content stream: at most four decimals, no trailing zeros
pub(crate) fn fmt_num(value: f32) -> String {
    let s = format!("{:.4}", value);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    match s {
        "" | "-" | "-0" => "0".to_string(),
        _ => s.to_string(),
    }
}

/// Encode text as single-byte WinAnsi, replacing anything unrepresentable with '?'
fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c as u32 {
            0x20..=0x7E | 0xA0..=0xFF => c as u8,
            _ => b'?',
        })
        .collect()
}

/// Escape special characters in PDF literal strings
fn escape_pdf_string(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    for &b in bytes {
        if matches!(b, b'\\' | b'(' | b')') {
            out.push(b'\\');
        }
        out.push(b);
    }
    out
}
