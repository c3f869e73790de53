//! PDF manipulation module

pub mod document;
pub mod stamp;
pub mod compose;
pub mod flatten;

// Re-export commonly used items
pub use document::{count_pages, open_document, open_document_lenient, page_geometry, save_document};
pub use stamp::{render_page_stamp, render_stamp, StampOverlay};
pub use compose::{compose_page, stamp_document};
pub use flatten::{reserialize_pdf, FlattenOutcome, Flattener};
