//! Stamp placement calculations
//!
//! All coordinates are in PDF points with the origin at the bottom-left of the
//! page and y increasing upward.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Average glyph advance as a fraction of the font size.
///
/// This is an approximation, not real font metrics. Long labels in narrow
/// layouts can end up slightly off from where true metrics would put them.
pub const GLYPH_WIDTH_RATIO: f32 = 0.6;

/// Named anchor position for the stamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placement {
    #[default]
    BottomRight,
    BottomLeft,
    TopRight,
    TopLeft,
    Center,
}

impl Placement {
    /// All placements, in the order they are documented
    pub const ALL: [Placement; 5] = [
        Placement::BottomRight,
        Placement::BottomLeft,
        Placement::TopRight,
        Placement::TopLeft,
        Placement::Center,
    ];

    /// The command-line name of this placement
    pub fn name(&self) -> &'static str {
        match self {
            Placement::BottomRight => "bottom-right",
            Placement::BottomLeft => "bottom-left",
            Placement::TopRight => "top-right",
            Placement::TopLeft => "top-left",
            Placement::Center => "center",
        }
    }

    /// Parse a placement name, falling back to bottom-right for anything unknown
    ///
    /// Library entry point for callers that take placement names from
    /// untrusted configuration and must never reject a run over them. The
    /// command line uses the strict [`FromStr`] impl instead.
    pub fn from_name_or_default(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            tracing::debug!("Unknown placement '{}', using bottom-right", name);
            Placement::BottomRight
        })
    }
}

impl FromStr for Placement {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Placement::ALL
            .into_iter()
            .find(|p| p.name() == normalized)
            .ok_or_else(|| Error::InvalidPlacement(s.to_string()))
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Visible page area, taken from the page's MediaBox
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    /// Lower-left x of the MediaBox
    pub x0: f32,
    /// Lower-left y of the MediaBox
    pub y0: f32,
    pub width: f32,
    pub height: f32,
}

impl PageGeometry {
    /// Page of the given size with its origin at (0, 0)
    pub fn new(width: f32, height: f32) -> Self {
        Self { x0: 0.0, y0: 0.0, width, height }
    }

    /// US Letter size (8.5" × 11")
    pub fn letter() -> Self {
        Self::new(612.0, 792.0)
    }

    /// A4 size (210mm × 297mm)
    pub fn a4() -> Self {
        Self::new(595.28, 841.89)
    }
}

/// Estimate the rendered width of `char_count` characters at `font_size`
pub fn estimate_text_width(char_count: usize, font_size: f32) -> f32 {
    char_count as f32 * font_size * GLYPH_WIDTH_RATIO
}

/// Compute the left baseline anchor for a stamp
///
/// No clamping is applied: when the margin plus the estimated text width does
/// not fit the page, the returned position may lie partly or fully off-page.
pub fn resolve_position(
    placement: Placement,
    page_width: f32,
    page_height: f32,
    text_len: usize,
    font_size: f32,
    margin: f32,
) -> (f32, f32) {
    let text_width = estimate_text_width(text_len, font_size);

    match placement {
        Placement::BottomRight => (page_width - margin - text_width, margin),
        Placement::BottomLeft => (margin, margin),
        Placement::TopRight => (
            page_width - margin - text_width,
            page_height - margin - font_size,
        ),
        Placement::TopLeft => (margin, page_height - margin - font_size),
        Placement::Center => (page_width / 2.0 - text_width / 2.0, page_height / 2.0),
    }
}
