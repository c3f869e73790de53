//! Stamp color parsing

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// An sRGB color with 8-bit channels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RgbColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl RgbColor {
    pub const BLACK: RgbColor = RgbColor { r: 0, g: 0, b: 0 };

    /// Parse a hex color: `#rrggbb`, `#rgb`, `0xrrggbb`, or the bare digits
    pub fn parse_hex(spec: &str) -> Result<Self> {
        let trimmed = spec.trim();
        let digits = trimmed
            .strip_prefix('#')
            .or_else(|| trimmed.strip_prefix("0x"))
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::ColorParse(spec.to_string()));
        }

        let channel = |s: &str| u8::from_str_radix(s, 16).map_err(|_| Error::ColorParse(spec.to_string()));

        match digits.len() {
            6 => Ok(Self {
                r: channel(&digits[0..2])?,
                g: channel(&digits[2..4])?,
                b: channel(&digits[4..6])?,
            }),
            3 => {
                // #abc is shorthand for #aabbcc
                let expand = |i: usize| channel(&digits[i..i + 1]).map(|v| v * 17);
                Ok(Self {
                    r: expand(0)?,
                    g: expand(1)?,
                    b: expand(2)?,
                })
            }
            _ => Err(Error::ColorParse(spec.to_string())),
        }
    }

    /// Channels scaled to the 0.0-1.0 range used by PDF color operators
    pub fn to_unit(&self) -> (f32, f32, f32) {
        (
            self.r as f32 / 255.0,
            self.g as f32 / 255.0,
            self.b as f32 / 255.0,
        )
    }
}

impl FromStr for RgbColor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_hex(s)
    }
}

impl fmt::Display for RgbColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// The color a stamp is drawn in
///
/// An unparseable color never fails a run: it becomes `FallbackBlack`, which
/// keeps the original text around for reporting and renders as black.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StampColor {
    Rgb(RgbColor),
    FallbackBlack { requested: String },
}

impl StampColor {
    /// Parse a color, degrading to black (with a warning) when it is invalid
    pub fn parse_or_black(spec: &str) -> Self {
        match RgbColor::parse_hex(spec) {
            Ok(rgb) => StampColor::Rgb(rgb),
            Err(e) => {
                tracing::warn!("{}, using black instead", e);
                StampColor::FallbackBlack {
                    requested: spec.to_string(),
                }
            }
        }
    }

    /// The color actually used for drawing
    pub fn effective(&self) -> RgbColor {
        match self {
            StampColor::Rgb(rgb) => *rgb,
            StampColor::FallbackBlack { .. } => RgbColor::BLACK,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, StampColor::FallbackBlack { .. })
    }
}

impl Default for StampColor {
    fn default() -> Self {
        StampColor::Rgb(RgbColor::BLACK)
    }
}

impl fmt::Display for StampColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StampColor::Rgb(rgb) => write!(f, "{}", rgb),
            StampColor::FallbackBlack { requested } => {
                write!(f, "{} (invalid '{}')", RgbColor::BLACK, requested)
            }
        }
    }
}
