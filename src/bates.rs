//! Bates numbers, stamp settings and the run counter

use crate::color::StampColor;
use crate::error::{Error, Result};
use crate::layout::Placement;

/// Minimum number of digits in the numeric part of a Bates number
pub const BATES_DIGITS: usize = 6;

/// Format a Bates number: the prefix followed by the zero-padded counter
///
/// Counters wider than six digits are printed in full, never truncated.
pub fn format_bates_number(prefix: &str, number: u64) -> String {
    format!("{}{:0width$}", prefix, number, width = BATES_DIGITS)
}

/// Recover the counter value from a label produced by [`format_bates_number`]
pub fn parse_bates_number(prefix: &str, label: &str) -> Option<u64> {
    let digits = label.strip_prefix(prefix)?;
    if digits.len() < BATES_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Stamp settings for one batch run
///
/// Built once and never changed afterwards; the label for a page depends only
/// on these settings and the page's position in the run.
#[derive(Debug, Clone, PartialEq)]
pub struct StampSpec {
    prefix: String,
    start_number: u64,
    placement: Placement,
    color: StampColor,
    margin: f32,
    font_size: f32,
}

impl StampSpec {
    pub fn new(
        prefix: impl Into<String>,
        start_number: u64,
        placement: Placement,
        color: StampColor,
        margin: f32,
        font_size: f32,
    ) -> Result<Self> {
        if !margin.is_finite() || margin < 0.0 {
            return Err(Error::InvalidStampSpec(format!(
                "margin must be a non-negative number of points, got {}",
                margin
            )));
        }
        if !font_size.is_finite() || font_size <= 0.0 {
            return Err(Error::InvalidStampSpec(format!(
                "font size must be positive, got {}",
                font_size
            )));
        }

        Ok(Self {
            prefix: prefix.into(),
            start_number,
            placement,
            color,
            margin,
            font_size,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn start_number(&self) -> u64 {
        self.start_number
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    pub fn color(&self) -> &StampColor {
        &self.color
    }

    pub fn margin(&self) -> f32 {
        self.margin
    }

    pub fn font_size(&self) -> f32 {
        self.font_size
    }

    /// The label stamped for a given counter value
    pub fn label(&self, number: u64) -> String {
        format_bates_number(&self.prefix, number)
    }

    /// A counter positioned at this stamp's starting number
    pub fn counter(&self) -> RunCounter {
        RunCounter::new(self.start_number)
    }
}

impl Default for StampSpec {
    fn default() -> Self {
        Self {
            prefix: "BATES-".to_string(),
            start_number: 1,
            placement: Placement::BottomRight,
            color: StampColor::default(),
            margin: 10.0,
            font_size: 12.0,
        }
    }
}

/// The running page number threaded through a batch
///
/// Only advances by the full page count of a document once that document has
/// been written successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunCounter {
    start: u64,
    next: u64,
}

impl RunCounter {
    pub fn new(start: u64) -> Self {
        Self { start, next: start }
    }

    /// Number to use for the next page stamped
    pub fn next(&self) -> u64 {
        self.next
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    /// Number for page `index` (0-based) of the document currently being stamped
    pub fn number_for_page(&self, index: usize) -> u64 {
        self.next.saturating_add(index as u64)
    }

    /// Pages issued so far
    pub fn pages_issued(&self) -> u64 {
        self.next - self.start
    }

    /// Last number issued, if any page has been stamped
    pub fn last_issued(&self) -> Option<u64> {
        (self.next > self.start).then(|| self.next - 1)
    }

    /// Commit a successfully written document
    ///
    /// Saturates at `u64::MAX`; documents that would need numbers past it are
    /// refused before stamping.
    pub fn advance(&mut self, pages: usize) {
        self.next = self.next.saturating_add(pages as u64);
    }
}
