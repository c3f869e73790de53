//! Bates Stamping Library
//!
//! A library for applying sequential Bates numbers to every page of every PDF
//! in a directory tree. This library provides functionality to:
//! - Compute stamp positions from page geometry
//! - Render a single-page stamp overlay and composite it onto existing pages
//! - Normalize ("flatten") documents through Ghostscript, with fallbacks
//! - Walk a directory tree with one run-wide page counter
//!
//! # Example
//!
//! ```no_run
//! use bates_stamp::batch::{BatchOptions, BatchRunner};
//! use bates_stamp::pdf::Flattener;
//! use bates_stamp::StampSpec;
//!
//! let spec = StampSpec::default();
//! let options = BatchOptions::new("productions/incoming", "productions/stamped");
//! let runner = BatchRunner::new(options, spec.clone(), Flattener::new());
//!
//! let mut counter = spec.counter();
//! let report = runner.run(&mut counter).expect("Failed to start batch");
//! println!("Last number: {:?}", report.last_bates_number());
//! ```

pub mod error;
pub mod bates;
pub mod color;
pub mod layout;
pub mod pdf;
pub mod batch;

// Re-export commonly used items
pub use bates::{format_bates_number, parse_bates_number, RunCounter, StampSpec};
pub use color::{RgbColor, StampColor};
pub use error::{Error, Result};
pub use layout::{resolve_position, Placement};
