//! Error types for the Bates stamping library

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the Bates stamping library
#[derive(Error, Debug)]
pub enum Error {
    /// PDF processing error
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stamp color could not be parsed
    #[error("Invalid color '{0}'")]
    ColorParse(String),

    /// Unknown placement name
    #[error("Invalid position '{0}' (expected one of: bottom-right, bottom-left, top-right, top-left, center)")]
    InvalidPlacement(String),

    /// Stamp configuration out of range
    #[error("Invalid stamp settings: {0}")]
    InvalidStampSpec(String),

    /// External normalization process missing, failed or timed out
    #[error("External normalization unavailable: {0}")]
    NormalizationUnavailable(String),

    /// In-process re-serialization fallback failed
    #[error("Re-serialization failed: {0}")]
    Reserialization(String),

    /// Input could not be parsed as a PDF
    #[error("Could not parse {}: {reason}", .path.display())]
    DocumentParse { path: PathBuf, reason: String },

    /// File not found
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Path exists but is not a directory
    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// Invalid glob pattern or unreadable entry during discovery
    #[error("Discovery error: {0}")]
    Glob(String),

    /// General error
    #[error("{0}")]
    General(String),
}

impl From<glob::PatternError> for Error {
    fn from(e: glob::PatternError) -> Self {
        Error::Glob(e.to_string())
    }
}

impl From<glob::GlobError> for Error {
    fn from(e: glob::GlobError) -> Self {
        Error::Glob(e.to_string())
    }
}
