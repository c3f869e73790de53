//! Document normalization ("flattening")
//!
//! Three tiers, tried in order:
//! 1. Ghostscript `pdfwrite` at print quality and PDF 1.4 compatibility.
//!    This is the only tier that really flattens.
//! 2. Re-parse with lopdf and rebuild the document page by page. This only
//!    re-encodes the file; editable structure and vector content survive.
//! 3. Copy the input bytes unchanged.
//!
//! The tier that produced the output is returned as a [`FlattenOutcome`].

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use lopdf::{Dictionary, Document, Object};

use crate::error::{Error, Result};
use crate::pdf::compose::copy_dictionary_deep;
use crate::pdf::document::{inherited_attribute, page_ids, INHERITABLE_PAGE_KEYS};

/// Default limit for one Ghostscript run
pub const DEFAULT_GS_TIMEOUT: Duration = Duration::from_secs(300);

/// PDF version written by both normalization tiers
pub const COMPATIBILITY_LEVEL: &str = "1.4";

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Name of the Ghostscript console executable on this platform
pub fn default_ghostscript_program() -> &'static str {
    if cfg!(windows) {
        "gswin64c"
    } else {
        "gs"
    }
}

/// Which tier produced the output of a flatten call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlattenOutcome {
    /// Ghostscript rewrote the document
    External,
    /// Ghostscript was unusable (`reason`); the document was re-serialized instead
    Reserialized { reason: String },
    /// Re-serialization failed (`reason`); the output is a byte copy of the input
    Copied { reason: String },
    /// Nothing could be written to the output path
    Failed { reason: String },
}

impl FlattenOutcome {
    /// True when some form of normalization took place
    pub fn succeeded(&self) -> bool {
        matches!(self, FlattenOutcome::External | FlattenOutcome::Reserialized { .. })
    }

    /// True when the output path holds a usable file
    pub fn wrote_output(&self) -> bool {
        !matches!(self, FlattenOutcome::Failed { .. })
    }

    pub fn tier_name(&self) -> &'static str {
        match self {
            FlattenOutcome::External => "ghostscript",
            FlattenOutcome::Reserialized { .. } => "re-serialization",
            FlattenOutcome::Copied { .. } => "byte copy",
            FlattenOutcome::Failed { .. } => "none",
        }
    }
}

/// Normalizes PDFs, degrading through the tiers described above
#[derive(Debug, Clone)]
pub struct Flattener {
    program: PathBuf,
    timeout: Duration,
}

impl Default for Flattener {
    fn default() -> Self {
        Self {
            program: PathBuf::from(default_ghostscript_program()),
            timeout: DEFAULT_GS_TIMEOUT,
        }
    }
}

impl Flattener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific Ghostscript executable
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Kill Ghostscript if it runs longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Normalize `input` into `output`
    ///
    /// Never fails: every error is folded into the returned outcome.
    pub fn flatten(&self, input: &Path, output: &Path) -> FlattenOutcome {
        let unavailable = match self.run_external(input, output) {
            Ok(()) => {
                tracing::info!("Flattened PDF using Ghostscript");
                return FlattenOutcome::External;
            }
            Err(e) => e,
        };

        tracing::info!("{}; using re-serialization fallback", unavailable);

        let reserialize_error = match reserialize_pdf(input, output) {
            Ok(()) => {
                return FlattenOutcome::Reserialized {
                    reason: unavailable.to_string(),
                }
            }
            Err(e) => e,
        };

        tracing::warn!("Error in re-serialization fallback: {}", reserialize_error);

        match std::fs::copy(input, output) {
            Ok(_) => {
                tracing::warn!("Copied {} unchanged", input.display());
                FlattenOutcome::Copied {
                    reason: reserialize_error.to_string(),
                }
            }
            Err(e) => {
                tracing::warn!("Could not copy {} to {}: {}", input.display(), output.display(), e);
                FlattenOutcome::Failed {
                    reason: format!("{}; copy failed: {}", reserialize_error, e),
                }
            }
        }
    }

    /// Run Ghostscript, succeeding only on a clean exit with non-empty output
    fn run_external(&self, input: &Path, output: &Path) -> Result<()> {
        let unavailable = |msg: String| Error::NormalizationUnavailable(msg);
        let program = self.program.display();

        // Ghostscript's diagnostics go to a file so a chatty run cannot block on a full pipe
        let mut stderr_log = tempfile::tempfile()
            .map_err(|e| unavailable(format!("could not create log file: {}", e)))?;
        let stderr_handle = stderr_log
            .try_clone()
            .map_err(|e| unavailable(format!("could not create log file: {}", e)))?;

        // A stale file must not pass for Ghostscript output
        if output.exists() {
            std::fs::remove_file(output)
                .map_err(|e| unavailable(format!("could not replace {}: {}", output.display(), e)))?;
        }

        let mut child = Command::new(&self.program)
            .args(ghostscript_args(input, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr_handle))
            .spawn()
            .map_err(|e| unavailable(format!("could not start {}: {}", program, e)))?;

        let status = wait_with_timeout(&mut child, self.timeout)
            .map_err(|e| unavailable(format!("lost track of {}: {}", program, e)))?;

        let diagnostics = read_log(&mut stderr_log);
        if !diagnostics.is_empty() {
            tracing::debug!("{} stderr: {}", program, diagnostics);
        }

        let Some(status) = status else {
            return Err(unavailable(format!(
                "{} timed out after {}s",
                program,
                self.timeout.as_secs()
            )));
        };

        if !status.success() {
            return Err(unavailable(format!("{} exited with {}", program, status)));
        }

        match std::fs::metadata(output) {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(unavailable(format!("{} produced no output", program))),
        }
    }
}

/// Command line for a print-quality pdfwrite pass
pub fn ghostscript_args(input: &Path, output: &Path) -> Vec<OsString> {
    let mut output_flag = OsString::from("-sOutputFile=");
    output_flag.push(output.as_os_str());

    let mut args: Vec<OsString> = [
        "-q",
        "-dNOPAUSE",
        "-dBATCH",
        "-dSAFER",
        "-sDEVICE=pdfwrite",
        "-dCompatibilityLevel=1.4",
        "-dPDFSETTINGS=/prepress",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();

    args.push(output_flag);
    args.push(input.as_os_str().to_os_string());
    args
}

/// Wait for the child, killing it once `timeout` has passed
///
/// Returns `None` when the child was killed.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let started = Instant::now();

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if started.elapsed() >= timeout {
            if let Err(e) = child.kill() {
                tracing::warn!("Could not kill timed-out process: {}", e);
            }
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn read_log(file: &mut File) -> String {
    let mut text = String::new();
    if file.seek(SeekFrom::Start(0)).is_ok() {
        let _ = file.read_to_string(&mut text);
    }
    text.trim().to_string()
}

/// Rebuild a PDF page by page into a fresh document
///
/// Inherited page attributes are copied onto each page. Document-level
/// structures (outlines, forms, metadata) are not carried over.
pub fn reserialize_pdf(input: &Path, output: &Path) -> Result<()> {
    let fail = |e: &dyn std::fmt::Display| Error::Reserialization(e.to_string());

    let source = Document::load(input).map_err(|e| fail(&e))?;
    let source_pages = page_ids(&source);

    let mut doc = Document::with_version(COMPATIBILITY_LEVEL);
    let pages_id = doc.new_object_id();

    // Reserve every page's new ID first so links between pages resolve to the
    // rebuilt pages instead of dragging in the old page tree
    let mut cache = HashMap::new();
    let mut kids = Vec::with_capacity(source_pages.len());
    for page_id in &source_pages {
        let new_id = doc.new_object_id();
        cache.insert(*page_id, new_id);
        kids.push(Object::Reference(new_id));
    }

    for page_id in &source_pages {
        let mut page = source.get_dictionary(*page_id).map_err(|e| fail(&e))?.clone();
        for key in INHERITABLE_PAGE_KEYS {
            if !page.has(key) {
                if let Some(value) = inherited_attribute(&source, *page_id, key) {
                    page.set(key.to_vec(), value);
                }
            }
        }
        page.remove(b"Parent");

        let mut copied = copy_dictionary_deep(&mut doc, &source, &page, &mut cache).map_err(|e| fail(&e))?;
        copied.set("Parent", Object::Reference(pages_id));
        doc.objects.insert(cache[page_id], Object::Dictionary(copied));
    }

    let mut pages = Dictionary::new();
    pages.set("Type", Object::Name(b"Pages".to_vec()));
    pages.set("Count", Object::Integer(kids.len() as i64));
    pages.set("Kids", Object::Array(kids));
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]));
    doc.trailer.set("Root", Object::Reference(catalog_id));

    doc.compress();
    doc.save(output).map_err(|e| fail(&e))?;

    Ok(())
}
