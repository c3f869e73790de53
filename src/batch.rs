//! Batch stamping of a directory tree
//!
//! Documents are discovered up front and processed one at a time in path
//! order. The caller owns the [`RunCounter`]; it only moves forward after a
//! document has been stamped and written in full, so a failed file never
//! consumes numbers.

use std::fs;
use std::path::{Component, Path, PathBuf};

use glob::{glob_with, MatchOptions, Pattern};
use tempfile::TempDir;

use crate::bates::{format_bates_number, RunCounter, StampSpec};
use crate::error::{Error, Result};
use crate::pdf::compose::stamp_document;
use crate::pdf::document::{open_document_lenient, save_document};
use crate::pdf::flatten::{FlattenOutcome, Flattener};

/// Extension (compared case-insensitively) of the files that get stamped
pub const DOCUMENT_EXTENSION: &str = "pdf";

/// Prefix of the per-run input flattening workspace
const WORKSPACE_PREFIX: &str = "bates_temp_";

/// Where to read from, where to write to, and which normalization passes to run
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Root of the tree to stamp
    pub input_dir: PathBuf,
    /// Root of the mirrored output tree
    pub output_dir: PathBuf,
    /// Normalize each input before stamping
    pub flatten_input: bool,
    /// Normalize each output after stamping
    pub flatten_output: bool,
}

impl BatchOptions {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            flatten_input: false,
            flatten_output: false,
        }
    }
}

/// What happened to one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Every page was stamped, numbered `first..=last`
    Stamped { pages: usize, first: u64, last: u64 },
    /// Nothing was counted for this document
    Failed { error: String },
}

#[derive(Debug, Clone)]
pub struct FileReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub outcome: FileOutcome,
}

/// Aggregate result of one batch run
#[derive(Debug, Clone)]
pub struct BatchReport {
    prefix: String,
    start_number: u64,
    pub files: Vec<FileReport>,
}

impl BatchReport {
    fn new(prefix: &str, start_number: u64) -> Self {
        Self {
            prefix: prefix.to_string(),
            start_number,
            files: Vec::new(),
        }
    }

    /// Counter value at the start of the run
    pub fn start_number(&self) -> u64 {
        self.start_number
    }

    pub fn files_succeeded(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f.outcome, FileOutcome::Stamped { .. }))
            .count()
    }

    pub fn files_failed(&self) -> usize {
        self.files.len() - self.files_succeeded()
    }

    pub fn pages_stamped(&self) -> u64 {
        self.files
            .iter()
            .map(|f| match f.outcome {
                FileOutcome::Stamped { pages, .. } => pages as u64,
                FileOutcome::Failed { .. } => 0,
            })
            .sum()
    }

    /// First number a follow-up run should start from
    pub fn next_number(&self) -> u64 {
        self.start_number + self.pages_stamped()
    }

    /// The last Bates number issued, or `None` if no page was stamped
    pub fn last_bates_number(&self) -> Option<String> {
        match self.pages_stamped() {
            0 => None,
            pages => Some(format_bates_number(&self.prefix, self.start_number + pages - 1)),
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Path, &str)> {
        self.files.iter().filter_map(|f| match &f.outcome {
            FileOutcome::Failed { error } => Some((f.input.as_path(), error.as_str())),
            FileOutcome::Stamped { .. } => None,
        })
    }
}

/// Directories and documents found under an input root, relative to it and sorted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    pub directories: Vec<PathBuf>,
    pub documents: Vec<PathBuf>,
}

/// Walk `input_dir` recursively
///
/// `exclude` is a path relative to `input_dir` whose subtree is skipped.
/// Directory symlinks are listed nowhere and never descended into.
/// Unreadable entries are logged and skipped.
pub fn discover(input_dir: &Path, exclude: Option<&Path>) -> Result<Discovery> {
    let root = pattern_root(input_dir);
    let pattern = if root.as_os_str().is_empty() {
        "**/*".to_string()
    } else {
        let base = Pattern::escape(&root.to_string_lossy());
        let base = base.trim_end_matches(|c: char| c == '/' || c == std::path::MAIN_SEPARATOR);
        format!("{}/**/*", base)
    };

    let mut discovery = Discovery::default();

    for entry in glob_with(&pattern, MatchOptions::new())? {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };

        let relative = match path.strip_prefix(&root) {
            Ok(relative) => relative,
            Err(_) => {
                tracing::warn!("Skipping {}: not below {}", path.display(), input_dir.display());
                continue;
            }
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        if exclude.is_some_and(|ex| relative.starts_with(ex)) {
            continue;
        }
        if crosses_directory_symlink(&path, relative) {
            tracing::debug!("Not following directory symlink at {}", path.display());
            continue;
        }

        if path.is_dir() {
            discovery.directories.push(relative.to_path_buf());
        } else if path.is_file() && is_document(&path) {
            discovery.documents.push(relative.to_path_buf());
        }
    }

    discovery.directories.sort();
    discovery.documents.sort();

    Ok(discovery)
}

/// `input_dir` without `.` components, the form glob reports its matches in
fn pattern_root(input_dir: &Path) -> PathBuf {
    input_dir
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Whether `path` is, or lies below, a symlink to a directory
///
/// Only the components of `relative` (the part below the input root) are checked.
fn crosses_directory_symlink(path: &Path, relative: &Path) -> bool {
    let depth = relative.components().count();
    path.ancestors().take(depth).any(|candidate| {
        fs::symlink_metadata(candidate).is_ok_and(|meta| meta.file_type().is_symlink())
            && candidate.is_dir()
    })
}

/// Whether a path has the stamped document extension, ignoring case
pub fn is_document(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(DOCUMENT_EXTENSION))
}

/// Runs one stamping pass over a directory tree
#[derive(Debug, Clone)]
pub struct BatchRunner {
    options: BatchOptions,
    spec: StampSpec,
    flattener: Flattener,
}

impl BatchRunner {
    pub fn new(options: BatchOptions, spec: StampSpec, flattener: Flattener) -> Self {
        Self {
            options,
            spec,
            flattener,
        }
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    pub fn spec(&self) -> &StampSpec {
        &self.spec
    }

    /// Stamp every document under the input directory
    ///
    /// Numbering continues from `counter`, which is advanced by the page count
    /// of each document written. Only setup problems (missing input directory,
    /// unwritable output root, unusable discovery pattern) are returned as
    /// errors; per-file failures end up in the report.
    pub fn run(&self, counter: &mut RunCounter) -> Result<BatchReport> {
        let input_dir = &self.options.input_dir;
        let output_dir = &self.options.output_dir;

        if !input_dir.exists() {
            return Err(Error::FileNotFound(input_dir.clone()));
        }
        if !input_dir.is_dir() {
            return Err(Error::NotADirectory(input_dir.clone()));
        }
        fs::create_dir_all(output_dir)?;

        let exclude = nested_output(input_dir, output_dir);
        if let Some(ref nested) = exclude {
            tracing::debug!("Output directory is inside the input tree; skipping {}", nested.display());
        }

        let discovery = discover(input_dir, exclude.as_deref())?;
        tracing::info!(
            "Found {} PDF files in {} directories",
            discovery.documents.len(),
            discovery.directories.len() + 1
        );

        for dir in &discovery.directories {
            if let Err(e) = fs::create_dir_all(output_dir.join(dir)) {
                tracing::warn!("Could not create {}: {}", output_dir.join(dir).display(), e);
            }
        }

        let workspace = if self.options.flatten_input {
            create_workspace()
        } else {
            None
        };

        let mut report = BatchReport::new(self.spec.prefix(), counter.next());

        for relative in &discovery.documents {
            let input = input_dir.join(relative);
            let output = output_dir.join(relative);
            tracing::info!("Processing: {}", input.display());

            let first = counter.next();
            let outcome = match self.process_file(&input, &output, relative, workspace.as_ref(), first) {
                Ok(pages) => {
                    counter.advance(pages);
                    tracing::info!("Successfully saved to: {}", output.display());
                    let last = first + (pages as u64).saturating_sub(1);
                    FileOutcome::Stamped { pages, first, last }
                }
                Err(e) => {
                    tracing::error!("Error processing {}: {}", input.display(), e);
                    FileOutcome::Failed { error: e.to_string() }
                }
            };

            report.files.push(FileReport {
                input,
                output,
                outcome,
            });
        }

        if let Some(workspace) = workspace {
            let path = workspace.path().to_path_buf();
            if let Err(e) = workspace.close() {
                tracing::warn!("Could not remove temporary directory {}: {}", path.display(), e);
            }
        }

        Ok(report)
    }

    /// Stamp one document, returning its page count
    ///
    /// The output path is left without a partial file when this fails.
    fn process_file(
        &self,
        input: &Path,
        output: &Path,
        relative: &Path,
        workspace: Option<&TempDir>,
        first_number: u64,
    ) -> Result<usize> {
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }

        let staged_input = workspace.and_then(|ws| self.pre_flatten(input, &ws.path().join(relative)));
        let source = staged_input.as_deref().unwrap_or(input);

        let mut doc = open_document_lenient(source)?;
        let pages = stamp_document(&mut doc, &self.spec, first_number)?;
        tracing::info!("Found {} pages", pages);

        if let Err(e) = self.write_output(&mut doc, output) {
            if output.is_file() {
                if let Err(cleanup) = fs::remove_file(output) {
                    tracing::warn!("Could not remove partial output {}: {}", output.display(), cleanup);
                }
            }
            return Err(e);
        }

        Ok(pages)
    }

    /// Flatten `input` into the workspace, or `None` to keep using the original
    fn pre_flatten(&self, input: &Path, staged: &Path) -> Option<PathBuf> {
        tracing::info!("Pre-flattening input PDF...");

        if let Some(parent) = staged.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                tracing::warn!("Error flattening input: {}, using original file", e);
                return None;
            }
        }

        let outcome = self.flattener.flatten(input, staged);
        if outcome.succeeded() {
            Some(staged.to_path_buf())
        } else {
            tracing::warn!(
                "Input flattening fell back to {}, using original file",
                outcome.tier_name()
            );
            None
        }
    }

    /// Save the stamped document, through a staging file when output flattening is on
    fn write_output(&self, doc: &mut lopdf::Document, output: &Path) -> Result<()> {
        if !self.options.flatten_output {
            return save_document(doc, output);
        }

        let dir = output.parent().unwrap_or_else(|| Path::new("."));
        let staging = tempfile::Builder::new()
            .prefix(".bates_")
            .suffix(".temp.pdf")
            .tempfile_in(dir)?
            .into_temp_path();

        let written = save_document(doc, &staging);
        let outcome = written.map(|()| self.flattener.flatten(&staging, output));

        let staging_path = staging.to_path_buf();
        if let Err(e) = staging.close() {
            tracing::warn!("Could not remove staging file {}: {}", staging_path.display(), e);
        }

        accept_flattened_output(&outcome?, output)
    }
}

/// Decide whether a post-stamp flatten left a usable output file
///
/// A byte copy is accepted (the stamp is there, just not normalized); only a
/// missing output fails the document.
fn accept_flattened_output(outcome: &FlattenOutcome, output: &Path) -> Result<()> {
    if !outcome.wrote_output() {
        return Err(Error::General(format!(
            "could not write {}: {:?}",
            output.display(),
            outcome
        )));
    }
    if !outcome.succeeded() {
        tracing::warn!("Output flattening fell back to {}", outcome.tier_name());
    }
    Ok(())
}

/// The output directory relative to the input directory, when it is nested inside it
fn nested_output(input_dir: &Path, output_dir: &Path) -> Option<PathBuf> {
    let input = input_dir.canonicalize().ok()?;
    let output = output_dir.canonicalize().ok()?;
    output
        .strip_prefix(&input)
        .ok()
        .filter(|rel| !rel.as_os_str().is_empty())
        .map(Path::to_path_buf)
}

fn create_workspace() -> Option<TempDir> {
    match tempfile::Builder::new().prefix(WORKSPACE_PREFIX).tempdir() {
        Ok(dir) => Some(dir),
        Err(e) => {
            tracing::warn!("Could not create temporary directory, input flattening disabled: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"%PDF-1.4\n").unwrap();
    }

    #[test]
    fn test_is_document() {
        assert!(is_document(Path::new("a.pdf")));
        assert!(is_document(Path::new("dir/B.PDF")));
        assert!(is_document(Path::new("c.Pdf")));
        assert!(!is_document(Path::new("d.pdf.txt")));
        assert!(!is_document(Path::new("pdf")));
        assert!(!is_document(Path::new("e.docx")));
    }

    #[test]
    fn test_discover_sorted_and_filtered() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path();
        touch(&root.join("b.pdf"));
        touch(&root.join("a.PDF"));
        touch(&root.join("notes.txt"));
        touch(&root.join("sub/z.pdf"));
        touch(&root.join("sub/deeper/c.pdf"));
        fs::create_dir_all(root.join("empty")).unwrap();

        let found = discover(root, None).unwrap();

        assert_eq!(
            found.documents,
            vec![
                PathBuf::from("a.PDF"),
                PathBuf::from("b.pdf"),
                PathBuf::from("sub/deeper/c.pdf"),
                PathBuf::from("sub/z.pdf"),
            ]
        );
        assert_eq!(
            found.directories,
            vec![PathBuf::from("empty"), PathBuf::from("sub"), PathBuf::from("sub/deeper")]
        );
    }

    #[test]
    fn test_discover_is_repeatable() {
        let dir = tempfile::TempDir::new().unwrap();
        for name in ["m.pdf", "c.pdf", "x/y.pdf", "x/a.pdf", "q.pdf"] {
            touch(&dir.path().join(name));
        }

        let first = discover(dir.path(), None).unwrap();
        let second = discover(dir.path(), None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_discover_skips_excluded_subtree() {
        let dir = tempfile::TempDir::new().unwrap();
        touch(&dir.path().join("in.pdf"));
        touch(&dir.path().join("out/in.pdf"));

        let found = discover(dir.path(), Some(Path::new("out"))).unwrap();
        assert_eq!(found.documents, vec![PathBuf::from("in.pdf")]);
        assert!(found.directories.is_empty());
    }

    #[test]
    fn test_discover_escapes_glob_characters_in_root() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path().join("case [2024]");
        touch(&root.join("exhibit.pdf"));

        let found = discover(&root, None).unwrap();
        assert_eq!(found.documents, vec![PathBuf::from("exhibit.pdf")]);
    }

    #[test]
    fn test_pattern_root_drops_current_dir() {
        assert_eq!(pattern_root(Path::new(".")), PathBuf::new());
        assert_eq!(pattern_root(Path::new("./")), PathBuf::new());
        assert_eq!(pattern_root(Path::new("./incoming")), PathBuf::from("incoming"));
        assert_eq!(pattern_root(Path::new("./incoming/")), PathBuf::from("incoming"));
        assert_eq!(pattern_root(Path::new("incoming/./sub")), PathBuf::from("incoming/sub"));
        assert_eq!(pattern_root(Path::new("/abs/dir")), PathBuf::from("/abs/dir"));
    }

    #[test]
    fn test_discover_dot_relative_roots() {
        let dir = tempfile::Builder::new().prefix("discover_").tempdir_in(".").unwrap();
        let name = dir.path().file_name().unwrap().to_string_lossy().into_owned();
        touch(&dir.path().join("a.pdf"));
        touch(&dir.path().join("sub/b.pdf"));

        let expected = vec![PathBuf::from("a.pdf"), PathBuf::from("sub/b.pdf")];
        for form in [name.clone(), format!("{}/", name), format!("./{}", name), format!("./{}/", name)] {
            let found = discover(Path::new(&form), None).unwrap();
            assert_eq!(found.documents, expected, "input dir {}", form);
            assert_eq!(found.directories, vec![PathBuf::from("sub")], "input dir {}", form);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_discover_does_not_follow_directory_symlinks() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path().join("in");
        touch(&root.join("sub/a.pdf"));
        touch(&root.join("elsewhere.pdf"));
        std::os::unix::fs::symlink(&root, root.join("sub/loop")).unwrap();
        std::os::unix::fs::symlink(root.join("elsewhere.pdf"), root.join("linked.pdf")).unwrap();

        let found = discover(&root, None).unwrap();

        assert_eq!(
            found.documents,
            vec![PathBuf::from("elsewhere.pdf"), PathBuf::from("linked.pdf"), PathBuf::from("sub/a.pdf")]
        );
        assert_eq!(found.directories, vec![PathBuf::from("sub")]);
    }

    #[test]
    fn test_accept_flattened_output() {
        let output = Path::new("out/a.pdf");

        assert!(accept_flattened_output(&FlattenOutcome::External, output).is_ok());
        assert!(accept_flattened_output(&FlattenOutcome::Reserialized { reason: "no gs".into() }, output).is_ok());
        assert!(accept_flattened_output(&FlattenOutcome::Copied { reason: "bad xref".into() }, output).is_ok());
        assert!(accept_flattened_output(&FlattenOutcome::Failed { reason: "read-only".into() }, output).is_err());
    }

    #[test]
    fn test_nested_output_detection() {
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("in");
        let nested = input.join("stamped");
        let sibling = dir.path().join("out");
        fs::create_dir_all(&nested).unwrap();
        fs::create_dir_all(&sibling).unwrap();

        assert_eq!(nested_output(&input, &nested), Some(PathBuf::from("stamped")));
        assert_eq!(nested_output(&input, &sibling), None);
        assert_eq!(nested_output(&input, &input), None);
    }

    #[test]
    fn test_report_totals() {
        let mut report = BatchReport::new("BATES-", 1);
        assert_eq!(report.last_bates_number(), None);

        report.files.push(FileReport {
            input: PathBuf::from("a.pdf"),
            output: PathBuf::from("out/a.pdf"),
            outcome: FileOutcome::Stamped { pages: 2, first: 1, last: 2 },
        });
        report.files.push(FileReport {
            input: PathBuf::from("bad.pdf"),
            output: PathBuf::from("out/bad.pdf"),
            outcome: FileOutcome::Failed { error: "broken".into() },
        });
        report.files.push(FileReport {
            input: PathBuf::from("b.pdf"),
            output: PathBuf::from("out/b.pdf"),
            outcome: FileOutcome::Stamped { pages: 1, first: 3, last: 3 },
        });

        assert_eq!(report.files_succeeded(), 2);
        assert_eq!(report.files_failed(), 1);
        assert_eq!(report.pages_stamped(), 3);
        assert_eq!(report.next_number(), 4);
        assert_eq!(report.last_bates_number().as_deref(), Some("BATES-000003"));
        assert_eq!(report.failures().count(), 1);
    }
}
