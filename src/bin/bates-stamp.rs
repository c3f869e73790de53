//! Bates stamping CLI tool
//!
//! Stamps every PDF under an input directory with sequential Bates numbers and
//! writes the results to a mirrored output directory.

use anyhow::{bail, Context};
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use bates_stamp::batch::{BatchOptions, BatchReport, BatchRunner};
use bates_stamp::pdf::Flattener;
use bates_stamp::{Placement, StampColor, StampSpec};

/// Bates Stamp - Number every page of every PDF in a directory tree
#[derive(Parser)]
#[command(name = "bates-stamp")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "EXAMPLES:
    # Stamp a production with the defaults (BATES-000001, bottom right)
    bates-stamp ./incoming ./stamped

    # Continue a production at 1501 with a custom prefix
    bates-stamp ./volume2 ./stamped2 --prefix ACME- --start 1501

    # Red stamp in the top left, normalizing PDFs before and after
    bates-stamp ./in ./out --position top-left --color #cc0000 --flatten-input --flatten-output")]
struct Cli {
    /// Directory containing the PDFs to stamp (searched recursively)
    input_dir: PathBuf,

    /// Directory to write stamped PDFs to (created if missing)
    output_dir: PathBuf,

    /// Text placed before each number
    #[arg(long, default_value = "BATES-")]
    prefix: String,

    /// First Bates number to issue
    #[arg(long, default_value_t = 1)]
    start: u64,

    /// Stamp position: bottom-right, bottom-left, top-right, top-left or center
    #[arg(long, default_value = "bottom-right", value_parser = parse_placement)]
    position: Placement,

    /// Stamp color as hex (#rrggbb); invalid values fall back to black
    #[arg(long, default_value = "#000000")]
    color: String,

    /// Distance from the page edge in points
    #[arg(long, default_value_t = 10.0)]
    margin: f32,

    /// Font size in points
    #[arg(long, default_value_t = 12.0)]
    size: f32,

    /// Normalize each input through Ghostscript before stamping
    #[arg(long)]
    flatten_input: bool,

    /// Normalize each stamped output through Ghostscript
    #[arg(long)]
    flatten_output: bool,

    /// Ghostscript executable used for flattening
    #[arg(long, env = "BATES_GHOSTSCRIPT", value_name = "PATH")]
    ghostscript: Option<PathBuf>,

    /// Seconds to wait for one Ghostscript run before giving up on it
    #[arg(long, value_name = "SECS")]
    gs_timeout: Option<u64>,

    /// More log output (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn parse_placement(value: &str) -> Result<Placement, String> {
    value.parse().map_err(|e: bates_stamp::Error| e.to_string())
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

/// Log to stderr, filtered by RUST_LOG or else by the verbosity flag
fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    if !cli.input_dir.is_dir() {
        bail!("Input directory not found: {}", cli.input_dir.display());
    }

    let color = StampColor::parse_or_black(&cli.color);
    let spec = StampSpec::new(cli.prefix, cli.start, cli.position, color, cli.margin, cli.size)
        .context("Invalid stamp settings")?;

    let mut flattener = Flattener::new();
    if let Some(program) = cli.ghostscript {
        flattener = flattener.with_program(program);
    }
    if let Some(secs) = cli.gs_timeout {
        flattener = flattener.with_timeout(Duration::from_secs(secs));
    }

    let options = BatchOptions {
        input_dir: cli.input_dir,
        output_dir: cli.output_dir,
        flatten_input: cli.flatten_input,
        flatten_output: cli.flatten_output,
    };

    print_banner(&options, &spec, &flattener);

    let runner = BatchRunner::new(options, spec.clone(), flattener);
    let mut counter = spec.counter();
    let report = runner.run(&mut counter).context("Batch could not start")?;

    print_summary(&report);

    Ok(())
}

fn print_banner(options: &BatchOptions, spec: &StampSpec, flattener: &Flattener) {
    eprintln!("Bates stamping: {}", options.input_dir.display());
    eprintln!("Output:         {}", options.output_dir.display());
    eprintln!("Starting at:    {}", spec.label(spec.start_number()));
    eprintln!("Position:       {}", spec.placement());
    eprintln!("Color:          {}", spec.color());
    if options.flatten_input || options.flatten_output {
        eprintln!(
            "Flattening:     {}{}(via {})",
            if options.flatten_input { "input " } else { "" },
            if options.flatten_output { "output " } else { "" },
            flattener.program().display()
        );
    }
    eprintln!();
}

fn print_summary(report: &BatchReport) {
    eprintln!();
    eprintln!("Processing complete!");
    eprintln!("Files processed successfully: {}", report.files_succeeded());
    eprintln!("Files failed:                 {}", report.files_failed());
    eprintln!("Total pages stamped:          {}", report.pages_stamped());

    match report.last_bates_number() {
        Some(last) => eprintln!("Last Bates number used:       {}", last),
        None => eprintln!("Last Bates number used:       none (no pages were stamped)"),
    }

    if report.files_failed() > 0 {
        eprintln!();
        eprintln!("Failed files:");
        for (path, error) in report.failures() {
            eprintln!("  {}: {}", path.display(), error);
        }
    }
}
