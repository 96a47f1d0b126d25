//! model-maker: build surface models from a label volume.
//!
//! Reads a NRRD segmentation, makes one smoothed and decimated surface per
//! selected label, writes each as a VTK polydata file and registers them in
//! a model scene.
//!
//! # Logging
//!
//! Set the `RUST_LOG` environment variable to control log output:
//! - `RUST_LOG=model_maker=info` - Stage summaries
//! - `RUST_LOG=model_maker=debug` - Per-label detail
//! - `RUST_LOG=model_maker::timing=debug` - Performance timing
//! - `RUST_LOG=debug` - All debug output
//!
//! # Example
//!
//! ```bash
//! # Every labeled structure, named from a color table
//! model-maker seg.nrrd --generate-all --color-table colors.txt --scene out/seg.mrml
//!
//! # A single label with heavier smoothing, parameters from a file
//! model-maker seg.nrrd --labels 3 --name Liver --config run.toml --smooth 30
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use model_maker::{FilterType, ModelMaker, ModelMakerParams, ProgressReporter, RunReport};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod output;

/// model-maker - Build surface models from a label volume.
///
/// Each selected label becomes a triangle surface in patient coordinates,
/// written next to the scene file that lists it.
#[derive(Parser, Debug)]
#[command(name = "model-maker")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input label volume (.nrrd or .nhdr)
    input: PathBuf,

    /// Pipeline parameters from a TOML file; explicit flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Labels to make models from, comma separated
    #[arg(long, value_delimiter = ',')]
    labels: Vec<i32>,

    /// First label of a range
    #[arg(long, allow_negative_numbers = true)]
    start_label: Option<i32>,

    /// Last label of a range
    #[arg(long, allow_negative_numbers = true)]
    end_label: Option<i32>,

    /// Make a model for every label in the volume
    #[arg(long)]
    generate_all: bool,

    /// Base model name
    #[arg(long)]
    name: Option<String>,

    /// Smooth all labels together so shared boundaries match
    #[arg(long)]
    joint_smoothing: bool,

    /// Smoothing iterations (0 disables smoothing)
    #[arg(long)]
    smooth: Option<u32>,

    /// Target triangle reduction in [0, 1)
    #[arg(long)]
    decimate: Option<f64>,

    /// Split vertices along sharp edges
    #[arg(long, overrides_with = "no_split_normals")]
    split_normals: bool,

    #[arg(long, overrides_with = "split_normals", hide = true)]
    no_split_normals: bool,

    /// Compute per-vertex normals
    #[arg(long, overrides_with = "no_point_normals")]
    point_normals: bool,

    #[arg(long, overrides_with = "point_normals", hide = true)]
    no_point_normals: bool,

    /// Add a background border so labels touching the edge are closed
    #[arg(long)]
    pad: bool,

    /// Smoothing filter
    #[arg(long)]
    filter_type: Option<CliFilterType>,

    /// Scene file, optionally `path#hierarchyNodeId`
    #[arg(long)]
    scene: Option<String>,

    /// Scene whose model hierarchy organizes the new models by name
    #[arg(long)]
    model_hierarchy_file: Option<PathBuf>,

    /// Color table naming and coloring the labels
    #[arg(long)]
    color_table: Option<PathBuf>,

    /// Skip labels without a name
    #[arg(long, overrides_with = "no_skip_unnamed")]
    skip_unnamed: bool,

    #[arg(long, overrides_with = "skip_unnamed", hide = true)]
    no_skip_unnamed: bool,

    /// Also save the surface after extraction, decimation and smoothing
    #[arg(long)]
    save_intermediate: bool,

    /// Log every stage of every label
    #[arg(long)]
    debug: bool,

    /// Output format for results
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Suppress all non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Increase output verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum CliFilterType {
    /// Windowed sinc, keeps volume
    Sinc,
    /// Laplacian relaxation
    Laplacian,
}

impl From<CliFilterType> for FilterType {
    fn from(value: CliFilterType) -> Self {
        match value {
            CliFilterType::Sinc => FilterType::Sinc,
            CliFilterType::Laplacian => FilterType::Laplacian,
        }
    }
}

/// `Some(true)` for `--flag`, `Some(false)` for `--no-flag`, `None` when
/// neither was given.
fn switch(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

impl Cli {
    /// Parameters of the run: the config file (or defaults) with every
    /// explicitly given flag applied on top.
    fn params(&self) -> Result<ModelMakerParams> {
        let mut params = match &self.config {
            Some(path) => ModelMakerParams::from_toml_file(path)
                .with_context(|| format!("Failed to read parameters from {:?}", path))?,
            None => ModelMakerParams::default(),
        };

        if !self.labels.is_empty() {
            params.labels = self.labels.clone();
        }
        if let Some(start) = self.start_label {
            params.start_label = start;
        }
        if let Some(end) = self.end_label {
            params.end_label = end;
        }
        params.generate_all |= self.generate_all;
        if let Some(name) = &self.name {
            params.name = name.clone();
        }
        params.joint_smoothing |= self.joint_smoothing;
        if let Some(smooth) = self.smooth {
            params.smooth = smooth;
        }
        if let Some(decimate) = self.decimate {
            params.decimate = decimate;
        }
        if let Some(split) = switch(self.split_normals, self.no_split_normals) {
            params.split_normals = split;
        }
        if let Some(point) = switch(self.point_normals, self.no_point_normals) {
            params.point_normals = point;
        }
        params.pad |= self.pad;
        if let Some(filter) = self.filter_type {
            params.filter_type = filter.into();
        }
        if let Some(scene) = &self.scene {
            params.scene = Some(scene.clone());
        }
        if let Some(path) = &self.model_hierarchy_file {
            params.model_hierarchy_file = Some(path.clone());
        }
        if let Some(path) = &self.color_table {
            params.color_table = Some(path.clone());
        }
        if let Some(skip) = switch(self.skip_unnamed, self.no_skip_unnamed) {
            params.skip_unnamed = skip;
        }
        params.save_intermediate |= self.save_intermediate;
        params.debug |= self.debug;
        Ok(params)
    }
}

/// Prints one line per pipeline step to stderr.
struct ConsoleProgress {
    enabled: bool,
}

impl ProgressReporter for ConsoleProgress {
    fn report_progress(&self, current: u64, total: u64, message: &str) -> bool {
        if self.enabled {
            let percent = if total == 0 {
                100
            } else {
                (current * 100 / total).min(100)
            };
            eprintln!("{} {}", format!("[{:>3}%]", percent).dimmed(), message);
        }
        true
    }
}

/// Initialize the tracing subscriber based on verbosity level.
fn init_tracing(verbose: u8, debug: bool, quiet: bool) {
    if quiet {
        return;
    }

    // RUST_LOG wins over the -v flags.
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match (verbose, debug) {
            (0, false) => "warn",
            (1, false) => "model_maker=info",
            (0..=2, _) => "model_maker=debug",
            _ => "trace",
        };
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(filter)
        .init();
}

fn print_report(report: &RunReport, cli: &Cli) {
    match cli.format {
        OutputFormat::Json => output::print(report, cli.format, cli.quiet),
        OutputFormat::Text => {
            if cli.quiet {
                return;
            }
            println!(
                "{}: {}",
                "Made models from labels".cyan(),
                output::label_list(&report.made_labels())
            );
            println!(
                "{}: {}",
                "Skipped making models from labels".cyan(),
                output::label_list(&report.skipped_labels())
            );
            for skipped in &report.skipped {
                println!("  {} {}: {}", "-".dimmed(), skipped.label, skipped.reason);
            }
            output::success(
                &format!(
                    "{} models registered in {}",
                    report.made.len(),
                    report.scene.display()
                ),
                cli.format,
                cli.quiet,
            );
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let params = cli.params()?;
    tracing::debug!(?params, "Run parameters");
    let debug = params.debug;
    let maker = ModelMaker::new(params)?;

    output::info(
        &format!("Making models from {}", cli.input.display()),
        cli.format,
        cli.quiet,
    );

    let progress = ConsoleProgress {
        enabled: matches!(cli.format, OutputFormat::Text) && !cli.quiet && (debug || cli.verbose > 0),
    };
    let report = maker.run(&cli.input, &progress)?;

    if report.made.is_empty() {
        output::warn("no models were made", cli.quiet);
    }
    print_report(&report, cli);
    Ok(())
}

fn main() -> Result<()> {
    // Nicer panic reports in development builds.
    #[cfg(debug_assertions)]
    miette::set_panic_hook();

    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.debug, cli.quiet);

    let result = run(&cli);

    if let Err(e) = &result {
        if !cli.quiet {
            if let Some(model_err) = e.downcast_ref::<model_maker::ModelError>() {
                eprintln!("{}: {}", "Error".red().bold(), model_err);
                eprintln!("  {}: {}", "Code".cyan(), model_err.code());
                eprintln!(
                    "  {}: {}",
                    "Suggestion".green(),
                    model_err.recovery_suggestion()
                );
                if let Some(location) = model_err.location() {
                    eprintln!("  {}: {}", "Location".yellow(), location);
                }
            } else {
                eprintln!("{}: {}", "Error".red().bold(), e);
                for cause in e.chain().skip(1) {
                    eprintln!("  {}: {}", "Caused by".yellow(), cause);
                }
            }
        }
        std::process::exit(1);
    }

    Ok(())
}
