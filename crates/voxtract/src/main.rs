//! voxtract: Command line driver for the extraction engine.
//!
//! Runs extraction documents against volume files, inspects
//! deduplication plans without executing anything, and emits synthetic
//! phantom volumes for experimentation. Useful for:
//!
//! - Checking how much preprocessing a document shares before a long run
//! - Comparing `--on-error` policies on flaky cohorts
//! - Collecting per-step timing reports for a configuration set
//!
//! # Usage
//!
//! ```text
//! voxtract phantom --out scan.vxl --mask-out mask.vxl
//! voxtract run --image scan.vxl --mask mask.vxl --document configs.json
//! voxtract analyze --document configs.json --save-plan
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use voxtract_features::StandardCalculators;
use voxtract_pipeline::{
    ConfigurationAnalyzer, DeduplicationRules, EngineOptions, ExtractionDocument,
    ExtractionEngine, MaskInput, OnError, SourceMode,
};

/// Feature extraction with configuration-level preprocessing
/// deduplication.
#[derive(Parser)]
#[command(name = "voxtract", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an extraction document against an image volume.
    Run(RunArgs),
    /// Analyze a document's deduplication plan without running it.
    Analyze(AnalyzeArgs),
    /// Write a synthetic phantom volume pair.
    Phantom(PhantomArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Input image volume (.vxl).
    #[arg(long)]
    image: PathBuf,

    /// Mask volume (.vxl); a full-cover mask when omitted.
    #[arg(long)]
    mask: Option<PathBuf>,

    /// Extraction document (JSON).
    #[arg(long)]
    document: PathBuf,

    /// What to keep from a configuration that fails mid-run.
    #[arg(long, value_enum, default_value_t = ErrorPolicy::Discard)]
    on_error: ErrorPolicy,

    /// How source validity is established before resampling.
    #[arg(long, value_enum, default_value_t = Source::Full)]
    source_mode: Source,

    /// Placeholder intensity treated as missing under `--source-mode auto`.
    #[arg(long, default_value_t = voxtract_pipeline::engine::DEFAULT_SENTINEL)]
    sentinel: f64,

    /// Print the run outcome as JSON instead of the report.
    #[arg(long)]
    json: bool,

    /// Write per-configuration feature tables to a JSON file.
    #[arg(long)]
    features_out: Option<PathBuf>,
}

#[derive(Args)]
struct AnalyzeArgs {
    /// Extraction document (JSON).
    #[arg(long)]
    document: PathBuf,

    /// Print the plan document as JSON instead of the table.
    #[arg(long)]
    json: bool,

    /// Write the plan back into the document as `last_plan`.
    #[arg(long)]
    save_plan: bool,
}

#[derive(Args)]
struct PhantomArgs {
    /// Where to write the phantom image volume.
    #[arg(long)]
    out: PathBuf,

    /// Where to write the phantom mask volume.
    #[arg(long)]
    mask_out: PathBuf,

    /// Grid edge length in voxels.
    #[arg(long, default_value_t = 24, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(4..=256))]
    edge: usize,
}

/// Partial-result policy selection.
#[derive(Clone, Copy, ValueEnum)]
enum ErrorPolicy {
    /// Drop everything a failed configuration produced.
    Discard,
    /// Keep families completed before the failure.
    Partial,
}

/// Source-validity mode selection.
#[derive(Clone, Copy, ValueEnum)]
enum Source {
    /// Every voxel is valid signal.
    Full,
    /// Only masked voxels are valid signal.
    Roi,
    /// Voxels at the sentinel intensity are treated as missing.
    Auto,
}

const fn on_error_from_cli(policy: ErrorPolicy) -> OnError {
    match policy {
        ErrorPolicy::Discard => OnError::Discard,
        ErrorPolicy::Partial => OnError::ReturnPartial,
    }
}

const fn source_mode_from_cli(source: Source) -> SourceMode {
    match source {
        Source::Full => SourceMode::FullImage,
        Source::Roi => SourceMode::RoiOnly,
        Source::Auto => SourceMode::AutoDetect,
    }
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run(args) => run(&args),
        Command::Analyze(args) => analyze(&args),
        Command::Phantom(args) => phantom(&args),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

/// Log to stderr so stdout stays machine-readable; `RUST_LOG` overrides
/// the `info` default.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: &RunArgs) -> Result<(), String> {
    let document = load_document(&args.document)?;
    let image = voxtract_io::load_volume(&args.image)
        .map_err(|e| format!("Error loading image: {e}"))?;
    let mask = match &args.mask {
        Some(path) => {
            Some(voxtract_io::load_mask(path).map_err(|e| format!("Error loading mask: {e}"))?)
        }
        None => None,
    };

    eprintln!(
        "Image: {} ({:?} voxels), {} configurations",
        args.image.display(),
        image.dims(),
        document.configurations.len(),
    );

    let options = EngineOptions {
        on_error: on_error_from_cli(args.on_error),
        source_mode: source_mode_from_cli(args.source_mode),
        sentinel: args.sentinel,
    };
    let mask_input = mask.map(|m| MaskInput::Binary(m.data));
    let engine = ExtractionEngine::with_options(StandardCalculators, options);
    let outcome = engine
        .run(&image, mask_input.as_ref(), &document)
        .map_err(|e| format!("Run failed: {e}"))?;

    if args.json {
        let json = serde_json::to_string_pretty(&outcome)
            .map_err(|e| format!("Error serializing outcome: {e}"))?;
        println!("{json}");
    } else {
        println!("{}", outcome.diagnostics.report());
        println!();
        println!("Configurations:");
        for (result, entry) in outcome.results.iter().zip(&outcome.log) {
            match &entry.error {
                Some(error) => println!("  {:<24} failed: {error}", result.name),
                None => println!(
                    "  {:<24} completed ({} families)",
                    result.name,
                    result.features.len(),
                ),
            }
        }
        if let Some(stats) = &outcome.dedup {
            println!();
            println!("Deduplication: {stats}");
        }
    }

    if let Some(path) = &args.features_out {
        let tables = serde_json::to_string_pretty(&outcome.results)
            .map_err(|e| format!("Error serializing features: {e}"))?;
        fs::write(path, &tables)
            .map_err(|e| format!("Error writing {}: {e}", path.display()))?;
        eprintln!("Features written to {} ({} bytes)", path.display(), tables.len());
    }
    Ok(())
}

fn analyze(args: &AnalyzeArgs) -> Result<(), String> {
    let mut document = load_document(&args.document)?;
    let rules = match &document.deduplication.rules_version {
        Some(version) => {
            DeduplicationRules::for_version(version).map_err(|e| format!("Cannot analyze: {e}"))?
        }
        None => DeduplicationRules::current(),
    };
    let plan = ConfigurationAnalyzer::new(&document.configurations, &rules).analyze();

    if args.json {
        let json = serde_json::to_string_pretty(&plan.to_document())
            .map_err(|e| format!("Error serializing plan: {e}"))?;
        println!("{json}");
    } else {
        println!("Plan under rules version {}", plan.rules_version());
        println!(
            "{:<24} {:<12} {:<14} {}",
            "Configuration", "Family", "Signature", "Source"
        );
        println!("{}", "-".repeat(64));
        for (configuration, family, signature, source) in plan.iter() {
            println!(
                "{configuration:<24} {:<12} {:<14} {}",
                family.name(),
                signature.short_hash(),
                source.unwrap_or("(computes)"),
            );
        }
        println!();
        println!("Summary: {}", plan.summary());
    }

    if args.save_plan {
        document.deduplication.last_plan = Some(plan.to_document());
        let json = document
            .to_json()
            .map_err(|e| format!("Error serializing document: {e}"))?;
        fs::write(&args.document, json)
            .map_err(|e| format!("Error writing {}: {e}", args.document.display()))?;
        eprintln!("Plan saved into {}", args.document.display());
    }
    Ok(())
}

fn phantom(args: &PhantomArgs) -> Result<(), String> {
    let (image, mask) = voxtract_io::sphere_phantom(args.edge);
    voxtract_io::save_volume(&args.out, &image)
        .map_err(|e| format!("Error writing phantom image: {e}"))?;
    voxtract_io::save_mask(&args.mask_out, &mask)
        .map_err(|e| format!("Error writing phantom mask: {e}"))?;
    eprintln!(
        "Phantom written: {} ({} voxels), mask {} ({} selected)",
        args.out.display(),
        image.len(),
        args.mask_out.display(),
        mask.voxel_count(),
    );
    Ok(())
}

fn load_document(path: &Path) -> Result<ExtractionDocument, String> {
    let text = fs::read_to_string(path)
        .map_err(|e| format!("Error reading {}: {e}", path.display()))?;
    ExtractionDocument::from_json(&text)
        .map_err(|e| format!("Invalid document {}: {e}", path.display()))
}
