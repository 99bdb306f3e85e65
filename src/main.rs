use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

use visca::core::duplicate::{DedupReport, DuplicateDetector};
use visca::core::image::ImageStore;
use visca::{
    PipelineConfig, PsiVariant, Segment, SegmentTree, ascii_tree, calculate_psi, gather_instances,
    load_segments,
};

#[derive(Parser, Debug)]
#[command(name = "visca", version, about = "Deduplicate and score captured page segments")]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug, -vvv trace); RUST_LOG wins
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drop segments whose screenshots duplicate another segment
    Dedup {
        /// segments.json produced by the capture step
        #[arg(short, long, value_name = "FILE")]
        segments: PathBuf,
        /// Config file (default: `<config dir>/visca/config.json` if present)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// Fraction of padding pixels allowed off the dominant color
        #[arg(long, value_name = "F")]
        allowed_deviation: Option<f64>,
        /// Where to write the kept segments (default: `<segments>.dedup.json`)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
        /// Also write the full deduplication report
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,
    },

    /// Build the segment tree and mark repeatable instances
    Score {
        /// segments.json produced by the capture step
        #[arg(short, long, value_name = "FILE")]
        segments: PathBuf,
        /// Config file (default: `<config dir>/visca/config.json` if present)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// How sibling distances are combined
        #[arg(long, value_enum)]
        variant: Option<PsiVariant>,
        /// Tag multiset depth for structural distance
        #[arg(long, value_name = "N")]
        depth: Option<usize>,
        /// Deduplicate screenshots before building the tree
        #[arg(long)]
        dedup: bool,
        /// Print the instance map as JSON only
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Dedup {
            segments,
            config,
            allowed_deviation,
            output,
            report,
        } => {
            let mut config = resolve_config(config.as_deref())?;
            if let Some(deviation) = allowed_deviation {
                config.allowed_deviation = deviation;
            }
            config.validate().context("Invalid configuration")?;

            println!("▶ Deduplicating segments from: {}", segments.display());
            let records = read_segments(&segments)?;
            let dedup = run_dedup(&records, &config)?;
            print_dedup(&dedup);

            let output = output.unwrap_or_else(|| default_output_path(&segments));
            write_json(&output, &dedup.kept)?;
            println!(
                "\n✅ Kept {} of {} segments → {}",
                dedup.kept.len(),
                dedup.eligible,
                output.display()
            );

            if let Some(report_path) = report {
                write_json(&report_path, &dedup)?;
                println!("🗂️  Report written to {}", report_path.display());
            }
        }

        Commands::Score {
            segments,
            config,
            variant,
            depth,
            dedup,
            json,
        } => {
            let mut config = resolve_config(config.as_deref())?;
            if let Some(variant) = variant {
                config.psi_variant = variant;
            }
            if let Some(depth) = depth {
                config.tag_depth = depth;
            }
            config.validate().context("Invalid configuration")?;

            let mut records = read_segments(&segments)?;
            if dedup {
                let report = run_dedup(&records, &config)?;
                eprintln!("▶ Deduplication removed {} segment(s)", report.removed);
                records = report.kept;
            }

            let tree = SegmentTree::build(records);
            let scores = benchmark(None, "scoring the tree", || {
                calculate_psi(&tree, config.psi_variant, config.tag_depth)
            });
            let instances = gather_instances(&tree, &scores);

            if json {
                println!("{}", serde_json::to_string_pretty(&instances)?);
            } else {
                let report = tree.report();
                println!(
                    "▶ Built tree: {} node(s), {} duplicate, {} orphaned",
                    report.inserted, report.duplicates, report.orphaned
                );
                print!("{}", ascii_tree(&tree, &scores));
                println!("\n✨ {} instance(s):", instances.len());
                for (xpath, size) in &instances {
                    println!("   ▶ {} ({} node(s))", xpath, size);
                }
            }
        }
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_config(explicit: Option<&Path>) -> Result<PipelineConfig> {
    PipelineConfig::load(explicit).context("Failed to load configuration")
}

fn read_segments(path: &Path) -> Result<Vec<Segment>> {
    let segments = load_segments(path)
        .with_context(|| format!("Failed to read segments from {:?}", path))?;
    eprintln!("▶ Loaded {} segment(s)", segments.len());
    Ok(segments)
}

/// Load screenshots in parallel, then run both deduplication passes.
fn run_dedup(segments: &[Segment], config: &PipelineConfig) -> Result<DedupReport> {
    let detector = DuplicateDetector::new(config.clone());
    let eligible = detector.eligible(segments);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));

    spinner.set_message(format!("Loading {} screenshots…", eligible.len()));
    let mut store = benchmark(Some(&spinner), "loading screenshots", || {
        ImageStore::prefetch(&eligible)
    });

    spinner.set_message("Hashing and comparing screenshots…");
    let report = benchmark(Some(&spinner), "deduplication", || {
        detector.run(segments, &mut store)
    });
    spinner.finish_with_message("Deduplication complete");

    if store.unreadable() > 0 {
        eprintln!("⚠️  {} screenshot(s) could not be read", store.unreadable());
    }
    Ok(report)
}

fn print_dedup(report: &DedupReport) {
    if report.hash_groups.is_empty() && report.padding_duplicates.is_empty() {
        println!("No duplicates found.");
        return;
    }

    for (i, group) in report.hash_groups.iter().enumerate() {
        println!("\n✨ Group {}:", i + 1);
        println!("   🏆 Keeping → {}", group.kept);
        for xpath in &group.removed {
            println!("   📦 Dropped {}", xpath);
        }
    }

    if !report.padding_duplicates.is_empty() {
        println!("\n🖼️  Padded copies of their parent:");
        for xpath in &report.padding_duplicates {
            println!("   📦 Dropped {}", xpath);
        }
    }
}

fn default_output_path(segments: &Path) -> PathBuf {
    let stem = segments
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "segments".to_string());
    segments.with_file_name(format!("{}.dedup.json", stem))
}

fn write_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let raw = serde_json::to_string_pretty(value)?;
    fs::write(path, raw).with_context(|| format!("Failed to write {:?}", path))
}

/// Run `f()`, report how long it took on stderr, and return its result.
///
/// With a spinner running, the line is printed while the spinner is suspended.
fn benchmark<T, F: FnOnce() -> T>(spinner: Option<&ProgressBar>, label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    let line = timing_line(label, start.elapsed());
    match spinner {
        Some(bar) => bar.suspend(|| eprintln!("{}", line)),
        None => eprintln!("{}", line),
    }
    result
}

fn timing_line(label: &str, elapsed: Duration) -> String {
    format!("⏱ {} took {:.2?}", label, elapsed)
}
