//! Convert `perf script` output to an aggregated call tree.
//!
//! # Usage
//!
//! ```bash
//! perf_to_calltree perf.script -o profile.calltree
//! perf_to_calltree perf.script.gz --format collapsed | flamegraph.pl > flame.svg
//! perf_to_calltree perf.script -f binary -vv
//! ```

use clap::{ArgAction, Parser};
use env_logger::Env;
use log::{debug, info};
use perf_calltree::config::{DEFAULT_SYNTHETIC_MAP_SUFFIX, DEFAULT_UNKNOWN_FRAME_PREFIX};
use perf_calltree::source::Progress;
use perf_calltree::{ConvertError, OutputFormat, ParserConfig, PerfScriptParser, export};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "perf_to_calltree")]
#[command(about = "Convert perf script output to an aggregated call tree")]
#[command(version)]
struct Args {
    /// Input perf script dump (plain, gzip or zstd)
    input: PathBuf,

    /// Output file (defaults to input filename with a format-specific extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "ndjson")]
    format: OutputFormat,

    /// Symbol prefix of frames the JVM could not map
    #[arg(long, default_value = DEFAULT_UNKNOWN_FRAME_PREFIX)]
    unknown_frame_prefix: String,

    /// File suffix of JVM-generated address maps
    #[arg(long, default_value = DEFAULT_SYNTHETIC_MAP_SUFFIX)]
    map_suffix: String,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

/// Logs how far the scan has got.
struct LogProgress;

impl Progress for LogProgress {
    fn is_cancelled(&self) -> bool {
        false
    }

    fn lines_read(&self, lines: u64) {
        debug!("Read {} lines", lines);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let output_path = args.output.unwrap_or_else(|| {
        let mut path = args.input.clone();
        path.set_extension(args.format.extension());
        path
    });

    let config = ParserConfig {
        unknown_frame_prefix: args.unknown_frame_prefix,
        synthetic_map_suffix: args.map_suffix,
        ..ParserConfig::default()
    };

    info!("Parsing '{}'", args.input.display());
    let outcome = PerfScriptParser::with_config(config).parse_path(&args.input, &LogProgress);
    let bad_lines = outcome.bad_lines();
    let (tree, stats) = outcome.into_result()?;
    if tree.is_empty() {
        return Err(ConvertError::NoSamples.into());
    }

    let output_file = File::create(&output_path).map_err(|e| {
        format!(
            "Failed to create output file '{}': {}",
            output_path.display(),
            e
        )
    })?;
    export(&tree, &stats, args.format, BufWriter::new(output_file))?;

    eprintln!(
        "{} samples in {} threads, {} bad lines skipped",
        stats.samples_committed,
        tree.thread_count(),
        bad_lines
    );
    eprintln!(
        "Converted '{}' -> '{}'",
        args.input.display(),
        output_path.display()
    );

    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    let log_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
