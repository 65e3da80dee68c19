//! Validate an NDJSON call tree file and summarize it per thread.
//!
//! Beyond the structural checks done while parsing, the per-thread sample
//! counts must agree: thread totals sum to the header's sample count, and each
//! thread's root total equals the self hits of its nodes.

use calltree::{ThreadSummary, TreeFile};
use std::env;
use std::fs::File;
use std::process::ExitCode;

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

fn print_threads(tree: &TreeFile, summaries: &[ThreadSummary]) {
    let mut by_total: Vec<&ThreadSummary> = summaries.iter().collect();
    by_total.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.id.cmp(&b.id)));

    println!("  Threads:");
    for summary in by_total {
        println!(
            "    {:<32} {:>10} samples {:>6.2}% {:>8} nodes{}",
            summary.name,
            summary.total,
            percent(summary.total, tree.header.total_samples),
            summary.nodes,
            if summary.is_consistent() { "" } else { "  (inconsistent)" }
        );
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    if args.len() != 2 {
        eprintln!("Usage: {} <file.calltree>", args[0]);
        return ExitCode::from(2);
    }

    let path = &args[1];

    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening '{}': {}", path, e);
            return ExitCode::FAILURE;
        }
    };

    let tree = match TreeFile::parse(file) {
        Ok(tree) => tree,
        Err(e) => {
            eprintln!("Invalid call tree file '{}': {}", path, e);
            return ExitCode::FAILURE;
        }
    };

    let summaries = tree.thread_summaries();
    let thread_samples: u64 = summaries.iter().map(|s| s.total).sum();

    println!("Call tree file: {}", path);
    println!(
        "  Format: {} {} from {}",
        tree.header.format, tree.header.version, tree.header.source_tool
    );
    println!("  Samples: {}", tree.header.total_samples);
    println!(
        "  Frames: {}, nodes: {}, leaf paths: {}",
        tree.frames.len(),
        tree.nodes.len(),
        tree.leaf_paths()
    );
    if let Some(range) = &tree.header.time_range {
        println!("  Time range: {}..{} {}", range.start, range.end, range.unit);
    }
    print_threads(&tree, &summaries);

    let mut consistent = true;
    if thread_samples != tree.header.total_samples {
        eprintln!(
            "Thread totals sum to {} but header claims {} samples",
            thread_samples, tree.header.total_samples
        );
        consistent = false;
    }
    for summary in summaries.iter().filter(|s| !s.is_consistent()) {
        eprintln!(
            "Thread {} claims {} samples, root total {:?}, self hits {}",
            summary.id, summary.total, summary.root_total, summary.self_hits
        );
        consistent = false;
    }

    if consistent {
        println!("Valid");
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
