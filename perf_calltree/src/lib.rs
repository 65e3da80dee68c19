//! Convert Linux `perf script` dumps of JVM processes into aggregated call trees.
//!
//! The dump is read line by line. Sample headers name a thread and a
//! timestamp, the following lines list the stack leaf first, and a blank line
//! ends the sample. Completed samples are handed root first to a
//! [`CallTreeSink`](calltree::CallTreeSink), by default a
//! [`CallTree`](calltree::CallTree).
//!
//! Malformed header lines are skipped and counted; frame lines never fail and
//! degrade to a best-effort frame instead. JVM frames are shortened to
//! `Owner.method`, and interpreter frames the JVM could not map keep their
//! address so they stay distinguishable.
//!
//! # Example
//!
//! ```no_run
//! use perf_calltree::PerfScriptParser;
//! use perf_calltree::source::NeverCancel;
//! use std::path::Path;
//!
//! let outcome = PerfScriptParser::new().parse_path(Path::new("perf.script"), &NeverCancel);
//! println!("skipped {} lines", outcome.bad_lines());
//! let (tree, _stats) = outcome.into_result().unwrap();
//! println!("{} samples in {} threads", tree.total_samples(), tree.thread_count());
//! ```

pub mod config;
pub mod export;
pub mod frame;
pub mod header;
pub mod intern;
pub mod parser;
pub mod source;

pub use config::ParserConfig;
pub use export::{OutputFormat, export};
pub use parser::{ConvertError, ParseOutcome, ParseStats, PerfScriptParser, Result};

/// The call tree model and its file formats.
pub use calltree;
