//! Line classification and the top-level parse driver.
//!
//! The parser is a two-state machine. While idle, every non-blank line must
//! be a sample header; once a header is seen, every non-blank line is a frame
//! of that sample, and a blank line commits the sample to the sink.

use crate::config::ParserConfig;
use crate::frame::FrameParser;
use crate::header::{BadLine, ThreadHeader, ThreadHeaderParser};
use crate::intern::StringInterner;
use crate::source::{LineSource, NeverCancel, Progress, ReaderLines, open_dump};
use calltree::{CallTree, CallTreeSink, StackFrame, ThreadIdentity, TimeRange};
use log::{debug, warn};
use std::io::{self, BufRead};
use std::mem;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use thiserror::Error;

/// Errors that can occur while converting a perf script dump.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to open '{}': {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("read error after line {line}: {source}")]
    Read {
        line: u64,
        #[source]
        source: io::Error,
    },

    #[error("tree export error: {0}")]
    Write(#[from] calltree::WriteError),

    #[error("no samples found in input")]
    NoSamples,
}

pub type Result<T> = std::result::Result<T, ConvertError>;

/// Diagnostics gathered during one parse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub lines_read: u64,
    /// Header lines that could not be parsed and were skipped.
    pub bad_lines: u64,
    pub samples_committed: u64,
    /// Samples opened by a header but never closed by a blank line.
    pub samples_dropped: u64,
    /// Earliest and latest timestamp of committed samples, in microseconds.
    pub time_range: Option<(i64, i64)>,
    pub distinct_frames: usize,
    pub distinct_threads: usize,
}

impl ParseStats {
    fn record_time(&mut self, timestamp: i64) {
        self.time_range = Some(match self.time_range {
            None => (timestamp, timestamp),
            Some((start, end)) => (start.min(timestamp), end.max(timestamp)),
        });
    }

    pub fn time_range_micros(&self) -> Option<TimeRange> {
        self.time_range
            .map(|(start, end)| TimeRange::micros(start, end))
    }
}

/// Result of a complete parse.
#[derive(Debug)]
pub enum ParseOutcome<S> {
    Success { tree: S, stats: ParseStats },
    /// The input could not be read; no tree is produced.
    Failure { error: ConvertError, stats: ParseStats },
}

impl<S> ParseOutcome<S> {
    pub fn stats(&self) -> &ParseStats {
        match self {
            ParseOutcome::Success { stats, .. } | ParseOutcome::Failure { stats, .. } => stats,
        }
    }

    pub fn bad_lines(&self) -> u64 {
        self.stats().bad_lines
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ParseOutcome::Success { .. })
    }

    /// Human-readable failure message, if the parse failed.
    pub fn failure_message(&self) -> Option<String> {
        match self {
            ParseOutcome::Success { .. } => None,
            ParseOutcome::Failure { error, .. } => Some(error.to_string()),
        }
    }

    pub fn into_result(self) -> Result<(S, ParseStats)> {
        match self {
            ParseOutcome::Success { tree, stats } => Ok((tree, stats)),
            ParseOutcome::Failure { error, .. } => Err(error),
        }
    }
}

/// A sample between its header and the terminating blank line.
#[derive(Debug)]
struct Sample {
    thread: Rc<ThreadIdentity>,
    timestamp_micros: i64,
    /// Leaf first, as listed in the dump.
    frames: Vec<Rc<StackFrame>>,
}

impl Sample {
    fn new(header: ThreadHeader) -> Self {
        Self {
            thread: header.thread,
            timestamp_micros: header.timestamp_micros,
            frames: Vec::new(),
        }
    }
}

#[derive(Debug)]
enum State {
    Idle,
    InSample(Sample),
}

/// Parser for the output of `perf script`.
///
/// A dump suitable for this parser is produced with
///
/// ```bash
/// # run the JVM with -XX:+PreserveFramePointer
/// perf record -F 500 -p $PID -g -o perf.data -- sleep 60
/// # write /tmp/perf-$PID.map before the process exits
/// jcmd $PID Compiler.perfmap
/// perf script -i perf.data > perf.script
/// ```
///
/// One parser handles one dump. Interned frames and threads are only
/// meaningful within that dump, so [`parse`](Self::parse) consumes the parser.
pub struct PerfScriptParser<S> {
    sink: S,
    progress_interval: u64,
    strings: StringInterner,
    headers: ThreadHeaderParser,
    frames: FrameParser,
    state: State,
    stats: ParseStats,
}

impl PerfScriptParser<CallTree> {
    /// Create a parser that builds a fresh [`CallTree`].
    pub fn new() -> Self {
        Self::with_config(ParserConfig::default())
    }

    /// Create a parser with custom configuration that builds a fresh [`CallTree`].
    pub fn with_config(config: ParserConfig) -> Self {
        Self::with_sink(CallTree::new(), config)
    }
}

impl Default for PerfScriptParser<CallTree> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: CallTreeSink> PerfScriptParser<S> {
    /// Create a parser that feeds completed samples into `sink`.
    pub fn with_sink(sink: S, config: ParserConfig) -> Self {
        Self {
            sink,
            progress_interval: config.progress_interval.max(1),
            strings: StringInterner::new(),
            headers: ThreadHeaderParser::new(),
            frames: FrameParser::new(&config),
            state: State::Idle,
            stats: ParseStats::default(),
        }
    }

    /// Feed a single line, without its terminator.
    pub fn consume_line(&mut self, line: &str) {
        self.stats.lines_read += 1;

        if line.is_empty() {
            if let State::InSample(sample) = mem::replace(&mut self.state, State::Idle) {
                self.commit(sample);
            }
            return;
        }

        if let State::InSample(sample) = &mut self.state {
            let frame = self.frames.parse(line, &mut self.strings);
            sample.frames.push(frame);
            return;
        }

        match self.headers.parse(line, &mut self.strings) {
            Ok(header) => self.open_sample(header),
            Err(reason) => self.bad_line(reason, line),
        }
    }

    /// Start a new sample. A sample still open is dropped without commit.
    fn open_sample(&mut self, header: ThreadHeader) {
        let previous = mem::replace(&mut self.state, State::InSample(Sample::new(header)));
        if let State::InSample(sample) = previous {
            debug!(
                "Dropping unterminated sample of thread {} with {} frames",
                sample.thread.display_name,
                sample.frames.len()
            );
            self.stats.samples_dropped += 1;
        }
    }

    fn commit(&mut self, sample: Sample) {
        let Sample {
            thread,
            timestamp_micros,
            mut frames,
        } = sample;
        frames.reverse();
        self.sink.add_stack(&thread, &frames, 1);
        self.stats.samples_committed += 1;
        self.stats.record_time(timestamp_micros);
    }

    fn bad_line(&mut self, reason: BadLine, line: &str) {
        debug!("Skipping line ({}): {}", reason, line);
        self.stats.bad_lines += 1;
    }

    /// Number of header lines skipped so far.
    pub fn bad_lines(&self) -> u64 {
        self.stats.bad_lines
    }

    /// End the parse, dropping any unterminated sample.
    pub fn finish(mut self) -> (S, ParseStats) {
        if let State::InSample(sample) = mem::replace(&mut self.state, State::Idle) {
            debug!(
                "Input ended inside a sample of thread {}; {} frames dropped",
                sample.thread.display_name,
                sample.frames.len()
            );
            self.stats.samples_dropped += 1;
        }
        self.stats.distinct_frames = self.frames.distinct_frames();
        self.stats.distinct_threads = self.headers.distinct_threads();

        debug!(
            "Parsed {} lines: {} samples, {} bad lines, {} frames, {} threads, {} strings",
            self.stats.lines_read,
            self.stats.samples_committed,
            self.stats.bad_lines,
            self.stats.distinct_frames,
            self.stats.distinct_threads,
            self.strings.len()
        );

        (self.sink, self.stats)
    }

    /// Scan `lines` to the end, or until `progress` asks to stop.
    ///
    /// Cancellation ends the scan like end of input. A read error aborts it
    /// and yields [`ParseOutcome::Failure`].
    pub fn parse<L, P>(mut self, mut lines: L, progress: &P) -> ParseOutcome<S>
    where
        L: LineSource,
        P: Progress + ?Sized,
    {
        loop {
            if progress.is_cancelled() {
                warn!("Parse cancelled after {} lines", self.stats.lines_read);
                break;
            }
            let line = match lines.next_line() {
                None => break,
                Some(Ok(line)) => line,
                Some(Err(source)) => {
                    let line = self.stats.lines_read;
                    let (_, stats) = self.finish();
                    return ParseOutcome::Failure {
                        error: ConvertError::Read { line, source },
                        stats,
                    };
                }
            };
            self.consume_line(&line);
            if self.stats.lines_read % self.progress_interval == 0 {
                progress.lines_read(self.stats.lines_read);
            }
        }

        progress.lines_read(self.stats.lines_read);
        let (tree, stats) = self.finish();
        ParseOutcome::Success { tree, stats }
    }

    /// Parse everything `reader` yields.
    pub fn parse_reader<R: BufRead>(self, reader: R) -> ParseOutcome<S> {
        self.parse(ReaderLines::new(reader), &NeverCancel)
    }

    /// Open and parse a dump file, plain or compressed.
    pub fn parse_path<P>(self, path: &Path, progress: &P) -> ParseOutcome<S>
    where
        P: Progress + ?Sized,
    {
        match open_dump(path) {
            Ok(reader) => self.parse(ReaderLines::new(reader), progress),
            Err(source) => ParseOutcome::Failure {
                error: ConvertError::Open {
                    path: path.to_path_buf(),
                    source,
                },
                stats: ParseStats::default(),
            },
        }
    }
}
