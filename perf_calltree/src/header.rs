//! Sample header lines.
//!
//! Accepts headers of the shape
//!
//! ```text
//! Indexing   88428/88707   14182.263881:         16 cycles:P:
//! Indexing   88707   14182.263881:         16 cycles:P:
//! ```
//!
//! Only the first three fields matter: thread name, `pid/tid` (or a bare tid)
//! and the timestamp.

use crate::intern::{KeyedInterner, StringInterner};
use calltree::ThreadIdentity;
use once_cell::sync::Lazy;
use regex::Regex;
use std::rc::Rc;
use thiserror::Error;

static SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));

/// Why a line could not be read as a sample header.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadLine {
    /// A frame line with no header before it.
    #[error("starts with tab")]
    StartsWithTab,

    #[error("fewer than 3 fields")]
    TooFewFields,

    #[error("unparseable timestamp")]
    UnparseableTimestamp,
}

/// A successfully parsed header.
#[derive(Debug, Clone)]
pub struct ThreadHeader {
    pub thread: Rc<ThreadIdentity>,
    pub timestamp_micros: i64,
}

/// Parses header lines and interns the threads they name, keyed by tid.
#[derive(Debug, Default)]
pub struct ThreadHeaderParser {
    threads: KeyedInterner<ThreadIdentity>,
}

impl ThreadHeaderParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(
        &mut self,
        line: &str,
        strings: &mut StringInterner,
    ) -> Result<ThreadHeader, BadLine> {
        if line.starts_with('\t') {
            return Err(BadLine::StartsWithTab);
        }

        let mut fields = SPACES.split(line);
        let (Some(thread_name), Some(pid_tid), Some(time)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(BadLine::TooFewFields);
        };

        let tid = pid_tid.split('/').nth(1).unwrap_or(pid_tid);
        let timestamp_micros = parse_timestamp(time).ok_or(BadLine::UnparseableTimestamp)?;

        // The display name comes from the first header seen for this tid.
        let thread = self.threads.get_or_insert_with(tid, || {
            ThreadIdentity::new(
                strings.intern(tid),
                strings.intern(&format!("{}-{}", thread_name, tid)),
            )
        });

        Ok(ThreadHeader {
            thread,
            timestamp_micros,
        })
    }

    /// Number of distinct threads seen so far.
    pub fn distinct_threads(&self) -> usize {
        self.threads.len()
    }
}

/// Convert a header time token to microseconds.
///
/// Decimal tokens are seconds and are rounded to whole microseconds; integer
/// tokens are taken verbatim. Trailing colons are ignored.
pub fn parse_timestamp(token: &str) -> Option<i64> {
    let trimmed = token.trim_end_matches(':');
    if trimmed.contains('.') {
        trimmed
            .parse::<f64>()
            .ok()
            .filter(|seconds| seconds.is_finite())
            .map(|seconds| (seconds * 1_000_000.0).round() as i64)
    } else {
        trimmed.parse::<i64>().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(parser: &mut ThreadHeaderParser, line: &str) -> Result<ThreadHeader, BadLine> {
        parser.parse(line, &mut StringInterner::new())
    }

    #[test]
    fn parse_header_with_pid_and_tid() {
        let mut parser = ThreadHeaderParser::new();
        let header = parse(&mut parser, "Indexing 88428/88707 14182.263881: 16 cycles:P:").unwrap();

        assert_eq!(&*header.thread.id, "88707");
        assert_eq!(&*header.thread.display_name, "Indexing-88707");
        assert_eq!(header.timestamp_micros, 14182263881);
    }

    #[test]
    fn parse_header_with_bare_tid() {
        let mut parser = ThreadHeaderParser::new();
        let header = parse(&mut parser, "Indexing   88707   14182.263881:   16 cycles:P:").unwrap();

        assert_eq!(&*header.thread.id, "88707");
        assert_eq!(header.timestamp_micros, 14182263881);
    }

    #[test]
    fn integer_time_is_taken_verbatim() {
        assert_eq!(parse_timestamp("16"), Some(16));
        assert_eq!(parse_timestamp("16:"), Some(16));
        assert_eq!(parse_timestamp("14182.263881:"), Some(14182263881));
        assert_eq!(parse_timestamp("0.5"), Some(500000));
    }

    #[test]
    fn unparseable_time_is_rejected() {
        assert_eq!(parse_timestamp("cycles:P:"), None);
        assert_eq!(parse_timestamp("12.3.4:"), None);
        assert_eq!(parse_timestamp(""), None);

        let mut parser = ThreadHeaderParser::new();
        assert_eq!(
            parse(&mut parser, "java 100/101 [003] 1.5: cycles:").unwrap_err(),
            BadLine::UnparseableTimestamp
        );
    }

    #[test]
    fn tab_prefixed_line_is_rejected() {
        let mut parser = ThreadHeaderParser::new();
        assert_eq!(
            parse(&mut parser, "\t7f00 main+0x1 (/bin/app)").unwrap_err(),
            BadLine::StartsWithTab
        );
    }

    #[test]
    fn short_line_is_rejected() {
        let mut parser = ThreadHeaderParser::new();
        assert_eq!(
            parse(&mut parser, "Indexing 88707").unwrap_err(),
            BadLine::TooFewFields
        );
        assert_eq!(parse(&mut parser, "").unwrap_err(), BadLine::TooFewFields);
    }

    #[test]
    fn same_tid_resolves_to_same_thread() {
        let mut parser = ThreadHeaderParser::new();
        let mut strings = StringInterner::new();
        let first = parser
            .parse("Indexing 88428/88707 1.0: 1 cycles:", &mut strings)
            .unwrap();
        let second = parser
            .parse("Renamed 99999/88707 2.0: 1 cycles:", &mut strings)
            .unwrap();
        let bare = parser.parse("Other 88707 3:", &mut strings).unwrap();

        assert!(Rc::ptr_eq(&first.thread, &second.thread));
        assert!(Rc::ptr_eq(&first.thread, &bare.thread));
        assert_eq!(&*second.thread.display_name, "Indexing-88707");
        assert_eq!(parser.distinct_threads(), 1);
    }
}
