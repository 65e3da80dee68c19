//! Stack frame lines.
//!
//! A frame line looks like
//!
//! ```text
//!  f1918c0ec04 void com.intellij.util.indexing.FileBasedIndexImpl$$Lambda$4423/0x0000000801d35368.run()+0xc4 (/tmp/perf-88428.map)
//! ```
//!
//! that is an address, the symbol text and the origin file in parentheses.
//! Parsing never fails: lines of any other shape become a frame named after
//! the trimmed line.

use crate::config::ParserConfig;
use crate::intern::{KeyedInterner, StringInterner};
use calltree::StackFrame;
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::rc::Rc;

/// Captures address, symbol text and origin file.
static STACK_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s+(\S+)\s+(.+)\s+\(([^)]+)\)$").expect("valid stack line pattern")
});

/// Captures `Owner.method` from a JVM signature such as
/// `com.foo.IElementType org.foo.parsing.Case.parse(org.foo.RBuilder)+0x202c`.
static JAVA_FRAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[^.]+\.)*([^.]+\.[^.]+)\(").expect("valid java frame pattern")
});

/// Parses frame lines, caching results by the raw line text.
#[derive(Debug)]
pub struct FrameParser {
    unknown_frame_prefix: String,
    synthetic_map_suffix: String,
    frames: KeyedInterner<StackFrame>,
}

impl FrameParser {
    pub fn new(config: &ParserConfig) -> Self {
        Self {
            unknown_frame_prefix: config.unknown_frame_prefix.clone(),
            synthetic_map_suffix: config.synthetic_map_suffix.clone(),
            frames: KeyedInterner::new(),
        }
    }

    /// Parse `line`, returning the shared frame for byte-identical lines.
    pub fn parse(&mut self, line: &str, strings: &mut StringInterner) -> Rc<StackFrame> {
        let Self {
            unknown_frame_prefix,
            synthetic_map_suffix,
            frames,
        } = self;
        frames.get_or_insert_with(line, || {
            compute_frame(line, unknown_frame_prefix, synthetic_map_suffix, strings)
        })
    }

    /// Number of distinct frame lines seen so far.
    pub fn distinct_frames(&self) -> usize {
        self.frames.len()
    }
}

fn compute_frame(
    line: &str,
    unknown_frame_prefix: &str,
    synthetic_map_suffix: &str,
    strings: &mut StringInterner,
) -> StackFrame {
    let Some(captures) = STACK_LINE.captures(line) else {
        return StackFrame::new(strings.intern(""), strings.intern(line.trim()), strings.intern(""));
    };
    let offset = &captures[1];
    let symbol = &captures[2];
    let file = &captures[3];

    // Interpreter frames all share one symbol, so the address tells them
    // apart and the map file is the only context left.
    let is_unknown = symbol.starts_with(unknown_frame_prefix);

    let name: Cow<'_, str> = if is_unknown {
        Cow::Owned(format!("{} {}", symbol, offset))
    } else {
        JAVA_FRAME
            .captures(symbol)
            .and_then(|c| c.get(1))
            .map_or(Cow::Borrowed(symbol), |m| Cow::Borrowed(m.as_str()))
    };

    let file = if !is_unknown && file.ends_with(synthetic_map_suffix) {
        ""
    } else {
        file
    };

    StackFrame::new(strings.intern(offset), strings.intern(&name), strings.intern(file))
}
