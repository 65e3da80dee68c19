//! Writing a parsed tree in one of the supported output formats.

use crate::parser::{ConvertError, ParseStats, Result};
use calltree::CallTree;
use clap::ValueEnum;
use log::debug;
use std::io::Write;

/// Name recorded as the source tool in tree file headers.
pub const SOURCE_TOOL: &str = "perf";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// NDJSON tree file: header, frames, threads, nodes
    Ndjson,
    /// One `thread;root;...;leaf count` line per stack, for flamegraph tools
    Collapsed,
    /// Compact binary snapshot of the tree file
    Binary,
}

impl OutputFormat {
    /// File extension used when no output path is given.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Ndjson => "calltree",
            OutputFormat::Collapsed => "folded",
            OutputFormat::Binary => "bin",
        }
    }
}

/// Write `tree` to `writer` and flush it.
///
/// A tree without samples is refused with [`ConvertError::NoSamples`].
pub fn export<W: Write>(
    tree: &CallTree,
    stats: &ParseStats,
    format: OutputFormat,
    mut writer: W,
) -> Result<()> {
    if tree.is_empty() {
        return Err(ConvertError::NoSamples);
    }

    match format {
        OutputFormat::Ndjson => tree
            .to_tree_file(SOURCE_TOOL, stats.time_range_micros())
            .write(&mut writer)?,
        OutputFormat::Collapsed => tree.write_collapsed(&mut writer)?,
        OutputFormat::Binary => tree
            .to_tree_file(SOURCE_TOOL, stats.time_range_micros())
            .write_binary(&mut writer)?,
    }
    writer.flush()?;

    debug!("Wrote {} samples as {:?}", tree.total_samples(), format);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PerfScriptParser;
    use calltree::TreeFile;
    use pretty_assertions::assert_eq;
    use std::io::{self, Cursor};

    const DUMP: &str = "app 1/2 1.0:\n 2 work (/bin/app)\n 1 main (/bin/app)\n\n";

    fn parsed() -> (CallTree, ParseStats) {
        PerfScriptParser::new()
            .parse_reader(Cursor::new(DUMP))
            .into_result()
            .unwrap()
    }

    #[test]
    fn exports_collapsed_stacks() {
        let (tree, stats) = parsed();
        let mut out = Vec::new();
        export(&tree, &stats, OutputFormat::Collapsed, &mut out).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "app-2;main (/bin/app);work (/bin/app) 1\n"
        );
    }

    #[test]
    fn exported_tree_file_parses_back() {
        let (tree, stats) = parsed();
        let mut out = Vec::new();
        export(&tree, &stats, OutputFormat::Ndjson, &mut out).unwrap();

        let file = TreeFile::parse(Cursor::new(out)).unwrap();
        assert_eq!(file.header.source_tool, SOURCE_TOOL);
        assert_eq!(file.header.total_samples, 1);
        assert_eq!(file.header.time_range.as_ref().unwrap().start, 1_000_000);

        let mut binary = Vec::new();
        export(&tree, &stats, OutputFormat::Binary, &mut binary).unwrap();
        assert_eq!(TreeFile::from_binary(&binary).unwrap(), file);
    }

    #[test]
    fn empty_tree_is_refused() {
        let (tree, stats) = PerfScriptParser::new()
            .parse_reader(Cursor::new("garbage\n"))
            .into_result()
            .unwrap();

        assert!(matches!(
            export(&tree, &stats, OutputFormat::Ndjson, Vec::new()),
            Err(ConvertError::NoSamples)
        ));
    }

    struct BrokenWriter;

    impl Write for BrokenWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Accepts writes, fails on flush.
    struct UnflushableWriter;

    impl Write for UnflushableWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::other("flush failed"))
        }
    }

    #[test]
    fn write_failure_is_a_write_error() {
        let (tree, stats) = parsed();

        assert!(matches!(
            export(&tree, &stats, OutputFormat::Collapsed, BrokenWriter),
            Err(ConvertError::Write(_))
        ));
    }

    #[test]
    fn flush_failure_is_an_io_error() {
        let (tree, stats) = parsed();

        let err = export(&tree, &stats, OutputFormat::Ndjson, UnflushableWriter).unwrap_err();
        assert!(matches!(err, ConvertError::Io(_)));
        assert!(err.to_string().contains("flush failed"));
    }
}
