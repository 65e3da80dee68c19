//! Parser configuration.

/// Symbol prefix perf prints for JVM interpreter code with no map entry.
pub const DEFAULT_UNKNOWN_FRAME_PREFIX: &str = "Interpreter+0x";

/// Suffix of the address maps the JVM writes for perf (`/tmp/perf-<pid>.map`).
pub const DEFAULT_SYNTHETIC_MAP_SUFFIX: &str = ".map";

/// Configuration for [`PerfScriptParser`](crate::PerfScriptParser).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserConfig {
    /// Frames whose symbol starts with this prefix are treated as unmapped:
    /// the address is appended to the name and the map file is kept.
    pub unknown_frame_prefix: String,
    /// Origin files ending with this suffix are synthetic address maps and are
    /// dropped from mapped frames.
    pub synthetic_map_suffix: String,
    /// Number of lines between two progress reports.
    pub progress_interval: u64,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            unknown_frame_prefix: DEFAULT_UNKNOWN_FRAME_PREFIX.to_string(),
            synthetic_map_suffix: DEFAULT_SYNTHETIC_MAP_SUFFIX.to_string(),
            progress_interval: 10_000,
        }
    }
}
