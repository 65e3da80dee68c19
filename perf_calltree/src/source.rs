//! Line supply for the parser: opening dumps, cancellation and progress.

use flate2::bufread::MultiGzDecoder;
use log::debug;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// A lazy, finite, forward-only sequence of text lines.
///
/// Line terminators are already stripped. `Some(Err(_))` means the source
/// cannot be read any further.
pub trait LineSource {
    fn next_line(&mut self) -> Option<io::Result<String>>;
}

/// Adapts any [`BufRead`] into a [`LineSource`].
///
/// Invalid UTF-8 is replaced with U+FFFD instead of ending the scan.
pub struct ReaderLines<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: BufRead> ReaderLines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
        }
    }
}

impl<R: BufRead> LineSource for ReaderLines<R> {
    fn next_line(&mut self) -> Option<io::Result<String>> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                if self.buf.ends_with(b"\n") {
                    self.buf.pop();
                    if self.buf.ends_with(b"\r") {
                        self.buf.pop();
                    }
                }
                Some(Ok(String::from_utf8_lossy(&self.buf).into_owned()))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

/// Cooperative cancellation and progress reporting, polled between lines.
pub trait Progress {
    /// Checked before every line read. Must not block.
    fn is_cancelled(&self) -> bool;

    /// Called periodically with the number of lines read so far.
    fn lines_read(&self, _lines: u64) {}
}

/// A [`Progress`] that never cancels and ignores reports.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancel;

impl Progress for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

impl Progress for AtomicBool {
    fn is_cancelled(&self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

/// Compression applied to a dump file, detected from its first bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Zstd,
}

impl Compression {
    pub fn detect(magic: &[u8]) -> Self {
        if magic.starts_with(&[0x1f, 0x8b]) {
            Compression::Gzip
        } else if magic.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
            Compression::Zstd
        } else {
            Compression::None
        }
    }
}

/// Open a `perf script` dump, decompressing gzip or zstd input transparently.
pub fn open_dump(path: &Path) -> io::Result<Box<dyn BufRead>> {
    let mut reader = BufReader::new(File::open(path)?);
    let compression = Compression::detect(reader.fill_buf()?);
    debug!("Opening {} ({:?})", path.display(), compression);

    let dump: Box<dyn BufRead> = match compression {
        Compression::None => Box::new(reader),
        Compression::Gzip => Box::new(BufReader::new(MultiGzDecoder::new(reader))),
        Compression::Zstd => Box::new(BufReader::new(zstd::stream::read::Decoder::with_buffer(
            reader,
        )?)),
    };
    Ok(dump)
}
