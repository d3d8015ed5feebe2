//! Partial-line buffering for byte-stream transports.
//!
//! Serial and USB reads deliver arbitrary chunks: a line may arrive split
//! across several reads, or several lines may arrive in one. `LineBuffer`
//! accumulates bytes and yields each complete `\n`-terminated line exactly
//! once, in order. The unterminated tail is kept for the next push.

use tracing::warn;

/// Upper bound on a single unterminated line.
///
/// A full-resolution photo is a few hundred KiB of base64; anything far past
/// that is a desynchronized stream.
pub const DEFAULT_MAX_LINE: usize = 16 * 1024 * 1024;

/// Accumulates bytes and splits them into protocol lines.
#[derive(Debug)]
pub struct LineBuffer {
    buf: Vec<u8>,
    /// Prefix of `buf` already known to hold no `\n`.
    scanned: usize,
    max_line: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineBuffer {
    /// Buffer with the default line cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_line(DEFAULT_MAX_LINE)
    }

    /// Buffer with a custom line cap.
    #[must_use]
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buf: Vec::with_capacity(4096),
            scanned: 0,
            max_line,
        }
    }

    /// Append a chunk and return every line it completed.
    ///
    /// Lines are returned without their terminator (a trailing `\r` is also
    /// stripped). Invalid UTF-8 is replaced lossily; the codec rejects such
    /// lines later anyway.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.buf[from..].iter().position(|&b| b == b'\n') {
            let end = from + offset;
            let mut line = &self.buf[start..end];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            lines.push(String::from_utf8_lossy(line).into_owned());
            start = end + 1;
            from = start;
        }
        self.buf.drain(..start);
        self.scanned = self.buf.len();

        if self.buf.len() > self.max_line {
            warn!(
                "Discarding {} buffered bytes with no line terminator",
                self.buf.len()
            );
            self.buf.clear();
            self.scanned = 0;
        }

        lines
    }

    /// Bytes waiting for a terminator.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Drop any partial line.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.scanned = 0;
    }
}
