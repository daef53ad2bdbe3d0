//! Run-length encoding of consecutive identical lines.

use std::io::{self, Write};

use super::{EncodeStats, RecordEncoder};

/// Collapses runs of byte-identical lines into `<line>,<count>\n`.
#[derive(Debug, Default)]
pub struct RunLengthEncoder {
    current: Option<Vec<u8>>,
    count: u64,
    stats: EncodeStats,
}

impl RunLengthEncoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn emit(&mut self, out: &mut dyn Write) -> io::Result<()> {
        if let Some(line) = self.current.as_deref()
            && self.count > 0
        {
            out.write_all(line)?;
            writeln!(out, ",{}", self.count)?;
            self.stats.lines_out += 1;
        }
        Ok(())
    }
}

impl RecordEncoder for RunLengthEncoder {
    fn push_line(&mut self, line: &[u8], out: &mut dyn Write) -> io::Result<()> {
        self.stats.lines_in += 1;
        if self.current.as_deref() == Some(line) {
            self.count += 1;
            return Ok(());
        }
        self.emit(out)?;
        match self.current.as_mut() {
            Some(buf) => {
                buf.clear();
                buf.extend_from_slice(line);
            }
            None => self.current = Some(line.to_vec()),
        }
        self.count = 1;
        Ok(())
    }

    fn finish(&mut self, out: &mut dyn Write) -> io::Result<()> {
        self.emit(out)?;
        self.current = None;
        self.count = 0;
        Ok(())
    }

    fn stats(&self) -> EncodeStats {
        self.stats
    }
}

/// Expand run-length output back into the original lines.
///
/// Each input line must end in `,<count>`; the line content may itself
/// contain commas.
pub fn decode_run_length(encoded: &[u8]) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(encoded.len());
    for (index, raw) in encoded.split(|b| *b == b'\n').enumerate() {
        if raw.is_empty() {
            continue;
        }
        let Some(comma) = raw.iter().rposition(|b| *b == b',') else {
            return Err(malformed(index, "missing ,<count> suffix"));
        };
        let count: u64 = std::str::from_utf8(&raw[comma + 1..])
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n| *n > 0)
            .ok_or_else(|| malformed(index, "count is not a positive integer"))?;
        let line = &raw[..comma];
        for _ in 0..count {
            out.extend_from_slice(line);
            out.push(b'\n');
        }
    }
    Ok(out)
}

fn malformed(index: usize, what: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("run-length line {}: {what}", index + 1),
    )
}
