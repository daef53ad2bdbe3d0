//! Record compaction: run-length and delta encoders over line-oriented records.
//!
//! Both encoders consume the input one line at a time and keep only a small
//! carry (previous line or previous field vector), so the working set does not
//! grow with the size of the record file.

pub mod delta;
pub mod rle;

use std::fmt;
use std::io::{self, BufRead, Write};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Compaction algorithm selector.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// Collapse consecutive identical lines into `<line>,<count>`.
    #[default]
    #[serde(rename = "rle")]
    RunLength,
    /// Emit per-field differences against the previous row.
    #[serde(rename = "delta")]
    Delta,
}

impl Algorithm {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RunLength => "rle",
            Self::Delta => "delta",
        }
    }

    /// Compact encoding for storage in an atomic.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::RunLength => 0,
            Self::Delta => 1,
        }
    }

    #[must_use]
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Delta,
            _ => Self::RunLength,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rle" => Ok(Self::RunLength),
            "delta" => Ok(Self::Delta),
            other => Err(format!("unknown compression algorithm {other:?} (expected rle|delta)")),
        }
    }
}

/// Counters from one encoding pass.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncodeStats {
    pub lines_in: u64,
    pub lines_out: u64,
    /// Delta rows that had more fields than the configured cap.
    pub truncated_rows: u64,
}

/// Streaming line encoder with a per-pass carry.
pub trait RecordEncoder {
    /// Feed one input line, without its `\n` terminator.
    fn push_line(&mut self, line: &[u8], out: &mut dyn Write) -> io::Result<()>;

    /// Flush any pending carry at end of input.
    fn finish(&mut self, out: &mut dyn Write) -> io::Result<()>;

    fn stats(&self) -> EncodeStats;
}

/// Build a fresh encoder for one pass.
#[must_use]
pub fn encoder_for(algorithm: Algorithm, max_fields: usize) -> Box<dyn RecordEncoder> {
    match algorithm {
        Algorithm::RunLength => Box::new(rle::RunLengthEncoder::new()),
        Algorithm::Delta => Box::new(delta::DeltaEncoder::new(max_fields)),
    }
}

/// Encode everything from `reader` into `writer`.
///
/// Lines are split on `\n`; a final line without a terminator is still a
/// record.
pub fn encode<R: BufRead, W: Write>(
    algorithm: Algorithm,
    max_fields: usize,
    mut reader: R,
    mut writer: W,
) -> io::Result<EncodeStats> {
    let mut encoder = encoder_for(algorithm, max_fields);
    let mut line = Vec::with_capacity(256);
    loop {
        line.clear();
        let read = reader.read_until(b'\n', &mut line)?;
        if read == 0 {
            break;
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        encoder.push_line(&line, &mut writer)?;
    }
    encoder.finish(&mut writer)?;
    writer.flush()?;
    Ok(encoder.stats())
}

/// Encode an in-memory buffer. Convenience for tests and the CLI.
pub fn encode_bytes(
    algorithm: Algorithm,
    max_fields: usize,
    input: &[u8],
) -> io::Result<(Vec<u8>, EncodeStats)> {
    let mut out = Vec::with_capacity(input.len());
    let stats = encode(algorithm, max_fields, input, &mut out)?;
    Ok((out, stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_parses_case_insensitively() {
        assert_eq!("rle".parse::<Algorithm>().unwrap(), Algorithm::RunLength);
        assert_eq!("DELTA".parse::<Algorithm>().unwrap(), Algorithm::Delta);
        assert_eq!(" Delta ".parse::<Algorithm>().unwrap(), Algorithm::Delta);
        assert!("zstd".parse::<Algorithm>().is_err());
    }

    #[test]
    fn algorithm_serde_uses_short_names() {
        let json = serde_json::to_string(&Algorithm::RunLength).unwrap();
        assert_eq!(json, "\"rle\"");
        let parsed: Algorithm = serde_json::from_str("\"delta\"").unwrap();
        assert_eq!(parsed, Algorithm::Delta);
    }

    #[test]
    fn algorithm_atomic_encoding_round_trips() {
        for algo in [Algorithm::RunLength, Algorithm::Delta] {
            assert_eq!(Algorithm::from_u8(algo.as_u8()), algo);
        }
        assert_eq!(Algorithm::from_u8(200), Algorithm::RunLength);
    }

    #[test]
    fn encode_dispatches_by_algorithm() {
        let (rle, _) = encode_bytes(Algorithm::RunLength, 32, b"a\na\nb\n").unwrap();
        assert_eq!(rle, b"a,2\nb,1\n");

        let (delta, stats) = encode_bytes(Algorithm::Delta, 32, b"1,2\n3,5\n").unwrap();
        assert_eq!(
            String::from_utf8(delta).unwrap(),
            "1.000000,2.000000\n2.000000,3.000000\n"
        );
        assert_eq!(stats.lines_in, 2);
        assert_eq!(stats.lines_out, 2);
    }

    #[test]
    fn final_line_without_newline_is_a_record() {
        let (out, stats) = encode_bytes(Algorithm::RunLength, 32, b"x\nx").unwrap();
        assert_eq!(out, b"x,2\n");
        assert_eq!(stats.lines_in, 2);
    }

    #[test]
    fn empty_input_gives_empty_output() {
        for algo in [Algorithm::RunLength, Algorithm::Delta] {
            let (out, stats) = encode_bytes(algo, 32, b"").unwrap();
            assert!(out.is_empty());
            assert_eq!(stats, EncodeStats::default());
        }
    }
}
