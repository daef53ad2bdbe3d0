//! Delta encoding of comma-separated numeric rows.
//!
//! The first row is emitted as-is; every later row emits `current - previous`
//! per field position. Empty tokens are skipped, so `1,,2` has two fields.
//! Tokens that do not parse as a number count as `0.0`.

#![allow(missing_docs)]

use std::io::{self, Write};

use super::{EncodeStats, RecordEncoder};

/// Default cap on fields per row. Extra fields are dropped.
pub const MAX_DELTA_FIELDS: usize = 32;

/// Streaming delta encoder. The baseline starts at zero for every slot.
#[derive(Debug)]
pub struct DeltaEncoder {
    max_fields: usize,
    baseline: Vec<f64>,
    first_row: bool,
    fields: Vec<f64>,
    stats: EncodeStats,
}

impl DeltaEncoder {
    #[must_use]
    pub fn new(max_fields: usize) -> Self {
        Self {
            max_fields,
            baseline: vec![0.0; max_fields],
            first_row: true,
            fields: Vec::with_capacity(max_fields),
            stats: EncodeStats::default(),
        }
    }
}

/// Split a row into numeric fields, returning whether it was truncated.
fn parse_fields(line: &[u8], max_fields: usize, fields: &mut Vec<f64>) -> bool {
    fields.clear();
    let text = String::from_utf8_lossy(line);
    let mut tokens = text.split(',').filter(|token| !token.is_empty());
    for token in tokens.by_ref() {
        if fields.len() == max_fields {
            return true;
        }
        fields.push(token.trim().parse::<f64>().unwrap_or(0.0));
    }
    false
}

fn write_row(out: &mut dyn Write, values: impl Iterator<Item = f64>) -> io::Result<()> {
    for (i, value) in values.enumerate() {
        if i > 0 {
            out.write_all(b",")?;
        }
        write!(out, "{value:.6}")?;
    }
    out.write_all(b"\n")
}

impl RecordEncoder for DeltaEncoder {
    fn push_line(&mut self, line: &[u8], out: &mut dyn Write) -> io::Result<()> {
        self.stats.lines_in += 1;
        if parse_fields(line, self.max_fields, &mut self.fields) {
            self.stats.truncated_rows += 1;
        }
        if self.first_row {
            write_row(out, self.fields.iter().copied())?;
            self.first_row = false;
        } else {
            let baseline = &self.baseline;
            write_row(
                out,
                self.fields
                    .iter()
                    .zip(baseline.iter())
                    .map(|(current, previous)| current - previous),
            )?;
        }
        for (slot, value) in self.baseline.iter_mut().zip(self.fields.iter()) {
            *slot = *value;
        }
        self.stats.lines_out += 1;
        Ok(())
    }

    fn finish(&mut self, _out: &mut dyn Write) -> io::Result<()> {
        Ok(())
    }

    fn stats(&self) -> EncodeStats {
        self.stats
    }
}

/// Rebuild absolute rows from delta output.
///
/// Values are reconstructed at the six-decimal precision of the encoded form.
pub fn decode_delta(encoded: &str, max_fields: usize) -> Vec<Vec<f64>> {
    let mut baseline = vec![0.0_f64; max_fields];
    let mut rows = Vec::new();
    let mut fields = Vec::with_capacity(max_fields);
    for line in encoded.lines() {
        parse_fields(line.as_bytes(), max_fields, &mut fields);
        let row: Vec<f64> = fields
            .iter()
            .zip(baseline.iter())
            .map(|(delta, previous)| previous + delta)
            .collect();
        for (slot, value) in baseline.iter_mut().zip(row.iter()) {
            *slot = *value;
        }
        rows.push(row);
    }
    rows
}
