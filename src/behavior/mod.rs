//! Behavioral sources: LabView trial logs, treadmill traces and Bpod sessions.

mod bpod;
mod labview;
mod treadmill;

pub use bpod::{read_bpod_session, BpodSection, BpodSession, BpodTrial};
pub use labview::{find_summary_file, lick_file_for, LabviewSection, LABVIEW_TRIAL_COLUMNS};
pub use treadmill::TreadmillSection;

use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};

use crate::config::Metadata;
use crate::document::NwbDocument;
use crate::error::{require_file, ConvertError, Result};

/// A delimited text table with a header row, held as text.
#[derive(Debug, Clone)]
pub struct Table {
    source: String,
    headers: Vec<String>,
    rows: Vec<StringRecord>,
}

impl Table {
    /// Reads a table. Short rows are allowed; their missing cells read as empty.
    pub fn read(path: &Path, delimiter: u8) -> Result<Self> {
        require_file(path)?;
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_path(path)?;

        let headers = reader.headers()?.iter().map(str::to_string).collect();
        let rows = reader.records().collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Table {
            source: path.display().to_string(),
            headers,
            rows,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.headers.iter().any(|h| h == name)
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| ConvertError::parse(&self.source, format!("missing column '{}'", name)))
    }

    fn cell(&self, row: usize, col: usize) -> &str {
        self.rows[row].get(col).unwrap_or("")
    }

    /// Numeric cell; an empty cell reads as NaN.
    pub fn f64_at(&self, row: usize, col: usize) -> Result<f64> {
        let text = self.cell(row, col);
        if text.is_empty() {
            return Ok(f64::NAN);
        }
        text.parse().map_err(|_| {
            ConvertError::parse(
                &self.source,
                format!(
                    "row {}, column '{}': '{}' is not a number",
                    row + 1,
                    self.headers[col],
                    text
                ),
            )
        })
    }

    /// Integer cell. Integral floats such as `3.0` are accepted.
    pub fn int_at(&self, row: usize, col: usize) -> Result<i64> {
        let value = self.f64_at(row, col)?;
        if !value.is_finite() || value.fract() != 0.0 {
            return Err(ConvertError::parse(
                &self.source,
                format!(
                    "row {}, column '{}': '{}' is not an integer",
                    row + 1,
                    self.headers[col],
                    self.cell(row, col)
                ),
            ));
        }
        Ok(value as i64)
    }

    pub fn f64_column(&self, name: &str) -> Result<Vec<f64>> {
        let col = self.column_index(name)?;
        (0..self.len()).map(|row| self.f64_at(row, col)).collect()
    }
}

/// Adds the first `Behavior.Device` entry, when the metafile has one.
pub(crate) fn add_behavior_device(doc: &mut NwbDocument, metadata: &Metadata) -> Result<()> {
    if let Some(device) = metadata.behavior.as_ref().and_then(|b| b.device.first()) {
        doc.add_device(&device.name, &device.description)?;
    }
    Ok(())
}
