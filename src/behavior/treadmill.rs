use std::path::Path;

use chrono::DateTime;
use log::{info, warn};
use ndarray::Array1;

use super::{add_behavior_device, Table};
use crate::config::Metadata;
use crate::document::{NwbDocument, TimeSeries};
use crate::error::{ConvertError, Result};
use crate::pipeline::Section;

/// Treadmill and nose-position traces read side by side.
///
/// Series come from `Behavior.BehavioralTimeSeries.time_series`; each name is
/// looked up in the treadmill file first, then in the nose file. Timestamps
/// are the treadmill `Time` column relative to its first sample, whose
/// absolute value (Unix seconds) is claimed as the session start.
pub struct TreadmillSection<'a> {
    pub treadmill_file: &'a Path,
    pub nose_file: &'a Path,
}

fn padded(mut values: Vec<f64>, len: usize) -> Array1<f64> {
    values.resize(len, f64::NAN);
    Array1::from(values)
}

impl Section for TreadmillSection<'_> {
    fn name(&self) -> &str {
        "treadmill behavior"
    }

    fn attach(&self, doc: &mut NwbDocument, metadata: &Metadata) -> Result<()> {
        let entries = metadata.behavior()?.time_series()?;
        let treadmill = Table::read(self.treadmill_file, b',')?;
        let nose = Table::read(self.nose_file, b',')?;

        let time = treadmill.f64_column("Time")?;
        let t0 = match time.first() {
            Some(t) if t.is_finite() => *t,
            _ => {
                return Err(ConvertError::parse(
                    self.treadmill_file.display().to_string(),
                    "first Time sample is missing",
                ))
            }
        };
        let secs = t0.floor();
        let nanos = ((t0 - secs) * 1e9).round().min(999_999_999.0) as u32;
        let start = DateTime::from_timestamp(secs as i64, nanos).ok_or_else(|| {
            ConvertError::parse(
                self.treadmill_file.display().to_string(),
                format!("Time {} is not a valid Unix timestamp", t0),
            )
        })?;
        doc.claim_session_start(start.naive_utc(), "treadmill Time")?;

        let len = treadmill.len().max(nose.len());
        if treadmill.len() != nose.len() {
            warn!(
                "Treadmill file has {} rows and nose file {}; shorter one padded with NaN",
                treadmill.len(),
                nose.len()
            );
        }
        let timestamps = padded(time.iter().map(|t| t - t0).collect(), len);

        add_behavior_device(doc, metadata)?;
        for entry in entries {
            let data = if treadmill.has_column(&entry.name) {
                treadmill.f64_column(&entry.name)?
            } else if nose.has_column(&entry.name) {
                nose.f64_column(&entry.name)?
            } else {
                return Err(ConvertError::parse(
                    format!("{} and {}", self.treadmill_file.display(), self.nose_file.display()),
                    format!("no column '{}'", entry.name),
                ));
            };
            let series = TimeSeries::new(&entry.name, &entry.description, padded(data, len), timestamps.clone())?;
            doc.behavioral_time_series()?.add(series)?;
        }
        info!("Added {} treadmill series with {} samples", entries.len(), len);
        Ok(())
    }
}
