use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use ndarray::Array1;

use super::{add_behavior_device, Table};
use crate::config::Metadata;
use crate::document::{ColumnKind, NwbDocument, TimeSeries, TrialValue};
use crate::error::{require_dir, ConvertError, Result};
use crate::pipeline::Section;

const SUMMARY_SUFFIX: &str = "_tr.txt";

/// Trial column, summary header, value type and description of every
/// LabView trial column.
pub const LABVIEW_TRIAL_COLUMNS: [(&str, &str, ColumnKind, &str); 12] = [
    (
        "results",
        "Result",
        ColumnKind::Int,
        "0 means sucess (rewarded trial), 1 means licks during intitial period, which leads to a \
         failed trial. 2 means early lick failure. 3 means wrong lick or no response.",
    ),
    ("init_t", "InitT", ColumnKind::Float, "duration of initial delay period."),
    (
        "sample_t",
        "SampleT",
        ColumnKind::Int,
        "airpuff duration based on the LabView GUI parameter; not the actually air-puff duration.",
    ),
    (
        "prob_left",
        "ProbLeft",
        ColumnKind::Float,
        "probability for left trials in order to keep the number of left and right trials \
         balanced within the session.",
    ),
    (
        "rew_t",
        "RewT",
        ColumnKind::Float,
        "reward Time based on the LabView GUI parameter. Not the actually reward time of the \
         trial. There is no reward if the animal fails the trial.",
    ),
    ("l_rew_n", "LRew#", ColumnKind::Int, "counting the number of left rewards."),
    ("r_rew_n", "RRew#", ColumnKind::Int, "counting the number of right rewards."),
    ("inter_t", "InterT", ColumnKind::Float, "inter-trial delay period."),
    (
        "l_trial",
        "LTrial",
        ColumnKind::Int,
        "trial type (which side the air-puff is applied). 1 means left-trial, 0 means right-trial",
    ),
    (
        "free_lick",
        "Free Lick",
        ColumnKind::Int,
        "whether the animal is allowed to lick the wrong side during response period \
         (1 yes; 0 no). This mode is rarely on.",
    ),
    (
        "opto_cond",
        "OptoCond",
        ColumnKind::Int,
        "optical condition. Supposedly, it should indicate which type of the optical stimulation \
         is applied. However, this column does not represent the correct optical conditions. \
         *Correct optical conditions is recovered based on 'processRaw_UpdateSum.m' file.",
    ),
    (
        "opto_trial",
        "OptoTrial",
        ColumnKind::Int,
        "pre-determined opto trials: 1 opto trial; 0 non-opto. However, an opto-trial might not \
         actually have optical stimulation if the animal fails before the optical stimulation. \
         *'processRaw_UpdateSum.m' also goes through the raw data to update the wrongly labeled \
         opto trials.",
    ),
];

// Lick file column and series name with its fallback description
const LICK_SERIES: [(&str, &str, &str); 2] = [
    ("Lick 1", "left_lick", "left lick sensor"),
    ("Lick 2", "right_lick", "right lick sensor"),
];

/// The single `*_tr.txt` trial summary in `dir`.
pub fn find_summary_file(dir: &Path) -> Result<PathBuf> {
    require_dir(dir)?;
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_summary = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.ends_with(SUMMARY_SUFFIX));
        if path.is_file() && is_summary {
            found.push(path);
        }
    }
    found.sort();

    match found.len() {
        0 => Err(ConvertError::FileNotFound(dir.join(format!("*{}", SUMMARY_SUFFIX)))),
        1 => Ok(found.remove(0)),
        n => Err(ConvertError::Config(format!(
            "{} holds {} trial summaries ({}), expected one",
            dir.display(),
            n,
            found
                .iter()
                .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

/// Lick trace paired with a summary: `GPi4_..._OPTO_tr.txt` -> `GPi4_..._OPTO.txt`.
pub fn lick_file_for(summary: &Path) -> PathBuf {
    let name = summary
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let stem = name.strip_suffix(SUMMARY_SUFFIX).unwrap_or(name);
    summary.with_file_name(format!("{}.txt", stem))
}

/// LabView trials table plus left/right lick series.
///
/// LabView times are relative to an unrecorded clock, so no session start is
/// claimed here.
pub struct LabviewSection<'a> {
    pub dir: &'a Path,
}

impl LabviewSection<'_> {
    fn add_trials(&self, doc: &mut NwbDocument, summary: &Path) -> Result<()> {
        let table = Table::read(summary, b'\t')?;
        let start_col = table.column_index("StartT")?;
        let stop_col = table.column_index("EndT")?;
        let columns = LABVIEW_TRIAL_COLUMNS
            .iter()
            .map(|(name, header, kind, _)| -> Result<(&'static str, ColumnKind, usize)> {
                Ok((*name, *kind, table.column_index(header)?))
            })
            .collect::<Result<Vec<_>>>()?;

        if !doc.trials.is_empty() {
            return Err(ConvertError::SchemaMismatch(format!(
                "trials table already holds {} trials, cannot add LabView trials",
                doc.trials.len()
            )));
        }
        for (name, _, kind, description) in LABVIEW_TRIAL_COLUMNS.iter() {
            doc.trials.add_column(name, description, *kind)?;
        }

        for row in 0..table.len() {
            let mut values = Vec::with_capacity(columns.len());
            for &(name, kind, col) in &columns {
                let value = match kind {
                    ColumnKind::Int => TrialValue::Int(table.int_at(row, col)?),
                    _ => TrialValue::Float(table.f64_at(row, col)?),
                };
                values.push((name, value));
            }
            doc.trials.add_trial(
                table.f64_at(row, start_col)?,
                table.f64_at(row, stop_col)?,
                values,
            )?;
        }
        info!("Added {} LabView trials from {}", table.len(), summary.display());
        Ok(())
    }

    fn add_licks(&self, doc: &mut NwbDocument, metadata: &Metadata, lick_file: &Path) -> Result<()> {
        let table = Table::read(lick_file, b'\t')?;
        let time = Array1::from(table.f64_column("Time")?);
        let configured = metadata
            .behavior
            .as_ref()
            .and_then(|b| b.behavioral_time_series.as_ref())
            .map(|ts| ts.time_series.as_slice())
            .unwrap_or_default();

        for (header, name, fallback) in LICK_SERIES {
            let description = configured
                .iter()
                .find(|entry| entry.name == name)
                .map_or(fallback, |entry| entry.description.as_str());
            let data = Array1::from(table.f64_column(header)?);
            let series = TimeSeries::new(name, description, data, time.clone())?;
            doc.behavioral_time_series()?.add(series)?;
        }
        info!("Added lick series with {} samples", time.len());
        Ok(())
    }
}

impl Section for LabviewSection<'_> {
    fn name(&self) -> &str {
        "LabView behavior"
    }

    fn attach(&self, doc: &mut NwbDocument, metadata: &Metadata) -> Result<()> {
        let summary = find_summary_file(self.dir)?;
        let lick_file = lick_file_for(&summary);
        crate::error::require_file(&lick_file)?;

        add_behavior_device(doc, metadata)?;
        self.add_trials(doc, &summary)?;
        self.add_licks(doc, metadata, &lick_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lick_file_drops_tr_suffix() {
        let summary = Path::new("/data/GPi4_020619_AP3_4_OPTO_tr.txt");
        assert_eq!(
            lick_file_for(summary),
            PathBuf::from("/data/GPi4_020619_AP3_4_OPTO.txt")
        );
    }

    #[test]
    fn summary_lookup_needs_exactly_one_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            find_summary_file(dir.path()),
            Err(ConvertError::FileNotFound(_))
        ));
        fs::write(dir.path().join("a_tr.txt"), "").unwrap();
        fs::write(dir.path().join("a.txt"), "").unwrap();
        assert_eq!(find_summary_file(dir.path()).unwrap(), dir.path().join("a_tr.txt"));
        fs::write(dir.path().join("b_tr.txt"), "").unwrap();
        assert!(matches!(find_summary_file(dir.path()), Err(ConvertError::Config(_))));
    }
}
