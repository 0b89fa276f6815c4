use std::collections::BTreeSet;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use log::info;

use crate::config::Metadata;
use crate::document::{ColumnData, ColumnKind, NwbDocument, TrialValue};
use crate::error::{ConvertError, Result};
use crate::mat::{MatFile, MatValue};
use crate::pipeline::Section;

const SESSION_DATE_FORMAT: &str = "%d-%b-%Y";
const SESSION_TIME_FORMAT: &str = "%H:%M:%S";

/// One trial of a Bpod session, with its visited states in order.
#[derive(Debug, Clone, PartialEq)]
pub struct BpodTrial {
    pub start_time: f64,
    pub stop_time: f64,
    pub trial_type: i64,
    pub led_type: i64,
    pub reaching: f64,
    pub states: Vec<String>,
    /// Time spent in each entry of `states`
    pub state_durations: Vec<f64>,
}

impl BpodTrial {
    /// Duration of the first visit to `state`, if it was visited.
    pub fn first_duration(&self, state: &str) -> Option<f64> {
        let index = self.states.iter().position(|s| s == state)?;
        Some(self.state_durations.get(index).copied().unwrap_or(f64::NAN))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BpodSession {
    pub session_start: NaiveDateTime,
    pub trials: Vec<BpodTrial>,
    /// Every state name of the session, sorted
    pub state_names: Vec<String>,
}

fn bad(message: String) -> ConvertError {
    ConvertError::parse("Bpod SessionData", message)
}

fn integral(value: f64, what: &str) -> Result<i64> {
    if !value.is_finite() || value.fract() != 0.0 {
        return Err(bad(format!("{} value {} is not an integer", what, value)));
    }
    Ok(value as i64)
}

// Numeric per-trial vector with at least `n` entries
fn per_trial_numbers<'a>(session: &'a MatValue, field: &str, n: usize) -> Result<&'a [f64]> {
    let values = session.field(field)?.as_f64_slice()?;
    if values.len() < n {
        return Err(bad(format!("{} has {} entries for {} trials", field, values.len(), n)));
    }
    Ok(&values[..n])
}

// Per-trial cell entries; a single trial may be stored without the outer cell
fn per_trial_cells<'a>(value: &'a MatValue, what: &str, n: usize, inner_is_cell: bool) -> Result<Vec<&'a MatValue>> {
    let items = value.as_cell();
    let unwrapped = n == 1
        && match items.first() {
            Some(MatValue::Cell { .. }) => false,
            Some(MatValue::Numeric { .. }) => inner_is_cell,
            Some(_) => true,
            None => false,
        };
    let items = if unwrapped { vec![value] } else { items };
    if items.len() < n {
        return Err(bad(format!("{} has {} entries for {} trials", what, items.len(), n)));
    }
    Ok(items.into_iter().take(n).collect())
}

fn session_start(session: &MatValue) -> Result<NaiveDateTime> {
    let date_text = session.path("Info.SessionDate")?.as_str()?.trim();
    let time_text = session.path("Info.SessionStartTime_UTC")?.as_str()?.trim();
    let date = NaiveDate::parse_from_str(date_text, SESSION_DATE_FORMAT)
        .map_err(|e| bad(format!("SessionDate '{}': {}", date_text, e)))?;
    let time = NaiveTime::parse_from_str(time_text, SESSION_TIME_FORMAT)
        .map_err(|e| bad(format!("SessionStartTime_UTC '{}': {}", time_text, e)))?;
    Ok(date.and_time(time))
}

/// Reads `SessionData` from a Bpod `.mat` file.
pub fn read_bpod_session(path: &Path) -> Result<BpodSession> {
    let mat = MatFile::from_file(path)?;
    let session = mat.get("SessionData")?;

    let n_trials = integral(session.field("nTrials")?.as_f64()?, "nTrials")?;
    let n = usize::try_from(n_trials).map_err(|_| bad(format!("nTrials is {}", n_trials)))?;

    let starts = per_trial_numbers(session, "TrialStartTimestamp", n)?;
    let stops = per_trial_numbers(session, "TrialEndTimestamp", n)?;
    let trial_types = per_trial_numbers(session, "TrialTypes", n)?;
    let led_types = per_trial_numbers(session, "LEDTypes", n)?;
    let reaching = per_trial_numbers(session, "Reaching", n)?;

    let raw = session.field("RawData")?;
    let names_by_number = per_trial_cells(
        raw.field("OriginalStateNamesByNumber")?,
        "OriginalStateNamesByNumber",
        n,
        true,
    )?;
    let state_numbers = per_trial_cells(raw.field("OriginalStateData")?, "OriginalStateData", n, false)?;
    let state_times = per_trial_cells(
        raw.field("OriginalStateTimestamps")?,
        "OriginalStateTimestamps",
        n,
        false,
    )?;

    let mut all_names = BTreeSet::new();
    let mut trials = Vec::with_capacity(n);
    for tr in 0..n {
        let names = names_by_number[tr]
            .as_cell()
            .into_iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect::<Result<Vec<_>>>()?;
        all_names.extend(names.iter().cloned());

        let states = state_numbers[tr]
            .as_f64_slice()?
            .iter()
            .map(|&number| {
                let number = integral(number, "OriginalStateData")?;
                usize::try_from(number - 1)
                    .ok()
                    .and_then(|i| names.get(i))
                    .cloned()
                    .ok_or_else(|| {
                        bad(format!(
                            "trial {}: state number {} outside the {} named states",
                            tr + 1,
                            number,
                            names.len()
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let state_durations = state_times[tr]
            .as_f64_slice()?
            .windows(2)
            .map(|w| w[1] - w[0])
            .collect();

        trials.push(BpodTrial {
            start_time: starts[tr],
            stop_time: stops[tr],
            trial_type: integral(trial_types[tr], "TrialTypes")?,
            led_type: integral(led_types[tr], "LEDTypes")?,
            reaching: reaching[tr],
            states,
            state_durations,
        });
    }

    Ok(BpodSession {
        session_start: session_start(session)?,
        trials,
        state_names: all_names.into_iter().collect(),
    })
}

/// Bpod trials with per-state flag and first-visit duration columns.
pub struct BpodSection<'a> {
    pub file: &'a Path,
}

impl Section for BpodSection<'_> {
    fn name(&self) -> &str {
        "Bpod behavior"
    }

    fn attach(&self, doc: &mut NwbDocument, _metadata: &Metadata) -> Result<()> {
        let session = read_bpod_session(self.file)?;
        doc.claim_session_start(session.session_start, "Bpod SessionDate")?;

        let trials = &mut doc.trials;
        trials.add_column("trial_type", "trial type", ColumnKind::Int)?;
        trials.add_column("led_type", "LED stimulation type", ColumnKind::Int)?;
        trials.add_column("reaching", "reaching outcome", ColumnKind::Float)?;
        trials.add_column("states", "states visited, in order", ColumnKind::Ragged)?;

        for trial in &session.trials {
            trials.add_trial(
                trial.start_time,
                trial.stop_time,
                vec![
                    ("trial_type", TrialValue::Int(trial.trial_type)),
                    ("led_type", TrialValue::Int(trial.led_type)),
                    ("reaching", TrialValue::Float(trial.reaching)),
                    ("states", TrialValue::Ragged(trial.states.clone())),
                ],
            )?;
        }

        for state in &session.state_names {
            let visited = session
                .trials
                .iter()
                .map(|t| t.states.contains(state))
                .collect();
            let durations = session
                .trials
                .iter()
                .map(|t| t.first_duration(state).unwrap_or(f64::NAN))
                .collect();
            trials.add_column_with_data(state, &format!("trial visited state {}", state), ColumnData::Bool(visited))?;
            trials.add_column_with_data(
                &format!("{}_dur", state),
                &format!("duration of the first visit to {} (s)", state),
                ColumnData::Float(durations),
            )?;
        }

        info!(
            "Added {} Bpod trials with {} states",
            session.trials.len(),
            session.state_names.len()
        );
        Ok(())
    }
}
