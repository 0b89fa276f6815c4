//! In-memory NWB document.
//!
//! A document is created once from the metadata and then filled by each
//! selected section. Bulk data (imaging frames, amplifier samples) stays on
//! disk as lazy sources until the writer streams it out.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use log::{debug, info};
use ndarray::Array1;

use crate::config::{Metadata, SubjectMeta};
use crate::ecephys::EphysSource;
use crate::error::{ConvertError, Result};
use crate::ophys::ImagingSource;

/// Session start time and the source that first claimed it.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStart {
    pub time: NaiveDateTime,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElectrodeGroup {
    pub name: String,
    pub description: String,
    pub location: String,
    pub device: String,
}

/// Row of the electrode table. Unknown coordinates are NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct Electrode {
    pub id: usize,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub imp: f64,
    pub location: String,
    pub filtering: String,
    pub group: String,
}

/// Value type of a trial column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Int,
    Float,
    Bool,
    Text,
    /// Variable-length list of strings per trial
    Ragged,
}

/// One cell of the trial table.
#[derive(Debug, Clone, PartialEq)]
pub enum TrialValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Ragged(Vec<String>),
}

impl TrialValue {
    pub fn kind(&self) -> ColumnKind {
        match self {
            TrialValue::Int(_) => ColumnKind::Int,
            TrialValue::Float(_) => ColumnKind::Float,
            TrialValue::Bool(_) => ColumnKind::Bool,
            TrialValue::Text(_) => ColumnKind::Text,
            TrialValue::Ragged(_) => ColumnKind::Ragged,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Int(Vec<i64>),
    Float(Vec<f64>),
    Bool(Vec<bool>),
    Text(Vec<String>),
    Ragged(Vec<Vec<String>>),
}

impl ColumnData {
    fn empty(kind: ColumnKind) -> Self {
        match kind {
            ColumnKind::Int => ColumnData::Int(Vec::new()),
            ColumnKind::Float => ColumnData::Float(Vec::new()),
            ColumnKind::Bool => ColumnData::Bool(Vec::new()),
            ColumnKind::Text => ColumnData::Text(Vec::new()),
            ColumnKind::Ragged => ColumnData::Ragged(Vec::new()),
        }
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            ColumnData::Int(_) => ColumnKind::Int,
            ColumnData::Float(_) => ColumnKind::Float,
            ColumnData::Bool(_) => ColumnKind::Bool,
            ColumnData::Text(_) => ColumnKind::Text,
            ColumnData::Ragged(_) => ColumnKind::Ragged,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Int(v) => v.len(),
            ColumnData::Float(v) => v.len(),
            ColumnData::Bool(v) => v.len(),
            ColumnData::Text(v) => v.len(),
            ColumnData::Ragged(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Ints widen into float columns
    fn push(&mut self, value: TrialValue) -> Result<()> {
        match (self, value) {
            (ColumnData::Int(v), TrialValue::Int(x)) => v.push(x),
            (ColumnData::Float(v), TrialValue::Float(x)) => v.push(x),
            (ColumnData::Float(v), TrialValue::Int(x)) => v.push(x as f64),
            (ColumnData::Bool(v), TrialValue::Bool(x)) => v.push(x),
            (ColumnData::Text(v), TrialValue::Text(x)) => v.push(x),
            (ColumnData::Ragged(v), TrialValue::Ragged(x)) => v.push(x),
            (column, value) => {
                return Err(ConvertError::SchemaMismatch(format!(
                    "cannot store a {:?} value in a {:?} column",
                    value.kind(),
                    column.kind()
                )))
            }
        }
        Ok(())
    }
}

fn accepts(column: ColumnKind, value: ColumnKind) -> bool {
    column == value || (column == ColumnKind::Float && value == ColumnKind::Int)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub description: String,
    pub data: ColumnData,
}

/// Trials table: start/stop times plus declared columns.
///
/// Every declared column holds exactly one value per trial at all times.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrialTable {
    start_time: Vec<f64>,
    stop_time: Vec<f64>,
    columns: Vec<Column>,
}

impl TrialTable {
    pub fn len(&self) -> usize {
        self.start_time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.start_time.is_empty()
    }

    pub fn start_times(&self) -> &[f64] {
        &self.start_time
    }

    pub fn stop_times(&self) -> &[f64] {
        &self.stop_time
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    fn check_new_column(&self, name: &str) -> Result<()> {
        if name == "start_time" || name == "stop_time" || self.column(name).is_some() {
            return Err(ConvertError::SchemaMismatch(format!(
                "trial column '{}' already exists",
                name
            )));
        }
        Ok(())
    }

    /// Declares an empty column. Values are supplied with each `add_trial`.
    pub fn add_column(&mut self, name: &str, description: &str, kind: ColumnKind) -> Result<()> {
        self.check_new_column(name)?;
        if !self.is_empty() {
            return Err(ConvertError::SchemaMismatch(format!(
                "trial column '{}' declared without data after {} trials were added",
                name,
                self.len()
            )));
        }
        self.columns.push(Column {
            name: name.to_string(),
            description: description.to_string(),
            data: ColumnData::empty(kind),
        });
        Ok(())
    }

    /// Adds a column filled for the trials already in the table.
    pub fn add_column_with_data(&mut self, name: &str, description: &str, data: ColumnData) -> Result<()> {
        self.check_new_column(name)?;
        if data.len() != self.len() {
            return Err(ConvertError::SchemaMismatch(format!(
                "trial column '{}' has {} values for {} trials",
                name,
                data.len(),
                self.len()
            )));
        }
        self.columns.push(Column {
            name: name.to_string(),
            description: description.to_string(),
            data,
        });
        Ok(())
    }

    /// Appends a trial. `values` must name every declared column exactly once.
    /// Nothing is added when validation fails.
    pub fn add_trial<'a, I>(&mut self, start_time: f64, stop_time: f64, values: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a str, TrialValue)>,
    {
        let mut by_name: BTreeMap<&str, TrialValue> = BTreeMap::new();
        for (name, value) in values {
            if by_name.insert(name, value).is_some() {
                return Err(ConvertError::SchemaMismatch(format!(
                    "trial value for '{}' given twice",
                    name
                )));
            }
        }

        for column in &self.columns {
            match by_name.get(column.name.as_str()) {
                None => {
                    return Err(ConvertError::SchemaMismatch(format!(
                        "trial is missing a value for column '{}'",
                        column.name
                    )))
                }
                Some(value) if !accepts(column.data.kind(), value.kind()) => {
                    return Err(ConvertError::SchemaMismatch(format!(
                        "trial column '{}' holds {:?} values, got {:?}",
                        column.name,
                        column.data.kind(),
                        value.kind()
                    )))
                }
                Some(_) => {}
            }
        }
        if by_name.len() != self.columns.len() {
            let unknown: Vec<&str> = by_name
                .keys()
                .filter(|name| self.column(name).is_none())
                .copied()
                .collect();
            return Err(ConvertError::SchemaMismatch(format!(
                "trial values for undeclared columns: {}",
                unknown.join(", ")
            )));
        }

        for column in &mut self.columns {
            if let Some(value) = by_name.remove(column.name.as_str()) {
                column.data.push(value)?;
            }
        }
        self.start_time.push(start_time);
        self.stop_time.push(stop_time);
        Ok(())
    }
}

/// Sampled series with explicit timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    pub name: String,
    pub description: String,
    pub unit: String,
    pub data: Array1<f64>,
    pub timestamps: Array1<f64>,
}

impl TimeSeries {
    pub fn new(name: &str, description: &str, data: Array1<f64>, timestamps: Array1<f64>) -> Result<Self> {
        if data.len() != timestamps.len() {
            return Err(ConvertError::SchemaMismatch(format!(
                "series '{}' has {} samples and {} timestamps",
                name,
                data.len(),
                timestamps.len()
            )));
        }
        Ok(TimeSeries {
            name: name.to_string(),
            description: description.to_string(),
            unit: "n.a.".to_string(),
            data,
            timestamps,
        })
    }
}

/// Container of behavioral series.
#[derive(Debug, Clone, PartialEq)]
pub struct BehavioralTimeSeries {
    pub name: String,
    pub series: Vec<TimeSeries>,
}

impl BehavioralTimeSeries {
    pub fn add(&mut self, series: TimeSeries) -> Result<()> {
        if self.series.iter().any(|s| s.name == series.name) {
            return Err(ConvertError::SchemaMismatch(format!(
                "{} already holds a series named '{}'",
                self.name, series.name
            )));
        }
        self.series.push(series);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpticalChannel {
    pub name: String,
    pub description: String,
    pub emission_lambda: f64,
}

/// One channel of a FRET recording.
#[derive(Debug, Clone)]
pub struct FretSeries {
    pub name: String,
    pub description: String,
    pub fluorophore: String,
    pub unit: String,
    pub rate: f64,
    pub emission_lambda: f64,
    pub device: String,
    pub optical_channel: OpticalChannel,
    pub data: ImagingSource,
}

/// Donor and acceptor series of a FRET experiment.
#[derive(Debug, Clone)]
pub struct Fret {
    pub name: String,
    pub excitation_lambda: f64,
    pub donor: FretSeries,
    pub acceptor: FretSeries,
}

#[derive(Debug, Clone)]
pub struct ElectricalSeries {
    pub name: String,
    pub description: String,
    pub rate: f64,
    pub starting_time: f64,
    pub conversion: f64,
    /// Rows of the electrode table this series records from
    pub electrodes: Vec<usize>,
    pub data: EphysSource,
}

#[derive(Debug, Clone)]
pub enum Acquisition {
    Fret(Fret),
    ElectricalSeries(ElectricalSeries),
    BehavioralTimeSeries(BehavioralTimeSeries),
}

impl Acquisition {
    pub fn name(&self) -> &str {
        match self {
            Acquisition::Fret(f) => &f.name,
            Acquisition::ElectricalSeries(e) => &e.name,
            Acquisition::BehavioralTimeSeries(b) => &b.name,
        }
    }
}

/// Name of the behavioral container shared by the behavior readers
pub const BEHAVIORAL_TIME_SERIES: &str = "BehavioralTimeSeries";

/// The document being assembled.
#[derive(Debug, Clone)]
pub struct NwbDocument {
    pub session_description: String,
    pub identifier: String,
    /// NWBFile metadata fields without a dedicated slot
    pub file_fields: BTreeMap<String, serde_yaml::Value>,
    pub subject: Option<SubjectMeta>,
    pub devices: Vec<Device>,
    pub electrode_groups: Vec<ElectrodeGroup>,
    pub electrodes: Vec<Electrode>,
    pub trials: TrialTable,
    pub acquisition: Vec<Acquisition>,
    session_start: Option<SessionStart>,
}

impl NwbDocument {
    /// Creates the document from the `NWBFile` metadata section. A
    /// `session_start_time` given there is the first session start claim.
    pub fn create(metadata: &Metadata) -> Result<Self> {
        let file = &metadata.nwbfile;
        if file.session_description.trim().is_empty() {
            return Err(ConvertError::Config(
                "NWBFile.session_description is required".to_string(),
            ));
        }
        if file.identifier.trim().is_empty() {
            return Err(ConvertError::Config("NWBFile.identifier is required".to_string()));
        }

        let mut doc = NwbDocument {
            session_description: file.session_description.clone(),
            identifier: file.identifier.clone(),
            file_fields: file.extra.clone(),
            subject: None,
            devices: Vec::new(),
            electrode_groups: Vec::new(),
            electrodes: Vec::new(),
            trials: TrialTable::default(),
            acquisition: Vec::new(),
            session_start: None,
        };
        if let Some(start) = file.session_start()? {
            doc.claim_session_start(start, "NWBFile.session_start_time")?;
        }
        info!("Created document '{}'", doc.identifier);
        Ok(doc)
    }

    pub fn session_start(&self) -> Option<&SessionStart> {
        self.session_start.as_ref()
    }

    /// Proposes a session start time.
    ///
    /// The first claim wins. Repeating the same time is accepted; a different
    /// time fails with `SchemaMismatch` and leaves the first value in place.
    pub fn claim_session_start(&mut self, time: NaiveDateTime, source: &str) -> Result<()> {
        match &self.session_start {
            None => {
                debug!("Session start {} claimed by {}", time, source);
                self.session_start = Some(SessionStart {
                    time,
                    source: source.to_string(),
                });
                Ok(())
            }
            Some(current) if current.time == time => Ok(()),
            Some(current) => Err(ConvertError::SchemaMismatch(format!(
                "session start {} from {} conflicts with {} from {}",
                time, source, current.time, current.source
            ))),
        }
    }

    pub fn set_subject(&mut self, subject: SubjectMeta) {
        self.subject = Some(subject);
    }

    /// Adds a device; re-adding an identical device is a no-op.
    pub fn add_device(&mut self, name: &str, description: &str) -> Result<()> {
        if let Some(existing) = self.devices.iter().find(|d| d.name == name) {
            if existing.description == description {
                return Ok(());
            }
            return Err(ConvertError::SchemaMismatch(format!(
                "device '{}' already exists with another description",
                name
            )));
        }
        self.devices.push(Device {
            name: name.to_string(),
            description: description.to_string(),
        });
        Ok(())
    }

    pub fn add_electrode_group(&mut self, group: ElectrodeGroup) -> Result<()> {
        if !self.devices.iter().any(|d| d.name == group.device) {
            return Err(ConvertError::SchemaMismatch(format!(
                "electrode group '{}' refers to unknown device '{}'",
                group.name, group.device
            )));
        }
        if self.electrode_groups.iter().any(|g| g.name == group.name) {
            return Err(ConvertError::SchemaMismatch(format!(
                "electrode group '{}' already exists",
                group.name
            )));
        }
        self.electrode_groups.push(group);
        Ok(())
    }

    /// Appends an electrode with unknown position and impedance, returning its row.
    pub fn add_electrode(&mut self, location: &str, filtering: &str, group: &str) -> Result<usize> {
        if !self.electrode_groups.iter().any(|g| g.name == group) {
            return Err(ConvertError::SchemaMismatch(format!(
                "electrode refers to unknown group '{}'",
                group
            )));
        }
        let id = self.electrodes.len();
        self.electrodes.push(Electrode {
            id,
            x: f64::NAN,
            y: f64::NAN,
            z: f64::NAN,
            imp: f64::NAN,
            location: location.to_string(),
            filtering: filtering.to_string(),
            group: group.to_string(),
        });
        Ok(id)
    }

    pub fn add_acquisition(&mut self, acquisition: Acquisition) -> Result<()> {
        if self.acquisition.iter().any(|a| a.name() == acquisition.name()) {
            return Err(ConvertError::SchemaMismatch(format!(
                "acquisition '{}' already exists",
                acquisition.name()
            )));
        }
        info!("Added acquisition '{}'", acquisition.name());
        self.acquisition.push(acquisition);
        Ok(())
    }

    /// The shared behavioral container, created on first use.
    pub fn behavioral_time_series(&mut self) -> Result<&mut BehavioralTimeSeries> {
        let index = match self
            .acquisition
            .iter()
            .position(|a| a.name() == BEHAVIORAL_TIME_SERIES)
        {
            Some(index) => index,
            None => {
                self.acquisition
                    .push(Acquisition::BehavioralTimeSeries(BehavioralTimeSeries {
                        name: BEHAVIORAL_TIME_SERIES.to_string(),
                        series: Vec::new(),
                    }));
                self.acquisition.len() - 1
            }
        };
        match &mut self.acquisition[index] {
            Acquisition::BehavioralTimeSeries(b) => Ok(b),
            _ => Err(ConvertError::SchemaMismatch(format!(
                "acquisition '{}' is not a behavioral container",
                BEHAVIORAL_TIME_SERIES
            ))),
        }
    }

    pub fn acquisition(&self, name: &str) -> Option<&Acquisition> {
        self.acquisition.iter().find(|a| a.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn metadata() -> Metadata {
        let mut meta = Metadata::default();
        meta.nwbfile.session_description = "test".into();
        meta.nwbfile.identifier = "id".into();
        meta
    }

    fn at(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 8, 1)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn create_requires_identifier() {
        let mut meta = metadata();
        meta.nwbfile.identifier.clear();
        assert!(matches!(NwbDocument::create(&meta), Err(ConvertError::Config(_))));
    }

    #[test]
    fn yaml_start_time_is_first_claim() {
        let mut meta = metadata();
        meta.nwbfile.session_start_time = Some("2019-08-01T10:00:00".into());
        let mut doc = NwbDocument::create(&meta).unwrap();
        assert_eq!(doc.session_start().unwrap().time, at(10));
        assert!(doc.claim_session_start(at(11), "bpod").is_err());
    }

    #[test]
    fn conflicting_session_start_keeps_first() {
        let mut doc = NwbDocument::create(&metadata()).unwrap();
        assert!(doc.session_start().is_none());
        doc.claim_session_start(at(9), "imaging").unwrap();
        doc.claim_session_start(at(9), "imaging").unwrap();

        match doc.claim_session_start(at(12), "treadmill") {
            Err(ConvertError::SchemaMismatch(msg)) => {
                assert!(msg.contains("imaging"));
                assert!(msg.contains("treadmill"));
            }
            other => panic!("expected schema mismatch, got {:?}", other),
        }
        let start = doc.session_start().unwrap();
        assert_eq!(start.time, at(9));
        assert_eq!(start.source, "imaging");
    }

    #[test]
    fn add_trial_requires_every_column() {
        let mut table = TrialTable::default();
        table.add_column("results", "", ColumnKind::Int).unwrap();
        table.add_column("rew_t", "", ColumnKind::Float).unwrap();

        let err = table.add_trial(0.0, 1.0, vec![("results", TrialValue::Int(0))]);
        assert!(matches!(err, Err(ConvertError::SchemaMismatch(_))));
        assert!(table.is_empty());

        table
            .add_trial(0.0, 1.0, vec![("results", TrialValue::Int(0)), ("rew_t", TrialValue::Int(2))])
            .unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.column("rew_t").unwrap().data, ColumnData::Float(vec![2.0]));
    }

    #[test]
    fn add_trial_rejects_wrong_kind_and_unknown_column() {
        let mut table = TrialTable::default();
        table.add_column("reaching", "", ColumnKind::Bool).unwrap();
        assert!(table
            .add_trial(0.0, 1.0, vec![("reaching", TrialValue::Int(1))])
            .is_err());
        assert!(table
            .add_trial(
                0.0,
                1.0,
                vec![("reaching", TrialValue::Bool(true)), ("extra", TrialValue::Int(1))]
            )
            .is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn column_with_data_must_match_trial_count() {
        let mut table = TrialTable::default();
        table.add_trial(0.0, 1.0, Vec::new()).unwrap();
        table.add_trial(1.0, 2.0, Vec::new()).unwrap();

        assert!(table
            .add_column_with_data("Reward", "", ColumnData::Bool(vec![true]))
            .is_err());
        table
            .add_column_with_data("Reward", "", ColumnData::Bool(vec![true, false]))
            .unwrap();
        assert!(table.add_column("late", "", ColumnKind::Int).is_err());
        assert!(table
            .add_column_with_data("Reward", "", ColumnData::Bool(vec![true, false]))
            .is_err());
    }

    #[test]
    fn behavioral_container_is_shared() {
        let mut doc = NwbDocument::create(&metadata()).unwrap();
        let series = |name: &str| {
            TimeSeries::new(name, "", Array1::zeros(2), Array1::from(vec![0.0, 1.0])).unwrap()
        };
        doc.behavioral_time_series().unwrap().add(series("left_lick")).unwrap();
        doc.behavioral_time_series().unwrap().add(series("Treadmill")).unwrap();
        assert!(doc.behavioral_time_series().unwrap().add(series("Treadmill")).is_err());
        assert_eq!(doc.acquisition.len(), 1);
    }

    #[test]
    fn electrodes_need_known_group() {
        let mut doc = NwbDocument::create(&metadata()).unwrap();
        assert!(doc.add_electrode("loc", "none", "shank").is_err());
        doc.add_device("intan", "").unwrap();
        doc.add_electrode_group(ElectrodeGroup {
            name: "shank".into(),
            description: "".into(),
            location: "M1".into(),
            device: "intan".into(),
        })
        .unwrap();
        assert_eq!(doc.add_electrode("loc", "none", "shank").unwrap(), 0);
        assert_eq!(doc.add_electrode("loc", "none", "shank").unwrap(), 1);
        assert!(doc.electrodes[1].x.is_nan());
    }
}
