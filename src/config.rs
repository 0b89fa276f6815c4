//! Conversion configuration: the YAML metafile and the per-run options.
//!
//! Metadata sections are deserialized loosely. Lists default to empty and most
//! values are optional, so a metafile only has to carry what the selected
//! readers ask for. Missing entries surface as `ConvertError::Config` at the
//! point of use.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{require_file, ConvertError, Result};
use crate::frames::SignConvention;
use crate::pipeline::Experiment;

/// Trials converted when none are given on the command line
pub const DEFAULT_TRIALS: [&str; 3] = ["100", "101", "102"];
/// File name prefix of the imaging rig's trial headers
pub const DEFAULT_HEADER_PREFIX: &str = "VSFP_01A0801-";
/// Frames grouped into one stored chunk
pub const DEFAULT_BUFFER_FRAMES: usize = 1000;

/// Contents of the YAML metafile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(rename = "NWBFile", default)]
    pub nwbfile: NwbFileMeta,
    #[serde(rename = "Subject", default)]
    pub subject: Option<SubjectMeta>,
    #[serde(rename = "Ophys", default)]
    pub ophys: Option<OphysMeta>,
    #[serde(rename = "Ecephys", default)]
    pub ecephys: Option<EcephysMeta>,
    #[serde(rename = "Behavior", default)]
    pub behavior: Option<BehaviorMeta>,
    /// Top-level sections no reader understands, kept as written
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NwbFileMeta {
    #[serde(default)]
    pub session_description: String,
    #[serde(default)]
    pub identifier: String,
    #[serde(default, deserialize_with = "scalar_string")]
    pub session_start_time: Option<String>,
    /// Remaining NWBFile fields (experimenter, institution, ...), stored opaque
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl NwbFileMeta {
    /// `session_start_time` as a timestamp, if one was given.
    ///
    /// Accepts RFC 3339 (the offset is dropped after conversion to UTC),
    /// `YYYY-MM-DD[ T]HH:MM:SS[.f]` and a bare date.
    pub fn session_start(&self) -> Result<Option<NaiveDateTime>> {
        let text = match self.session_start_time.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => return Ok(None),
        };
        if let Ok(t) = DateTime::parse_from_rfc3339(text) {
            return Ok(Some(t.naive_utc()));
        }
        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(t) = NaiveDateTime::parse_from_str(text, format) {
                return Ok(Some(t));
            }
        }
        if let Ok(d) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
            return Ok(d.and_hms_opt(0, 0, 0));
        }
        Err(ConvertError::Config(format!(
            "NWBFile.session_start_time '{}' is not a recognized timestamp",
            text
        )))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectMeta {
    #[serde(default, deserialize_with = "scalar_string")]
    pub age: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub subject_id: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub species: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub genotype: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub date_of_birth: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub weight: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub sex: Option<String>,
}

/// Any list entry that only needs a name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OphysMeta {
    #[serde(rename = "Device", default)]
    pub device: Vec<NamedEntry>,
    #[serde(rename = "FRET", default)]
    pub fret: Vec<FretMeta>,
    #[serde(rename = "FRETSeries", default)]
    pub fret_series: Vec<FretSeriesMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FretMeta {
    pub name: String,
    #[serde(default)]
    pub excitation_lambda: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FretSeriesMeta {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub fluorophore: String,
    #[serde(default = "default_unit")]
    pub unit: String,
    /// Frame rate; the trial header's rate is used when absent
    #[serde(default)]
    pub rate: Option<f64>,
    #[serde(default)]
    pub emission_lambda: Option<f64>,
    #[serde(default)]
    pub optical_channel: Vec<OpticalChannelMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpticalChannelMeta {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub emission_lambda: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EcephysMeta {
    #[serde(rename = "Device", default)]
    pub device: Vec<NamedEntry>,
    #[serde(rename = "ElectrodeGroup", default)]
    pub electrode_group: Vec<ElectrodeGroupMeta>,
    #[serde(rename = "ElectricalSeries", default)]
    pub electrical_series: Vec<ElectricalSeriesMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectrodeGroupMeta {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectricalSeriesMeta {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_conversion")]
    pub conversion: f64,
    /// Overrides the `.rhd` header's sample rate
    #[serde(default)]
    pub rate: Option<f64>,
    #[serde(default)]
    pub starting_time: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BehaviorMeta {
    #[serde(rename = "Device", default)]
    pub device: Vec<NamedEntry>,
    #[serde(rename = "BehavioralTimeSeries", default)]
    pub behavioral_time_series: Option<BehavioralTimeSeriesMeta>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BehavioralTimeSeriesMeta {
    #[serde(default)]
    pub time_series: Vec<NamedEntry>,
}

fn default_unit() -> String {
    "n.a.".to_string()
}

fn default_conversion() -> f64 {
    1.0
}

// YAML scalars of any type read as text, so `weight: 25` and `weight: 25g` both load
fn scalar_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<String>, D::Error> {
    use serde_yaml::Value;
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(D::Error::custom(format!("expected a scalar, found {:?}", other))),
    }
}

fn missing(what: &str) -> ConvertError {
    ConvertError::Config(format!("metadata has no {}", what))
}

impl Metadata {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        require_file(path)?;
        let text = fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn subject(&self) -> Result<&SubjectMeta> {
        self.subject.as_ref().ok_or_else(|| missing("Subject section"))
    }

    pub fn ophys(&self) -> Result<&OphysMeta> {
        self.ophys.as_ref().ok_or_else(|| missing("Ophys section"))
    }

    pub fn ecephys(&self) -> Result<&EcephysMeta> {
        self.ecephys.as_ref().ok_or_else(|| missing("Ecephys section"))
    }

    pub fn behavior(&self) -> Result<&BehaviorMeta> {
        self.behavior.as_ref().ok_or_else(|| missing("Behavior section"))
    }
}

impl OphysMeta {
    pub fn device(&self) -> Result<&NamedEntry> {
        self.device.first().ok_or_else(|| missing("Ophys.Device entry"))
    }

    pub fn fret(&self) -> Result<&FretMeta> {
        self.fret.first().ok_or_else(|| missing("Ophys.FRET entry"))
    }

    /// Donor and acceptor series entries, the donor being the one named `donor`.
    pub fn donor_acceptor(&self) -> Result<(&FretSeriesMeta, &FretSeriesMeta)> {
        match self.fret_series.as_slice() {
            [first, second, ..] if first.name == "donor" => Ok((first, second)),
            [first, second, ..] => Ok((second, first)),
            _ => Err(missing("pair of Ophys.FRETSeries entries (donor and acceptor)")),
        }
    }
}

impl FretSeriesMeta {
    pub fn optical_channel(&self) -> Result<&OpticalChannelMeta> {
        self.optical_channel
            .first()
            .ok_or_else(|| missing(&format!("optical_channel for FRETSeries '{}'", self.name)))
    }
}

impl EcephysMeta {
    pub fn device(&self) -> Result<&NamedEntry> {
        self.device.first().ok_or_else(|| missing("Ecephys.Device entry"))
    }

    pub fn electrode_group(&self) -> Result<&ElectrodeGroupMeta> {
        self.electrode_group
            .first()
            .ok_or_else(|| missing("Ecephys.ElectrodeGroup entry"))
    }

    pub fn electrical_series(&self) -> Result<&ElectricalSeriesMeta> {
        self.electrical_series
            .first()
            .ok_or_else(|| missing("Ecephys.ElectricalSeries entry"))
    }
}

impl BehaviorMeta {
    pub fn time_series(&self) -> Result<&[NamedEntry]> {
        match &self.behavioral_time_series {
            Some(ts) if !ts.time_series.is_empty() => Ok(&ts.time_series),
            _ => Err(missing("Behavior.BehavioralTimeSeries.time_series entries")),
        }
    }
}

/// Which optional readers run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sections {
    pub ophys: bool,
    pub ecephys: bool,
    pub behavior: bool,
}

impl Sections {
    pub fn all() -> Self {
        Sections {
            ophys: true,
            ecephys: true,
            behavior: true,
        }
    }
}

/// Options for reading imaging trials.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagingOptions {
    /// Trial identifiers, in acquisition order
    pub trials: Vec<String>,
    pub header_prefix: String,
    pub sign: SignConvention,
    pub buffer_frames: usize,
}

impl Default for ImagingOptions {
    fn default() -> Self {
        ImagingOptions {
            trials: DEFAULT_TRIALS.iter().map(|t| t.to_string()).collect(),
            header_prefix: DEFAULT_HEADER_PREFIX.to_string(),
            sign: SignConvention::default(),
            buffer_frames: DEFAULT_BUFFER_FRAMES,
        }
    }
}

/// Everything one conversion needs.
#[derive(Debug, Clone)]
pub struct ConversionConfig {
    pub experiment: Experiment,
    pub sections: Sections,
    pub imaging: ImagingOptions,
    pub output: PathBuf,
    pub metadata: Metadata,
}

impl ConversionConfig {
    /// Builds a configuration, loading metadata from a YAML metafile.
    pub fn new<P: AsRef<Path>>(experiment: Experiment, output: PathBuf, metafile: P) -> Result<Self> {
        Ok(ConversionConfig {
            experiment,
            sections: Sections::default(),
            imaging: ImagingOptions::default(),
            output,
            metadata: Metadata::from_file(metafile)?,
        })
    }

    pub fn with_sections(mut self, sections: Sections) -> Self {
        self.sections = sections;
        self
    }

    pub fn with_imaging(mut self, imaging: ImagingOptions) -> Self {
        self.imaging = imaging;
        self
    }
}
