//! Extracellular electrophysiology from Intan `.rhd` files.

use std::path::{Path, PathBuf};

use log::{info, warn};
use ndarray::Array2;

use crate::config::Metadata;
use crate::document::{Acquisition, ElectricalSeries, ElectrodeGroup, NwbDocument};
use crate::error::{require_file, ConvertError, Result};
use crate::pipeline::Section;
use crate::rhd::{self, list_rhd_files, RhdHeader};

/// Amplifier samples of one or more `.rhd` files, read one file at a time.
///
/// Headers are read and cross-checked up front; sample data is only loaded
/// while the writer drains [`EphysSource::chunks`].
#[derive(Debug, Clone)]
pub struct EphysSource {
    files: Vec<PathBuf>,
    header: RhdHeader,
    gated: bool,
}

impl EphysSource {
    pub fn new(files: Vec<PathBuf>) -> Result<Self> {
        let first = files
            .first()
            .ok_or_else(|| ConvertError::Config("no .rhd files to read".to_string()))?;
        for file in &files {
            require_file(file)?;
        }

        let header = rhd::load_header(first)?;
        for file in &files[1..] {
            rhd::verify_header_compatibility(&header, &rhd::load_header(file)?)?;
        }
        Ok(EphysSource {
            files,
            header,
            gated: false,
        })
    }

    /// Every `.rhd` file of a directory, in name order.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let files = list_rhd_files(dir)?;
        if files.is_empty() {
            return Err(ConvertError::FileNotFound(dir.join("*.rhd")));
        }
        Self::new(files)
    }

    /// Keep only the samples recorded while digital input 0 was high.
    pub fn gated_on_dig_in(mut self) -> Self {
        self.gated = true;
        self
    }

    pub fn is_gated(&self) -> bool {
        self.gated
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Header of the first file
    pub fn header(&self) -> &RhdHeader {
        &self.header
    }

    pub fn num_channels(&self) -> usize {
        self.header.num_amplifier_channels()
    }

    /// One `[samples, channels]` chunk per file. A gated source keeps only
    /// the samples recorded while digital input 0 was high.
    pub fn chunks(&self) -> impl Iterator<Item = Result<Array2<f64>>> + '_ {
        self.files.iter().map(|path| -> Result<Array2<f64>> {
            info!("Loading {}", path.display());
            let file = rhd::load_file(path)?;
            if !self.gated {
                return Ok(file.amplifier_samples());
            }
            let samples = file.valid_amplifier_samples();
            if samples.nrows() < file.num_samples() {
                info!(
                    "Kept {} of {} samples gated by digital input 0",
                    samples.nrows(),
                    file.num_samples()
                );
            }
            Ok(samples)
        })
    }
}

/// Where the amplifier recording comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum EphysInput {
    /// Every `.rhd` file in a directory, all samples kept
    Directory(PathBuf),
    /// A single `.rhd` file gated on digital input 0
    File(PathBuf),
}

/// Device, electrode group, one electrode per amplifier channel and the
/// `ElectricalSeries` holding the samples.
pub struct EcephysSection {
    pub input: EphysInput,
}

impl Section for EcephysSection {
    fn name(&self) -> &str {
        "ecephys"
    }

    fn attach(&self, doc: &mut NwbDocument, metadata: &Metadata) -> Result<()> {
        let ecephys = metadata.ecephys()?;
        let device = ecephys.device()?;
        let group = ecephys.electrode_group()?;
        let series = ecephys.electrical_series()?;

        let source = match &self.input {
            EphysInput::Directory(dir) => EphysSource::from_dir(dir)?,
            EphysInput::File(file) => EphysSource::new(vec![file.clone()])?.gated_on_dig_in(),
        };

        let header_rate = source.header().sample_rate as f64;
        let rate = match series.rate {
            Some(rate) => {
                if (rate - header_rate).abs() > 1e-6 {
                    warn!(
                        "ElectricalSeries '{}': metadata rate {} Hz overrides .rhd rate {} Hz",
                        series.name, rate, header_rate
                    );
                }
                rate
            }
            None => header_rate,
        };

        doc.add_device(&device.name, &device.description)?;
        doc.add_electrode_group(ElectrodeGroup {
            name: group.name.clone(),
            description: group.description.clone(),
            location: group.location.clone(),
            device: device.name.clone(),
        })?;
        let electrodes = (0..source.num_channels())
            .map(|_| doc.add_electrode(&group.location, "none", &group.name))
            .collect::<Result<Vec<_>>>()?;
        info!(
            "Added {} electrodes from {} file(s) at {} Hz",
            electrodes.len(),
            source.files().len(),
            rate
        );

        doc.add_acquisition(Acquisition::ElectricalSeries(ElectricalSeries {
            name: series.name.clone(),
            description: series.description.clone(),
            rate,
            starting_time: series.starting_time.unwrap_or(0.0),
            conversion: series.conversion,
            electrodes,
            data: source,
        }))
    }
}
