//! Converts Jaeger lab recordings into a single NWB-style archive.
//!
//! Sources: LabView trial logs and lick traces, treadmill CSV traces, Bpod
//! `.mat` sessions, Intan `.rhd` amplifier files and VSFP `.rsh`/`.rsd`
//! imaging trials. A [`Pipeline`] creates one [`NwbDocument`], lets every
//! selected [`Section`] attach its data, then writes the archive.

pub mod behavior;
pub mod config;
pub mod document;
pub mod ecephys;
pub mod error;
pub mod frames;
pub mod mat;
pub mod ophys;
pub mod pipeline;
pub mod rhd;
pub mod rsh;
pub mod writer;

pub use config::{ConversionConfig, ImagingOptions, Metadata, Sections};
pub use document::NwbDocument;
pub use error::{ConvertError, Result};
pub use frames::{decode_frames, SignConvention};
pub use pipeline::{Experiment, Pipeline, Section};
pub use writer::{write_document, ArchiveReader, WriteReport};

/// Runs one conversion and returns the written file's report.
///
/// # Examples
///
/// ```no_run
/// use jaeger_nwb::{convert, ConversionConfig, Experiment, Sections};
///
/// let experiment = Experiment::Labview {
///     behavior_dir: "data/labview".into(),
/// };
/// let config = ConversionConfig::new(experiment, "session.nwb".into(), "metafile.yml")
///     .unwrap()
///     .with_sections(Sections::all());
/// match convert(config) {
///     Ok(report) => println!("NWB file saved with size: {:.3} MB", report.size_mb()),
///     Err(e) => println!("Conversion failed: {}", e),
/// }
/// ```
pub fn convert(config: ConversionConfig) -> Result<WriteReport> {
    Pipeline::new(config).run()
}
