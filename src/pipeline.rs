//! Conversion pipeline: create the document once, attach each selected
//! section in order, then write it.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::info;

use crate::behavior::{BpodSection, LabviewSection, TreadmillSection};
use crate::config::{ConversionConfig, Metadata};
use crate::document::NwbDocument;
use crate::ecephys::{EcephysSection, EphysInput};
use crate::error::{ConvertError, Result};
use crate::ophys::{FretSection, ImagingTrialsSection, TrialHeaders};
use crate::writer::{write_document, WriteReport};

/// A reader that adds one part of the recording to the document.
pub trait Section {
    /// Short name used in log messages
    fn name(&self) -> &str;

    fn attach(&self, doc: &mut NwbDocument, metadata: &Metadata) -> Result<()>;
}

/// Adds the `Subject` metadata section.
pub struct SubjectSection;

impl Section for SubjectSection {
    fn name(&self) -> &str {
        "subject"
    }

    fn attach(&self, doc: &mut NwbDocument, metadata: &Metadata) -> Result<()> {
        doc.set_subject(metadata.subject()?.clone());
        Ok(())
    }
}

/// Experiment layouts, each with the sources it reads.
#[derive(Debug, Clone, PartialEq)]
pub enum Experiment {
    /// Bpod behavior session (`.mat`)
    Bpod { session_file: PathBuf },
    /// VSFP FRET imaging with optional Intan recordings
    Fret {
        imaging_dir: PathBuf,
        ecephys_dir: Option<PathBuf>,
    },
    /// LabView behavior only
    Labview { behavior_dir: PathBuf },
    /// Treadmill and nose traces with optional Intan and LabView data
    Treadmill {
        treadmill_file: PathBuf,
        nose_file: PathBuf,
        ecephys_dir: Option<PathBuf>,
        behavior_dir: Option<PathBuf>,
    },
    /// Single Intan file plus LabView behavior
    Lisu {
        ecephys_file: PathBuf,
        behavior_dir: Option<PathBuf>,
    },
}

impl Experiment {
    pub fn name(&self) -> &'static str {
        match self {
            Experiment::Bpod { .. } => "bpod",
            Experiment::Fret { .. } => "fret",
            Experiment::Labview { .. } => "labview",
            Experiment::Treadmill { .. } => "treadmill",
            Experiment::Lisu { .. } => "lisu",
        }
    }
}

fn required<'a>(path: &'a Option<PathBuf>, what: &str, experiment: &Experiment) -> Result<&'a Path> {
    path.as_deref().ok_or_else(|| {
        ConvertError::Config(format!(
            "{} was selected but no {} was given for the {} experiment",
            what,
            what,
            experiment.name()
        ))
    })
}

/// One configured conversion.
pub struct Pipeline {
    config: ConversionConfig,
}

impl Pipeline {
    pub fn new(config: ConversionConfig) -> Self {
        Pipeline { config }
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    /// Sections the configuration selects, in attach order.
    fn sections(&self) -> Result<Vec<Box<dyn Section + '_>>> {
        let cfg = &self.config;
        let selected = cfg.sections;
        let imaging = &cfg.imaging;
        let mut sections: Vec<Box<dyn Section + '_>> = Vec::new();

        match &cfg.experiment {
            Experiment::Bpod { session_file } => {
                sections.push(Box::new(SubjectSection));
                if selected.behavior {
                    sections.push(Box::new(BpodSection { file: session_file }));
                }
            }
            experiment @ Experiment::Fret {
                imaging_dir,
                ecephys_dir,
            } => {
                if selected.behavior {
                    return Err(ConvertError::Config(
                        "the fret experiment stores its imaging trials in the trials table; \
                         LabView behavior cannot be added to it"
                            .to_string(),
                    ));
                }
                sections.push(Box::new(SubjectSection));
                let headers = Rc::new(TrialHeaders::new(imaging_dir, imaging));
                sections.push(Box::new(ImagingTrialsSection {
                    headers: Rc::clone(&headers),
                }));
                if selected.ophys {
                    sections.push(Box::new(FretSection { headers }));
                }
                if selected.ecephys {
                    let dir = required(ecephys_dir, "ecephys", experiment)?;
                    sections.push(Box::new(EcephysSection {
                        input: EphysInput::Directory(dir.to_path_buf()),
                    }));
                }
            }
            Experiment::Labview { behavior_dir } => {
                sections.push(Box::new(SubjectSection));
                if selected.behavior {
                    sections.push(Box::new(LabviewSection { dir: behavior_dir }));
                }
            }
            experiment @ Experiment::Treadmill {
                treadmill_file,
                nose_file,
                ecephys_dir,
                behavior_dir,
            } => {
                sections.push(Box::new(SubjectSection));
                if selected.ecephys {
                    let dir = required(ecephys_dir, "ecephys", experiment)?;
                    sections.push(Box::new(EcephysSection {
                        input: EphysInput::Directory(dir.to_path_buf()),
                    }));
                }
                if selected.behavior {
                    sections.push(Box::new(TreadmillSection {
                        treadmill_file,
                        nose_file,
                    }));
                    if let Some(dir) = behavior_dir {
                        sections.push(Box::new(LabviewSection { dir }));
                    }
                }
            }
            experiment @ Experiment::Lisu {
                ecephys_file,
                behavior_dir,
            } => {
                if selected.ecephys {
                    sections.push(Box::new(EcephysSection {
                        input: EphysInput::File(ecephys_file.clone()),
                    }));
                }
                if selected.behavior {
                    let dir = required(behavior_dir, "behavior", experiment)?;
                    sections.push(Box::new(LabviewSection { dir }));
                }
            }
        }

        if selected.ophys && !matches!(cfg.experiment, Experiment::Fret { .. }) {
            info!("The {} experiment has no imaging data; ophys ignored", cfg.experiment.name());
        }
        Ok(sections)
    }

    /// Builds the document without writing it.
    pub fn assemble(&self) -> Result<NwbDocument> {
        let metadata = &self.config.metadata;
        let mut doc = NwbDocument::create(metadata)?;
        for section in self.sections()? {
            info!("Adding {}", section.name());
            section.attach(&mut doc, metadata)?;
        }
        Ok(doc)
    }

    /// Assembles the document and writes it to the configured output.
    pub fn run(&self) -> Result<WriteReport> {
        info!(
            "Converting {} experiment to {}",
            self.config.experiment.name(),
            self.config.output.display()
        );
        let doc = self.assemble()?;
        write_document(&doc, &self.config.output)
    }
}
