//! VSFP imaging: trial intervals from `.rsh` headers and FRET donor/acceptor
//! series backed by the `.rsd` frame files.

use std::cell::OnceCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::{debug, info, warn};
use ndarray::Array2;

use crate::config::{FretSeriesMeta, ImagingOptions, Metadata};
use crate::document::{Acquisition, Fret, FretSeries, NwbDocument, OpticalChannel};
use crate::error::{require_dir, require_file, ConvertError, Result};
use crate::frames::{frame_count_from_len, read_frame_file, FrameChunks, Frames, SignConvention};
use crate::pipeline::Section;
use crate::rsh::{trial_header_path, TrialMeta};

/// Channel letter of the donor recording
pub const DONOR_CHANNEL: char = 'A';
/// Channel letter of the acceptor recording
pub const ACCEPTOR_CHANNEL: char = 'B';

/// One imaging trial with both channel headers.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagingTrial {
    pub id: String,
    pub start_time: f64,
    pub stop_time: f64,
    pub donor: TrialMeta,
    pub acceptor: TrialMeta,
}

/// Reads both channel headers of every trial, in the given order.
///
/// Trials are laid end to end: each starts where the previous one stopped
/// and lasts `n_frames / sample_rate` seconds.
pub fn read_imaging_trials(dir: &Path, options: &ImagingOptions) -> Result<Vec<ImagingTrial>> {
    require_dir(dir)?;
    if options.trials.is_empty() {
        return Err(ConvertError::Config("no imaging trials selected".to_string()));
    }

    let mut trials = Vec::with_capacity(options.trials.len());
    let mut stop_time = 0.0;
    for id in &options.trials {
        let donor = TrialMeta::from_file(trial_header_path(dir, &options.header_prefix, id, DONOR_CHANNEL))?;
        let acceptor =
            TrialMeta::from_file(trial_header_path(dir, &options.header_prefix, id, ACCEPTOR_CHANNEL))?;
        check_channels_agree(id, &donor, &acceptor)?;

        let start_time = stop_time;
        stop_time += donor.duration();
        debug!("Trial {}: {:.3}s to {:.3}s", id, start_time, stop_time);
        trials.push(ImagingTrial {
            id: id.clone(),
            start_time,
            stop_time,
            donor,
            acceptor,
        });
    }
    Ok(trials)
}

fn check_channels_agree(id: &str, a: &TrialMeta, b: &TrialMeta) -> Result<()> {
    let mismatch = |what: &str, va: String, vb: String| {
        ConvertError::SchemaMismatch(format!(
            "trial {}: {} differs between channels ({} vs {})",
            id, what, va, vb
        ))
    };
    if a.acquisition_date != b.acquisition_date {
        return Err(mismatch(
            "acquisition date",
            a.acquisition_date.clone(),
            b.acquisition_date.clone(),
        ));
    }
    if a.sample_rate != b.sample_rate {
        return Err(mismatch("sample rate", a.sample_rate.to_string(), b.sample_rate.to_string()));
    }
    if a.n_frames != b.n_frames {
        return Err(mismatch("frame count", a.n_frames.to_string(), b.n_frames.to_string()));
    }
    Ok(())
}

/// Trial headers of one imaging directory, parsed on first use and shared
/// by the trials and FRET sections.
#[derive(Debug)]
pub struct TrialHeaders<'a> {
    pub dir: &'a Path,
    pub options: &'a ImagingOptions,
    trials: OnceCell<Vec<ImagingTrial>>,
}

impl<'a> TrialHeaders<'a> {
    pub fn new(dir: &'a Path, options: &'a ImagingOptions) -> Self {
        TrialHeaders {
            dir,
            options,
            trials: OnceCell::new(),
        }
    }

    pub fn trials(&self) -> Result<&[ImagingTrial]> {
        if let Some(trials) = self.trials.get() {
            return Ok(trials);
        }
        let trials = read_imaging_trials(self.dir, self.options)?;
        Ok(self.trials.get_or_init(|| trials))
    }
}

/// Lazily decoded frames of one channel across every trial.
///
/// Every file is checked for existence and stride when the source is built,
/// so a missing chunk fails before anything is written.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagingSource {
    files: Vec<PathBuf>,
    sign: SignConvention,
    buffer_frames: usize,
    frame_count: usize,
}

impl ImagingSource {
    pub fn new(files: Vec<PathBuf>, sign: SignConvention, buffer_frames: usize) -> Result<Self> {
        for file in &files {
            require_file(file)?;
        }
        let mut frame_count = 0;
        for file in &files {
            let len = fs::metadata(file)?.len();
            frame_count += frame_count_from_len(len).map_err(|e| match e {
                ConvertError::Decode(msg) => ConvertError::Decode(format!("{}: {}", file.display(), msg)),
                other => other,
            })?;
        }
        Ok(ImagingSource {
            files,
            sign,
            buffer_frames,
            frame_count,
        })
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn sign(&self) -> SignConvention {
        self.sign
    }

    /// Active 100 x 100 frames in file order.
    pub fn frames(&self) -> ImagingFrames {
        ImagingFrames {
            files: self.files.clone().into_iter(),
            current: None,
            sign: self.sign,
            failed: false,
        }
    }

    /// Frames stacked into `[n, 100, 100]` chunks of at most `buffer_frames`.
    pub fn chunks(&self) -> FrameChunks<ImagingFrames> {
        FrameChunks::new(self.frames(), self.buffer_frames)
    }
}

/// Iterator behind [`ImagingSource::frames`]; holds one decoded file at a time.
pub struct ImagingFrames {
    files: std::vec::IntoIter<PathBuf>,
    current: Option<Frames>,
    sign: SignConvention,
    failed: bool,
}

impl Iterator for ImagingFrames {
    type Item = Result<Array2<i32>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some(frame) = self.current.as_mut().and_then(|frames| frames.next()) {
                return Some(Ok(frame.active));
            }
            self.current = None;

            let path = self.files.next()?;
            debug!("Decoding {}", path.display());
            match read_frame_file(&path, self.sign) {
                Ok(frames) => self.current = Some(frames),
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Adds the imaging trials to the trials table and claims the session start
/// from the first trial's acquisition date.
pub struct ImagingTrialsSection<'a> {
    pub headers: Rc<TrialHeaders<'a>>,
}

impl Section for ImagingTrialsSection<'_> {
    fn name(&self) -> &str {
        "imaging trials"
    }

    fn attach(&self, doc: &mut NwbDocument, _metadata: &Metadata) -> Result<()> {
        let trials = self.headers.trials()?;
        if let Some(first) = trials.first() {
            let source = format!("trial header {}", first.id);
            doc.claim_session_start(first.donor.session_start()?, &source)?;
        }
        for trial in trials {
            doc.trials.add_trial(trial.start_time, trial.stop_time, Vec::new())?;
        }
        info!("Added {} imaging trials", trials.len());
        Ok(())
    }
}

/// FRET acquisition: one donor and one acceptor series over every trial.
pub struct FretSection<'a> {
    pub headers: Rc<TrialHeaders<'a>>,
}

impl FretSection<'_> {
    fn channel_source(&self, trials: &[ImagingTrial], channel: char) -> Result<ImagingSource> {
        let mut files = Vec::new();
        let mut expected = 0;
        for trial in trials {
            let meta = if channel == DONOR_CHANNEL {
                &trial.donor
            } else {
                &trial.acceptor
            };
            files.extend(meta.raw_files_or_err()?.iter().map(|name| self.headers.dir.join(name)));
            expected += meta.n_frames;
        }

        let options = self.headers.options;
        let source = ImagingSource::new(files, options.sign, options.buffer_frames)?;
        if source.frame_count() != expected {
            warn!(
                "Channel {}: raw files hold {} frames, trial headers announce {}",
                channel,
                source.frame_count(),
                expected
            );
        }
        info!(
            "Channel {}: {} frames in {} files",
            channel,
            source.frame_count(),
            source.files().len()
        );
        Ok(source)
    }
}

fn fret_series(
    meta: &FretSeriesMeta,
    name: &str,
    header_rate: f64,
    device: &str,
    data: ImagingSource,
) -> Result<FretSeries> {
    let rate = match meta.rate {
        Some(rate) => {
            if (rate - header_rate).abs() > 1e-9 {
                warn!(
                    "FRETSeries '{}': metadata rate {} Hz overrides trial header rate {} Hz",
                    meta.name, rate, header_rate
                );
            }
            rate
        }
        None => header_rate,
    };
    let channel = meta.optical_channel()?;
    let required = |value: Option<f64>, what: &str| {
        value.ok_or_else(|| {
            ConvertError::Config(format!("metadata has no {} for FRETSeries '{}'", what, meta.name))
        })
    };

    Ok(FretSeries {
        name: name.to_string(),
        description: meta.description.clone(),
        fluorophore: meta.fluorophore.clone(),
        unit: meta.unit.clone(),
        rate,
        emission_lambda: required(meta.emission_lambda, "emission_lambda")?,
        device: device.to_string(),
        optical_channel: OpticalChannel {
            name: channel.name.clone(),
            description: channel.description.clone(),
            emission_lambda: required(channel.emission_lambda, "optical_channel emission_lambda")?,
        },
        data,
    })
}

impl Section for FretSection<'_> {
    fn name(&self) -> &str {
        "FRET imaging"
    }

    fn attach(&self, doc: &mut NwbDocument, metadata: &Metadata) -> Result<()> {
        let ophys = metadata.ophys()?;
        let device = ophys.device()?;
        let fret = ophys.fret()?;
        let (donor_meta, acceptor_meta) = ophys.donor_acceptor()?;
        let excitation_lambda = fret.excitation_lambda.ok_or_else(|| {
            ConvertError::Config(format!("metadata has no excitation_lambda for FRET '{}'", fret.name))
        })?;

        let trials = self.headers.trials()?;
        let header_rate = trials
            .first()
            .map(|t| t.donor.sample_rate)
            .ok_or_else(|| ConvertError::Config("no imaging trials selected".to_string()))?;

        let donor_data = self.channel_source(trials, DONOR_CHANNEL)?;
        let acceptor_data = self.channel_source(trials, ACCEPTOR_CHANNEL)?;

        doc.add_device(&device.name, &device.description)?;
        let donor = fret_series(donor_meta, "donor", header_rate, &device.name, donor_data)?;
        let acceptor = fret_series(acceptor_meta, "acceptor", header_rate, &device.name, acceptor_data)?;

        doc.add_acquisition(Acquisition::Fret(Fret {
            name: fret.name.clone(),
            excitation_lambda,
            donor,
            acceptor,
        }))
    }
}
