use ndarray::{Array1, Array2, Axis};
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Version information for the RHD file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    /// Major version number
    pub major: i32,
    /// Minor version number
    pub minor: i32,
}

impl Version {
    /// True when this version is `major.minor` or newer
    pub fn at_least(&self, major: i32, minor: i32) -> bool {
        self.major > major || (self.major == major && self.minor >= minor)
    }
}

/// Notes stored in the RHD file.
///
/// The Intan acquisition software stores up to three free-text notes with
/// each recording.
#[derive(Debug, Clone, Default)]
pub struct Notes {
    pub note1: String,
    pub note2: String,
    pub note3: String,
}

/// Frequency parameters for the recording.
///
/// Includes both the requested values ("desired_*") and the values the
/// hardware actually achieved ("actual_*").
#[derive(Debug, Clone, Default)]
pub struct FrequencyParameters {
    /// Sample rate for amplifier channels (Hz)
    pub amplifier_sample_rate: f32,
    /// Sample rate for auxiliary inputs (Hz), a quarter of the amplifier rate
    pub aux_input_sample_rate: f32,
    /// Sample rate for supply voltage channels (Hz), one sample per data block
    pub supply_voltage_sample_rate: f32,
    /// Sample rate for board ADC channels (Hz)
    pub board_adc_sample_rate: f32,
    /// Sample rate for digital input channels (Hz)
    pub board_dig_in_sample_rate: f32,
    pub desired_dsp_cutoff_frequency: f32,
    pub actual_dsp_cutoff_frequency: f32,
    /// Whether DSP was enabled (1) or disabled (0)
    pub dsp_enabled: i32,
    pub desired_lower_bandwidth: f32,
    pub actual_lower_bandwidth: f32,
    pub desired_upper_bandwidth: f32,
    pub actual_upper_bandwidth: f32,
    /// Notch filter frequency (50Hz, 60Hz, or None)
    pub notch_filter_frequency: Option<i32>,
    pub desired_impedance_test_frequency: f32,
    pub actual_impedance_test_frequency: f32,
}

/// Information about an individual channel.
#[derive(Debug, Clone, Default)]
pub struct ChannelInfo {
    /// Name of the port (e.g., "Port A")
    pub port_name: String,
    /// Prefix for the port (e.g., "A")
    pub port_prefix: String,
    /// Signal group number the channel was listed under
    pub port_number: i32,
    /// Default channel name assigned by the system
    pub native_channel_name: String,
    /// User-defined custom name for the channel
    pub custom_channel_name: String,
    /// Original order in the native system
    pub native_order: i32,
    /// Custom order (often used for display purposes)
    pub custom_order: i32,
    /// Channel on the chip
    pub chip_channel: i32,
    /// Hardware stream on the board
    pub board_stream: i32,
    /// Measured electrode impedance magnitude (Ω)
    pub electrode_impedance_magnitude: f32,
    /// Measured electrode impedance phase (radians)
    pub electrode_impedance_phase: f32,
}

/// Spike trigger configuration, one per amplifier channel.
#[derive(Debug, Clone, Default)]
pub struct SpikeTrigger {
    /// 0: trigger on digital input, 1: trigger on voltage threshold
    pub voltage_trigger_mode: i32,
    /// Voltage threshold for triggering (μV)
    pub voltage_threshold: i32,
    pub digital_trigger_channel: i32,
    /// 0: falling edge, 1: rising edge
    pub digital_edge_polarity: i32,
}

/// Header of an RHD2000 file.
#[derive(Debug, Clone)]
pub struct RhdHeader {
    pub version: Version,
    /// Amplifier sample rate (Hz)
    pub sample_rate: f32,
    /// 60 for version 1.x files, 128 from version 2.0 on
    pub num_samples_per_data_block: usize,
    pub frequency_parameters: FrequencyParameters,
    pub notes: Notes,
    /// Temperature sensor channels (version 1.1 and later)
    pub num_temp_sensor_channels: usize,
    /// Evaluation board mode, selects the ADC scaling (version 1.3 and later)
    pub eval_board_mode: i32,
    /// Name of the reference channel (version 2.0 and later)
    pub reference_channel: String,
    pub amplifier_channels: Vec<ChannelInfo>,
    pub spike_triggers: Vec<SpikeTrigger>,
    pub aux_input_channels: Vec<ChannelInfo>,
    pub supply_voltage_channels: Vec<ChannelInfo>,
    pub board_adc_channels: Vec<ChannelInfo>,
    pub board_dig_in_channels: Vec<ChannelInfo>,
    pub board_dig_out_channels: Vec<ChannelInfo>,
}

impl RhdHeader {
    pub fn num_amplifier_channels(&self) -> usize {
        self.amplifier_channels.len()
    }
}

/// Scaled signals of an RHD file.
///
/// Every 2D field is shaped [num_channels, num_samples] at its own rate.
#[derive(Debug, Clone)]
pub struct RhdData {
    /// Sample counter, divide by the sample rate for seconds
    pub timestamps: Array1<i32>,
    /// Amplifier signals (μV)
    pub amplifier_data: Option<Array2<f64>>,
    /// Auxiliary inputs (V), quarter rate
    pub aux_input_data: Option<Array2<f64>>,
    /// Supply voltage (V), one sample per block
    pub supply_voltage_data: Option<Array2<f64>>,
    /// Temperature (°C), one sample per block
    pub temp_sensor_data: Option<Array2<f64>>,
    /// Board ADC inputs (V)
    pub board_adc_data: Option<Array2<f64>>,
    /// Digital inputs (0 or 1)
    pub board_dig_in_data: Option<Array2<i32>>,
    /// Digital outputs (0 or 1)
    pub board_dig_out_data: Option<Array2<i32>>,
}

/// Complete representation of an RHD file.
#[derive(Debug, Clone)]
pub struct RhdFile {
    pub header: RhdHeader,
    pub data: Option<RhdData>,
    pub data_present: bool,
    /// Files this recording was read from, in order
    pub source_files: Vec<PathBuf>,
}

impl RhdFile {
    /// Returns the duration of the recording in seconds, 0.0 without data.
    pub fn duration(&self) -> f32 {
        self.num_samples() as f32 / self.header.sample_rate
    }

    /// Returns the number of amplifier-rate samples, 0 without data.
    pub fn num_samples(&self) -> usize {
        self.data.as_ref().map_or(0, |d| d.timestamps.len())
    }

    /// Every amplifier sample, shaped [num_samples, num_channels].
    pub fn amplifier_samples(&self) -> Array2<f64> {
        let num_channels = self.header.num_amplifier_channels();
        match self.data.as_ref().and_then(|d| d.amplifier_data.as_ref()) {
            Some(amp) => amp.t().as_standard_layout().into_owned(),
            None => Array2::zeros((0, num_channels)),
        }
    }

    /// Amplifier samples recorded while digital input 0 was high, shaped
    /// [num_samples, num_channels].
    ///
    /// Files without digital inputs keep every sample.
    pub fn valid_amplifier_samples(&self) -> Array2<f64> {
        let num_channels = self.header.num_amplifier_channels();
        let data = match &self.data {
            Some(data) => data,
            None => return Array2::zeros((0, num_channels)),
        };
        let amp = match &data.amplifier_data {
            Some(amp) => amp,
            None => return Array2::zeros((0, num_channels)),
        };

        let keep: Vec<usize> = match &data.board_dig_in_data {
            Some(dig_in) if dig_in.nrows() > 0 => dig_in
                .row(0)
                .iter()
                .enumerate()
                .filter(|(_, &v)| v != 0)
                .map(|(i, _)| i)
                .collect(),
            _ => return self.amplifier_samples(),
        };

        amp.select(Axis(1), &keep).reversed_axes().as_standard_layout().into_owned()
    }
}

/// Errors raised by the RHD reader.
#[derive(Error, Debug)]
pub enum IntanError {
    /// The magic number does not identify an RHD2000 file
    #[error("Unrecognized file format (magic number {0:#010x})")]
    UnrecognizedFileFormat(u32),
    /// A channel reported a signal type the format does not define
    #[error("Invalid channel type {0}")]
    InvalidChannelType(i32),
    /// The data section is not a whole number of data blocks
    #[error("File size error: {remaining} bytes after header, {bytes_per_block} bytes per block")]
    FileSizeError { remaining: u64, bytes_per_block: u64 },
    /// Error reading a QString from the file
    #[error("Error reading string from file")]
    StringReadError,
    /// Two files of one recording do not share a channel layout
    #[error("Incompatible headers: {0}")]
    IncompatibleHeaders(String),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}
