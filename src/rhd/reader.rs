use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, info, warn};
use ndarray::{concatenate, s, Array1, Array2, Axis};
use std::f64::consts::PI;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::types::*;

// Constants used throughout the reader
const RHD_MAGIC_NUMBER: u32 = 0xc6912702;
const PRINT_PROGRESS_STEP: usize = 10;

// Scaling constants (from the Intan RHD2000 data file format)
const AMPLIFIER_SCALE_FACTOR: f64 = 0.195; // μV per bit
const AMPLIFIER_OFFSET: f64 = 32768.0;
const AUX_INPUT_SCALE_FACTOR: f64 = 37.4e-6; // V per bit
const SUPPLY_VOLTAGE_SCALE_FACTOR: f64 = 74.8e-6; // V per bit
const TEMP_SENSOR_SCALE: f64 = 100.0; // hundredths of °C
const ADC_SCALE_USB_INTERFACE: f64 = 152.59e-6; // eval board mode 1
const ADC_SCALE_RECORDING_CONTROLLER: f64 = 312.5e-6; // eval board mode 13
const ADC_SCALE_DEFAULT: f64 = 50.354e-6;

/// Loads an RHD file and returns a strongly-typed struct representation.
///
/// Reads the header, checks that the data section is a whole number of data
/// blocks, reads every block and scales the signals to physical units.
pub fn load_file<P: AsRef<Path>>(file_path: P) -> Result<RhdFile, IntanError> {
    let tic = Instant::now();

    let file = File::open(file_path.as_ref())?;
    let file_size = file.metadata()?.len();
    let mut reader = BufReader::with_capacity(65536, file); // 64KB buffer

    let header = read_header(&mut reader)?;

    let (data_present, num_blocks) = calculate_data_size(&header, file_size, &mut reader)?;

    let data = if data_present {
        let raw = read_all_data_blocks(&header, num_blocks, &mut reader)?;
        check_end_of_file(file_size, &mut reader)?;
        Some(process_data(&header, raw))
    } else {
        None
    };

    debug!(
        "Read {} in {:.1} seconds",
        file_path.as_ref().display(),
        tic.elapsed().as_secs_f64()
    );

    Ok(RhdFile {
        header,
        data,
        data_present,
        source_files: vec![file_path.as_ref().to_path_buf()],
    })
}

/// Reads only the header of an RHD file.
pub fn load_header<P: AsRef<Path>>(file_path: P) -> Result<RhdHeader, IntanError> {
    let file = File::open(file_path.as_ref())?;
    let mut reader = BufReader::new(file);
    read_header(&mut reader)
}

/// Reads the header from an RHD file
fn read_header<R: Read + Seek>(reader: &mut R) -> Result<RhdHeader, IntanError> {
    check_magic_number(reader)?;
    let version = read_version_number(reader)?;

    let num_samples_per_data_block = if version.major > 1 { 128 } else { 60 };

    let mut header = RhdHeader {
        version,
        sample_rate: 0.0,
        num_samples_per_data_block,
        frequency_parameters: FrequencyParameters::default(),
        notes: Notes::default(),
        num_temp_sensor_channels: 0,
        eval_board_mode: 0,
        reference_channel: String::new(),
        amplifier_channels: Vec::new(),
        spike_triggers: Vec::new(),
        aux_input_channels: Vec::new(),
        supply_voltage_channels: Vec::new(),
        board_adc_channels: Vec::new(),
        board_dig_in_channels: Vec::new(),
        board_dig_out_channels: Vec::new(),
    };

    header.sample_rate = reader.read_f32::<LittleEndian>()?;

    read_freq_settings(reader, &mut header)?;
    read_notch_filter_frequency(reader, &mut header)?;
    read_impedance_test_frequencies(reader, &mut header)?;

    header.notes.note1 = read_qstring(reader)?;
    header.notes.note2 = read_qstring(reader)?;
    header.notes.note3 = read_qstring(reader)?;

    if header.version.at_least(1, 1) {
        header.num_temp_sensor_channels = reader.read_i16::<LittleEndian>()?.max(0) as usize;
    }

    if header.version.at_least(1, 3) {
        header.eval_board_mode = reader.read_i16::<LittleEndian>()? as i32;
    }

    if header.version.major > 1 {
        header.reference_channel = read_qstring(reader)?;
    }

    let freq = &mut header.frequency_parameters;
    freq.amplifier_sample_rate = header.sample_rate;
    freq.aux_input_sample_rate = header.sample_rate / 4.0;
    freq.supply_voltage_sample_rate = header.sample_rate / num_samples_per_data_block as f32;
    freq.board_adc_sample_rate = header.sample_rate;
    freq.board_dig_in_sample_rate = header.sample_rate;

    read_signal_summary(reader, &mut header)?;

    log_header_summary(&header);

    Ok(header)
}

/// Helper function to check the magic number that identifies RHD files
fn check_magic_number<R: Read>(reader: &mut R) -> Result<(), IntanError> {
    let magic_number = reader.read_u32::<LittleEndian>()?;
    if magic_number != RHD_MAGIC_NUMBER {
        return Err(IntanError::UnrecognizedFileFormat(magic_number));
    }
    Ok(())
}

fn read_version_number<R: Read>(reader: &mut R) -> Result<Version, IntanError> {
    let major = reader.read_i16::<LittleEndian>()? as i32;
    let minor = reader.read_i16::<LittleEndian>()? as i32;

    info!("Reading Intan Technologies RHD2000 Data File, Version {}.{}", major, minor);

    Ok(Version { major, minor })
}

/// Helper function to read frequency settings
fn read_freq_settings<R: Read>(reader: &mut R, header: &mut RhdHeader) -> Result<(), IntanError> {
    let freq = &mut header.frequency_parameters;
    freq.dsp_enabled = reader.read_i16::<LittleEndian>()? as i32;
    freq.actual_dsp_cutoff_frequency = reader.read_f32::<LittleEndian>()?;
    freq.actual_lower_bandwidth = reader.read_f32::<LittleEndian>()?;
    freq.actual_upper_bandwidth = reader.read_f32::<LittleEndian>()?;
    freq.desired_dsp_cutoff_frequency = reader.read_f32::<LittleEndian>()?;
    freq.desired_lower_bandwidth = reader.read_f32::<LittleEndian>()?;
    freq.desired_upper_bandwidth = reader.read_f32::<LittleEndian>()?;
    Ok(())
}

fn read_notch_filter_frequency<R: Read>(reader: &mut R, header: &mut RhdHeader) -> Result<(), IntanError> {
    let notch_filter_mode = reader.read_i16::<LittleEndian>()? as i32;

    header.frequency_parameters.notch_filter_frequency = match notch_filter_mode {
        1 => Some(50),
        2 => Some(60),
        _ => None,
    };

    Ok(())
}

fn read_impedance_test_frequencies<R: Read>(
    reader: &mut R,
    header: &mut RhdHeader,
) -> Result<(), IntanError> {
    let freq = &mut header.frequency_parameters;
    freq.desired_impedance_test_frequency = reader.read_f32::<LittleEndian>()?;
    freq.actual_impedance_test_frequency = reader.read_f32::<LittleEndian>()?;
    Ok(())
}

fn read_signal_summary<R: Read + Seek>(reader: &mut R, header: &mut RhdHeader) -> Result<(), IntanError> {
    let number_of_signal_groups = reader.read_i16::<LittleEndian>()?;

    for group in 1..=number_of_signal_groups {
        add_signal_group_information(header, reader, group as i32)?;
    }

    Ok(())
}

fn add_signal_group_information<R: Read + Seek>(
    header: &mut RhdHeader,
    reader: &mut R,
    group_number: i32,
) -> Result<(), IntanError> {
    let signal_group_name = read_qstring(reader)?;
    let signal_group_prefix = read_qstring(reader)?;

    let signal_group_enabled = reader.read_i16::<LittleEndian>()?;
    let signal_group_num_channels = reader.read_i16::<LittleEndian>()?;
    let _ = reader.read_i16::<LittleEndian>()?; // amplifier channel count, recomputed below

    if signal_group_num_channels > 0 && signal_group_enabled > 0 {
        for _ in 0..signal_group_num_channels {
            add_channel_information(
                header,
                reader,
                &signal_group_name,
                &signal_group_prefix,
                group_number,
            )?;
        }
    }

    Ok(())
}

fn add_channel_information<R: Read + Seek>(
    header: &mut RhdHeader,
    reader: &mut R,
    signal_group_name: &str,
    signal_group_prefix: &str,
    group_number: i32,
) -> Result<(), IntanError> {
    let mut new_channel = ChannelInfo {
        port_name: signal_group_name.to_string(),
        port_prefix: signal_group_prefix.to_string(),
        port_number: group_number,
        ..Default::default()
    };
    let mut new_trigger = SpikeTrigger::default();

    new_channel.native_channel_name = read_qstring(reader)?;
    new_channel.custom_channel_name = read_qstring(reader)?;

    new_channel.native_order = reader.read_i16::<LittleEndian>()? as i32;
    new_channel.custom_order = reader.read_i16::<LittleEndian>()? as i32;
    let signal_type = reader.read_i16::<LittleEndian>()? as i32;
    let channel_enabled = reader.read_i16::<LittleEndian>()? as i32;
    new_channel.chip_channel = reader.read_i16::<LittleEndian>()? as i32;
    new_channel.board_stream = reader.read_i16::<LittleEndian>()? as i32;

    new_trigger.voltage_trigger_mode = reader.read_i16::<LittleEndian>()? as i32;
    new_trigger.voltage_threshold = reader.read_i16::<LittleEndian>()? as i32;
    new_trigger.digital_trigger_channel = reader.read_i16::<LittleEndian>()? as i32;
    new_trigger.digital_edge_polarity = reader.read_i16::<LittleEndian>()? as i32;

    new_channel.electrode_impedance_magnitude = reader.read_f32::<LittleEndian>()?;
    new_channel.electrode_impedance_phase = reader.read_f32::<LittleEndian>()?;

    if channel_enabled == 0 {
        return Ok(());
    }

    match signal_type {
        0 => {
            header.amplifier_channels.push(new_channel);
            header.spike_triggers.push(new_trigger);
        }
        1 => header.aux_input_channels.push(new_channel),
        2 => header.supply_voltage_channels.push(new_channel),
        3 => header.board_adc_channels.push(new_channel),
        4 => header.board_dig_in_channels.push(new_channel),
        5 => header.board_dig_out_channels.push(new_channel),
        other => return Err(IntanError::InvalidChannelType(other)),
    }

    Ok(())
}

fn log_header_summary(header: &RhdHeader) {
    let plural = |n: usize| if n != 1 { "s" } else { "" };
    let counts = [
        (header.amplifier_channels.len(), "amplifier channel"),
        (header.aux_input_channels.len(), "auxiliary input channel"),
        (header.supply_voltage_channels.len(), "supply voltage channel"),
        (header.board_adc_channels.len(), "board ADC channel"),
        (header.board_dig_in_channels.len(), "board digital input channel"),
        (header.board_dig_out_channels.len(), "board digital output channel"),
        (header.num_temp_sensor_channels, "temperature sensor channel"),
    ];
    for (n, what) in counts {
        info!("Found {} {}{}.", n, what, plural(n));
    }
}

/// Helper function to read a QString (UTF-16 encoded string)
///
/// QStrings are stored as UTF-16 with a 4-byte length prefix in bytes.
/// A length of 0xFFFFFFFF marks an empty string.
fn read_qstring<R: Read + Seek>(reader: &mut R) -> Result<String, IntanError> {
    let length = reader.read_u32::<LittleEndian>()?;

    if length == 0xFFFFFFFF {
        return Ok(String::new());
    }

    // Verify that the string length is reasonable given remaining file size
    let current_position = reader.stream_position()?;
    let file_length = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(current_position))?;

    if length as u64 > file_length - current_position + 1 {
        return Err(IntanError::StringReadError);
    }

    let length = (length as usize) / 2;
    let mut data = Vec::with_capacity(length);
    for _ in 0..length {
        data.push(reader.read_u16::<LittleEndian>()?);
    }

    String::from_utf16(&data).map_err(|_| IntanError::StringReadError)
}

/// Works out whether data follows the header and how many blocks it holds.
fn calculate_data_size<R: Read + Seek>(
    header: &RhdHeader,
    file_size: u64,
    reader: &mut R,
) -> Result<(bool, u64), IntanError> {
    let bytes_per_block = get_bytes_per_data_block(header) as u64;

    let current_position = reader.stream_position()?;
    let bytes_remaining = file_size - current_position;

    let data_present = bytes_remaining > 0;

    if bytes_remaining % bytes_per_block != 0 {
        return Err(IntanError::FileSizeError {
            remaining: bytes_remaining,
            bytes_per_block,
        });
    }

    let num_blocks = bytes_remaining / bytes_per_block;
    let num_samples = num_blocks * header.num_samples_per_data_block as u64;
    let record_time = num_samples as f32 / header.sample_rate;

    if data_present {
        info!(
            "File contains {:.3} seconds of data. Amplifiers were sampled at {:.2} kS/s.",
            record_time,
            header.sample_rate / 1000.0
        );
    } else {
        info!(
            "Header file contains no data. Amplifiers were sampled at {:.2} kS/s.",
            header.sample_rate / 1000.0
        );
    }

    Ok((data_present, num_blocks))
}

/// Bytes in one data block for this header's channel layout
pub(crate) fn get_bytes_per_data_block(header: &RhdHeader) -> usize {
    let n = header.num_samples_per_data_block;

    // Timestamps (one channel always present): 4 bytes per sample
    let mut bytes_per_block = bytes_per_signal_type(n, 1, 4);
    bytes_per_block += bytes_per_signal_type(n, header.amplifier_channels.len(), 2);
    // Auxiliary inputs run at a quarter of the amplifier rate
    bytes_per_block += bytes_per_signal_type(n / 4, header.aux_input_channels.len(), 2);
    // Supply voltage: one sample per block
    bytes_per_block += bytes_per_signal_type(1, header.supply_voltage_channels.len(), 2);
    bytes_per_block += bytes_per_signal_type(n, header.board_adc_channels.len(), 2);
    // Digital inputs and outputs are each packed into one word per sample
    if !header.board_dig_in_channels.is_empty() {
        bytes_per_block += bytes_per_signal_type(n, 1, 2);
    }
    if !header.board_dig_out_channels.is_empty() {
        bytes_per_block += bytes_per_signal_type(n, 1, 2);
    }
    bytes_per_block += bytes_per_signal_type(1, header.num_temp_sensor_channels, 2);

    bytes_per_block
}

fn bytes_per_signal_type(num_samples: usize, num_channels: usize, bytes_per_sample: usize) -> usize {
    num_samples * num_channels * bytes_per_sample
}

// Unscaled data as read from the blocks
struct RawData {
    timestamps: Array1<i32>,
    amplifier: Array2<i32>,
    aux_input: Array2<i32>,
    supply_voltage: Array2<i32>,
    temp_sensor: Array2<i32>,
    board_adc: Array2<i32>,
    board_dig_in: Array1<i32>,
    board_dig_out: Array1<i32>,
}

fn read_all_data_blocks<R: Read + Seek>(
    header: &RhdHeader,
    num_blocks: u64,
    reader: &mut R,
) -> Result<RawData, IntanError> {
    debug!("Reading data from file...");

    let n = header.num_samples_per_data_block;
    let num_blocks = num_blocks as usize;
    let num_samples = n * num_blocks;

    let mut raw = RawData {
        timestamps: Array1::zeros(num_samples),
        amplifier: Array2::zeros((header.amplifier_channels.len(), num_samples)),
        aux_input: Array2::zeros((header.aux_input_channels.len(), num_samples / 4)),
        supply_voltage: Array2::zeros((header.supply_voltage_channels.len(), num_blocks)),
        temp_sensor: Array2::zeros((header.num_temp_sensor_channels, num_blocks)),
        board_adc: Array2::zeros((header.board_adc_channels.len(), num_samples)),
        board_dig_in: Array1::zeros(num_samples),
        board_dig_out: Array1::zeros(num_samples),
    };

    let signed_timestamps = header.version.at_least(1, 2);
    let mut percent_done = PRINT_PROGRESS_STEP;

    for block in 0..num_blocks {
        read_one_data_block(&mut raw, header, block, signed_timestamps, reader)?;

        let progress = (block as f64 / num_blocks as f64) * 100.0;
        if progress >= percent_done as f64 {
            debug!("{}% done...", percent_done);
            percent_done += PRINT_PROGRESS_STEP;
        }
    }

    Ok(raw)
}

/// Reads one data block: timestamps, amplifier, aux, supply, temperature,
/// ADC, digital in, digital out.
fn read_one_data_block<R: Read>(
    raw: &mut RawData,
    header: &RhdHeader,
    block: usize,
    signed_timestamps: bool,
    reader: &mut R,
) -> Result<(), IntanError> {
    let n = header.num_samples_per_data_block;
    let index = block * n;

    for i in 0..n {
        raw.timestamps[index + i] = if signed_timestamps {
            reader.read_i32::<LittleEndian>()?
        } else {
            reader.read_u32::<LittleEndian>()? as i32
        };
    }

    read_analog_signal_type(reader, &mut raw.amplifier, index, n)?;
    read_analog_signal_type(reader, &mut raw.aux_input, block * (n / 4), n / 4)?;
    read_analog_signal_type(reader, &mut raw.supply_voltage, block, 1)?;

    for ch in 0..header.num_temp_sensor_channels {
        raw.temp_sensor[[ch, block]] = reader.read_i16::<LittleEndian>()? as i32;
    }

    read_analog_signal_type(reader, &mut raw.board_adc, index, n)?;

    if !header.board_dig_in_channels.is_empty() {
        read_digital_words(reader, &mut raw.board_dig_in, index, n)?;
    }
    if !header.board_dig_out_channels.is_empty() {
        read_digital_words(reader, &mut raw.board_dig_out, index, n)?;
    }

    Ok(())
}

/// Reads `num_samples` unsigned words per channel, channel after channel.
fn read_analog_signal_type<R: Read>(
    reader: &mut R,
    dest: &mut Array2<i32>,
    start: usize,
    num_samples: usize,
) -> Result<(), IntanError> {
    let num_channels = dest.nrows();
    if num_channels < 1 || num_samples < 1 {
        return Ok(());
    }

    let mut buffer = vec![0u8; num_samples * num_channels * 2];
    reader.read_exact(&mut buffer)?;

    let mut t_slice = dest.slice_mut(s![.., start..start + num_samples]);
    for ch in 0..num_channels {
        for s in 0..num_samples {
            let idx = 2 * (ch * num_samples + s);
            t_slice[[ch, s]] = u16::from_le_bytes([buffer[idx], buffer[idx + 1]]) as i32;
        }
    }

    Ok(())
}

fn read_digital_words<R: Read>(
    reader: &mut R,
    dest: &mut Array1<i32>,
    start: usize,
    num_samples: usize,
) -> Result<(), IntanError> {
    for i in 0..num_samples {
        dest[start + i] = reader.read_u16::<LittleEndian>()? as i32;
    }
    Ok(())
}

/// Verifies that every byte of the file was consumed.
fn check_end_of_file<R: Read + Seek>(filesize: u64, reader: &mut R) -> Result<(), IntanError> {
    let current_position = reader.stream_position()?;
    let bytes_remaining = filesize - current_position;

    if bytes_remaining != 0 {
        return Err(IntanError::FileSizeError {
            remaining: bytes_remaining,
            bytes_per_block: 0,
        });
    }

    Ok(())
}

fn process_data(header: &RhdHeader, raw: RawData) -> RhdData {
    debug!("Processing data...");

    check_timestamps(&raw.timestamps);

    let amplifier_data = (!header.amplifier_channels.is_empty()).then(|| {
        let mut amp = raw
            .amplifier
            .mapv(|x| (x as f64 - AMPLIFIER_OFFSET) * AMPLIFIER_SCALE_FACTOR);
        apply_notch_filter(header, &mut amp);
        amp
    });

    let aux_input_data = (!header.aux_input_channels.is_empty())
        .then(|| raw.aux_input.mapv(|x| x as f64 * AUX_INPUT_SCALE_FACTOR));

    let supply_voltage_data = (!header.supply_voltage_channels.is_empty())
        .then(|| raw.supply_voltage.mapv(|x| x as f64 * SUPPLY_VOLTAGE_SCALE_FACTOR));

    let temp_sensor_data = (header.num_temp_sensor_channels > 0)
        .then(|| raw.temp_sensor.mapv(|x| x as f64 / TEMP_SENSOR_SCALE));

    let board_adc_data = (!header.board_adc_channels.is_empty())
        .then(|| scale_adc_data(&raw.board_adc, header.eval_board_mode));

    let board_dig_in_data = (!header.board_dig_in_channels.is_empty())
        .then(|| extract_digital_data(&raw.board_dig_in, &header.board_dig_in_channels));

    let board_dig_out_data = (!header.board_dig_out_channels.is_empty())
        .then(|| extract_digital_data(&raw.board_dig_out, &header.board_dig_out_channels));

    RhdData {
        timestamps: raw.timestamps,
        amplifier_data,
        aux_input_data,
        supply_voltage_data,
        temp_sensor_data,
        board_adc_data,
        board_dig_in_data,
        board_dig_out_data,
    }
}

fn check_timestamps(timestamps: &Array1<i32>) {
    let num_gaps = timestamps
        .windows(2)
        .into_iter()
        .filter(|window| window[1].wrapping_sub(window[0]) != 1)
        .count();

    if num_gaps == 0 {
        debug!("No missing timestamps in data.");
    } else {
        warn!(
            "{} gaps in timestamp data found. Time scale will not be uniform!",
            num_gaps
        );
    }
}

/// Scales board ADC words to volts; the scale depends on the acquisition board
fn scale_adc_data(data_raw: &Array2<i32>, eval_board_mode: i32) -> Array2<f64> {
    match eval_board_mode {
        1 => data_raw.mapv(|x| (x as f64 - AMPLIFIER_OFFSET) * ADC_SCALE_USB_INTERFACE),
        13 => data_raw.mapv(|x| (x as f64 - AMPLIFIER_OFFSET) * ADC_SCALE_RECORDING_CONTROLLER),
        _ => data_raw.mapv(|x| x as f64 * ADC_SCALE_DEFAULT),
    }
}

/// Splits packed digital words into one 0/1 row per enabled channel
fn extract_digital_data(words: &Array1<i32>, channels: &[ChannelInfo]) -> Array2<i32> {
    let mut digital_data = Array2::<i32>::zeros((channels.len(), words.len()));

    for (i, channel) in channels.iter().enumerate() {
        let mask = 1 << channel.native_order;
        for (j, &word) in words.iter().enumerate() {
            digital_data[[i, j]] = i32::from(word & mask != 0);
        }
    }

    digital_data
}

fn apply_notch_filter(header: &RhdHeader, data: &mut Array2<f64>) {
    let notch_freq = match header.frequency_parameters.notch_filter_frequency {
        Some(freq) => freq as f32,
        None => return,
    };

    // Files from RHX 3.0 on were saved with the notch already applied
    if header.version.major >= 3 {
        return;
    }

    debug!("Applying {} Hz notch filter...", notch_freq);
    for mut channel in data.rows_mut() {
        let channel_data = channel.to_vec();
        let filtered = notch_filter(&channel_data, header.sample_rate, notch_freq, 10);
        for (dst, value) in channel.iter_mut().zip(filtered) {
            *dst = value;
        }
    }
}

// Second-order IIR notch, as in the Intan reference loaders
fn notch_filter(signal_in: &[f64], f_sample: f32, f_notch: f32, bandwidth: i32) -> Vec<f64> {
    let signal_length = signal_in.len();
    if signal_length < 3 {
        return signal_in.to_vec();
    }

    let t_step = 1.0 / f_sample as f64;
    let f_c = f_notch as f64 * t_step;

    let d = (-2.0 * PI * (bandwidth as f64 / 2.0) * t_step).exp();
    let b = (1.0 + d * d) * (2.0 * PI * f_c).cos();
    let a0 = 1.0;
    let a1 = -b;
    let a2 = d * d;
    let a = (1.0 + d * d) / 2.0;
    let b0 = 1.0;
    let b1 = -2.0 * (2.0 * PI * f_c).cos();
    let b2 = 1.0;

    let mut signal_out = vec![0.0; signal_length];
    signal_out[0] = signal_in[0];
    signal_out[1] = signal_in[1];

    for i in 2..signal_length {
        signal_out[i] =
            (a * b0 * signal_in[i] + a * b1 * signal_in[i - 1] + a * b2 * signal_in[i - 2]
                - a2 * signal_out[i - 2]
                - a1 * signal_out[i - 1])
                / a0;
    }

    signal_out
}

/// Loads several RHD files of one recording and joins them in the given order.
pub fn load_and_combine_files(file_paths: &[PathBuf]) -> Result<RhdFile, IntanError> {
    let (first, rest) = file_paths
        .split_first()
        .ok_or_else(|| IntanError::IncompatibleHeaders("no files to load".to_string()))?;

    info!("Loading file 1/{}: {}", file_paths.len(), first.display());
    let mut combined = load_file(first)?;

    for (i, file_path) in rest.iter().enumerate() {
        info!("Loading file {}/{}: {}", i + 2, file_paths.len(), file_path.display());
        let next = load_file(file_path)?;
        verify_header_compatibility(&combined.header, &next.header)?;
        combine_data(&mut combined, next);
    }

    info!("Total duration: {:.2} seconds", combined.duration());
    Ok(combined)
}

/// Checks that two headers describe the same channel layout and rate.
pub fn verify_header_compatibility(header1: &RhdHeader, header2: &RhdHeader) -> Result<(), IntanError> {
    if (header1.sample_rate - header2.sample_rate).abs() > 0.01 {
        return Err(IntanError::IncompatibleHeaders(format!(
            "sample rates don't match: {} Hz vs {} Hz",
            header1.sample_rate, header2.sample_rate
        )));
    }

    let counts = [
        ("amplifier", header1.amplifier_channels.len(), header2.amplifier_channels.len()),
        ("board ADC", header1.board_adc_channels.len(), header2.board_adc_channels.len()),
        ("digital input", header1.board_dig_in_channels.len(), header2.board_dig_in_channels.len()),
    ];
    for (what, a, b) in counts {
        if a != b {
            return Err(IntanError::IncompatibleHeaders(format!(
                "number of {} channels don't match: {} vs {}",
                what, a, b
            )));
        }
    }

    for (i, (ch1, ch2)) in header1
        .amplifier_channels
        .iter()
        .zip(&header2.amplifier_channels)
        .enumerate()
    {
        if ch1.native_channel_name != ch2.native_channel_name {
            return Err(IntanError::IncompatibleHeaders(format!(
                "amplifier channel {} names don't match: '{}' vs '{}'",
                i, ch1.native_channel_name, ch2.native_channel_name
            )));
        }
    }

    Ok(())
}

fn combine_data(combined: &mut RhdFile, next: RhdFile) {
    combined.source_files.extend(next.source_files);

    let next_data = match next.data {
        Some(data) => data,
        None => return,
    };
    let combined_data = match combined.data.as_mut() {
        Some(data) => data,
        None => {
            combined.data = Some(next_data);
            combined.data_present = true;
            return;
        }
    };

    combined_data.timestamps = concatenate![
        Axis(0),
        combined_data.timestamps.view(),
        next_data.timestamps.view()
    ];

    concat_samples(&mut combined_data.amplifier_data, next_data.amplifier_data);
    concat_samples(&mut combined_data.aux_input_data, next_data.aux_input_data);
    concat_samples(&mut combined_data.supply_voltage_data, next_data.supply_voltage_data);
    concat_samples(&mut combined_data.temp_sensor_data, next_data.temp_sensor_data);
    concat_samples(&mut combined_data.board_adc_data, next_data.board_adc_data);
    concat_samples(&mut combined_data.board_dig_in_data, next_data.board_dig_in_data);
    concat_samples(&mut combined_data.board_dig_out_data, next_data.board_dig_out_data);
}

fn concat_samples<T: Clone>(dest: &mut Option<Array2<T>>, next: Option<Array2<T>>) {
    if let (Some(current), Some(next)) = (dest.as_mut(), next) {
        *current = concatenate![Axis(1), current.view(), next.view()];
    }
}
