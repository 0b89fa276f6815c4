//! Synthetic recordings shared by the integration tests.
#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::ZlibEncoder;
use flate2::Compression;

// ---- metafile ----

pub const METAFILE: &str = r#"
NWBFile:
  session_description: synthetic session
  identifier: jaeger-test
  experimenter: [Jaeger Lab]
Subject:
  subject_id: GPi4
  species: Mus musculus
  weight: 25
Ophys:
  Device:
    - name: Device_fret
      description: VSFP imaging rig
  FRET:
    - name: FRET
      excitation_lambda: 482.0
  FRETSeries:
    - name: donor
      description: donor channel
      fluorophore: mCitrine
      emission_lambda: 585.0
      optical_channel:
        - name: optical_channel_donor
          emission_lambda: 585.0
    - name: acceptor
      description: acceptor channel
      fluorophore: mKate2
      emission_lambda: 628.0
      optical_channel:
        - name: optical_channel_acceptor
          emission_lambda: 628.0
Ecephys:
  Device:
    - name: Device_ecephys
      description: Intan RHD2000
  ElectrodeGroup:
    - name: electrode_group
      description: tungsten array
      location: GPi
  ElectricalSeries:
    - name: ElectricalSeries
      description: raw amplifier signal
Behavior:
  Device:
    - name: Device_behavior
      description: lick sensors
  BehavioralTimeSeries:
    time_series:
      - name: Treadmill
        description: treadmill speed
      - name: Nose
        description: nose position
"#;

/// Writes `METAFILE`, optionally with a fixed session start time.
pub fn write_metafile(dir: &Path, session_start_time: Option<&str>) -> PathBuf {
    let mut text = METAFILE.to_string();
    if let Some(start) = session_start_time {
        text = text.replacen(
            "  identifier: jaeger-test\n",
            &format!("  identifier: jaeger-test\n  session_start_time: \"{}\"\n", start),
            1,
        );
    }
    let path = dir.join("metafile.yml");
    fs::write(&path, text).unwrap();
    path
}

// ---- imaging trials ----

pub const WORDS_PER_FRAME: usize = 128 * 100;

pub fn write_trial_header(dir: &Path, trial: &str, channel: char, date: &str, frames: usize, files: &[&str]) {
    let mut text = format!(
        "acquisition_date={}\nsample_time= 5msec\npage_frames={}\nData-File-List\nmonitor.rsm\n",
        date, frames
    );
    for f in files {
        text.push_str(f);
        text.push('\n');
    }
    fs::write(dir.join(format!("VSFP_01A0801-{}_{}.rsh", trial, channel)), text).unwrap();
}

/// Raw frames where word `i` of frame `f` holds `base + f`.
pub fn write_raw_frames(path: &Path, frames: usize, base: i16) {
    let mut bytes = Vec::with_capacity(frames * WORDS_PER_FRAME * 2);
    for f in 0..frames {
        let value = base + f as i16;
        for _ in 0..WORDS_PER_FRAME {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
    }
    fs::write(path, bytes).unwrap();
}

/// Two trials of `frames` frames each, both channels, one raw file per
/// trial and channel. Donor words are `10 + f`, acceptor words `-20 + f`.
pub fn write_imaging_dir(dir: &Path, frames: usize) {
    for trial in ["100", "101"] {
        for (channel, base) in [('A', 10i16), ('B', -20i16)] {
            let raw = format!("VSFP_01A0801-{}_{}.rsd", trial, channel);
            write_trial_header(dir, trial, channel, "2019/08/01 14:03:22", frames, &[&raw]);
            write_raw_frames(&dir.join(&raw), frames, base);
        }
    }
}

// ---- LabView ----

pub const SUMMARY_HEADER: &str =
    "StartT\tEndT\tResult\tInitT\tSampleT\tProbLeft\tRewT\tLRew#\tRRew#\tInterT\tLTrial\tFree Lick\tOptoCond\tOptoTrial";

/// Writes `<stem>_tr.txt` with the given rows and a three-sample lick file.
pub fn write_labview_dir(dir: &Path, stem: &str, rows: &[&str]) {
    fs::create_dir_all(dir).unwrap();
    let mut summary = format!("{}\n", SUMMARY_HEADER);
    for row in rows {
        summary.push_str(row);
        summary.push('\n');
    }
    fs::write(dir.join(format!("{}_tr.txt", stem)), summary).unwrap();
    fs::write(
        dir.join(format!("{}.txt", stem)),
        "Time\tLick 1\tLick 2\n0.0\t0\t0\n0.1\t1\t0\n0.2\t0\t1\n",
    )
    .unwrap();
}

pub const LABVIEW_ROW: &str = "1.5\t4.0\t0\t0.5\t200\t0.5\t0.03\t1\t0\t2.0\t1\t0\t0\t1";

// ---- treadmill ----

pub fn write_treadmill_files(dir: &Path) -> (PathBuf, PathBuf) {
    let treadmill = dir.join("treadmill.csv");
    fs::write(
        &treadmill,
        "Time,Treadmill\n1565000000.0,0.1\n1565000000.5,0.2\n1565000001.0,0.3\n",
    )
    .unwrap();
    let nose = dir.join("nose.csv");
    fs::write(&nose, "Nose\n5.0\n6.0\n").unwrap();
    (treadmill, nose)
}

// ---- Intan RHD ----

const RHD_MAGIC: u32 = 0xc6912702;
/// Samples per data block for format version 3.x
pub const RHD_BLOCK: usize = 128;

fn qstring(out: &mut Vec<u8>, s: &str) {
    if s.is_empty() {
        out.extend_from_slice(&u32::MAX.to_le_bytes());
        return;
    }
    let units: Vec<u16> = s.encode_utf16().collect();
    out.extend_from_slice(&((units.len() * 2) as u32).to_le_bytes());
    for u in units {
        out.extend_from_slice(&u.to_le_bytes());
    }
}

fn i16s(out: &mut Vec<u8>, values: &[i16]) {
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

fn channel(out: &mut Vec<u8>, name: &str, order: i16, signal_type: i16) {
    qstring(out, name);
    qstring(out, name);
    // native order, custom order, type, enabled, chip channel, board stream
    i16s(out, &[order, order, signal_type, 1, order, 0]);
    // spike trigger settings
    i16s(out, &[0, 0, 0, 0]);
    out.extend_from_slice(&0f32.to_le_bytes());
    out.extend_from_slice(&0f32.to_le_bytes());
}

/// Writes a version 3.0 RHD file.
///
/// `amplifier[ch][s]` are raw words; the sample count must be a multiple
/// of [`RHD_BLOCK`]. With `dig_in0`, one digital input channel is written
/// whose bit 0 follows the given flags.
pub fn write_rhd(path: &Path, sample_rate: f32, amplifier: &[Vec<u16>], dig_in0: Option<&[bool]>) {
    let num_samples = amplifier.first().map_or(0, Vec::len);
    assert_eq!(num_samples % RHD_BLOCK, 0);

    let mut out = Vec::new();
    out.extend_from_slice(&RHD_MAGIC.to_le_bytes());
    i16s(&mut out, &[3, 0]);
    out.extend_from_slice(&sample_rate.to_le_bytes());
    // dsp enabled and six bandwidth settings
    i16s(&mut out, &[0]);
    for _ in 0..6 {
        out.extend_from_slice(&1.0f32.to_le_bytes());
    }
    // notch filter off
    i16s(&mut out, &[0]);
    out.extend_from_slice(&1000f32.to_le_bytes());
    out.extend_from_slice(&1000f32.to_le_bytes());
    for _ in 0..3 {
        qstring(&mut out, "");
    }
    // temperature sensors, eval board mode
    i16s(&mut out, &[0, 0]);
    qstring(&mut out, "");

    let groups = if dig_in0.is_some() { 2 } else { 1 };
    i16s(&mut out, &[groups]);

    qstring(&mut out, "Port A");
    qstring(&mut out, "A");
    i16s(&mut out, &[1, amplifier.len() as i16, amplifier.len() as i16]);
    for ch in 0..amplifier.len() {
        channel(&mut out, &format!("A-{:03}", ch), ch as i16, 0);
    }

    if dig_in0.is_some() {
        qstring(&mut out, "Board Digital Inputs");
        qstring(&mut out, "DIN");
        i16s(&mut out, &[1, 1, 0]);
        channel(&mut out, "DIGITAL-IN-00", 0, 4);
    }

    for block in 0..num_samples / RHD_BLOCK {
        let range = block * RHD_BLOCK..(block + 1) * RHD_BLOCK;
        for t in range.clone() {
            out.extend_from_slice(&(t as i32).to_le_bytes());
        }
        for samples in amplifier {
            for &word in &samples[range.clone()] {
                out.extend_from_slice(&word.to_le_bytes());
            }
        }
        if let Some(flags) = dig_in0 {
            for &high in &flags[range] {
                out.extend_from_slice(&u16::from(high).to_le_bytes());
            }
        }
    }

    fs::write(path, out).unwrap();
}

/// Raw amplifier word for `microvolts`, the inverse of the reader's scaling.
pub fn amplifier_word(microvolts: f64) -> u16 {
    (microvolts / 0.195 + 32768.0).round() as u16
}

// ---- MAT v5 ----

const MI_INT8: u32 = 1;
const MI_UINT16: u32 = 4;
const MI_INT32: u32 = 5;
const MI_UINT32: u32 = 6;
const MI_DOUBLE: u32 = 9;
const MI_MATRIX: u32 = 14;
const MI_COMPRESSED: u32 = 15;

const MX_CELL: u8 = 1;
const MX_STRUCT: u8 = 2;
const MX_CHAR: u8 = 4;
const MX_DOUBLE: u8 = 6;

const FIELD_NAME_LEN: usize = 32;

fn element(data_type: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&data_type.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    while out.len() % 8 != 0 {
        out.push(0);
    }
    out
}

fn matrix(class: u8, dims: &[usize], name: &str, body: &[u8]) -> Vec<u8> {
    let mut inner = Vec::new();
    inner.extend(element(MI_UINT32, &[class, 0, 0, 0, 0, 0, 0, 0]));
    let dims: Vec<u8> = dims.iter().flat_map(|&d| (d as i32).to_le_bytes()).collect();
    inner.extend(element(MI_INT32, &dims));
    inner.extend(element(MI_INT8, name.as_bytes()));
    inner.extend_from_slice(body);
    element(MI_MATRIX, &inner)
}

/// A MATLAB value to encode.
pub enum Mat {
    Doubles(Vec<f64>),
    Text(String),
    Cell(Vec<Mat>),
    Struct(Vec<(String, Mat)>),
}

pub fn doubles(values: &[f64]) -> Mat {
    Mat::Doubles(values.to_vec())
}

pub fn text(s: &str) -> Mat {
    Mat::Text(s.to_string())
}

pub fn field(name: &str, value: Mat) -> (String, Mat) {
    (name.to_string(), value)
}

fn encode(name: &str, value: &Mat) -> Vec<u8> {
    match value {
        Mat::Doubles(values) => {
            let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
            matrix(MX_DOUBLE, &[1, values.len()], name, &element(MI_DOUBLE, &bytes))
        }
        Mat::Text(s) => {
            let bytes: Vec<u8> = s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
            matrix(MX_CHAR, &[1, s.encode_utf16().count()], name, &element(MI_UINT16, &bytes))
        }
        Mat::Cell(items) => {
            let body: Vec<u8> = items.iter().flat_map(|item| encode("", item)).collect();
            matrix(MX_CELL, &[1, items.len()], name, &body)
        }
        Mat::Struct(fields) => {
            let mut body = element(MI_INT32, &(FIELD_NAME_LEN as i32).to_le_bytes());
            let mut names = vec![0u8; FIELD_NAME_LEN * fields.len()];
            for (i, (field, _)) in fields.iter().enumerate() {
                names[i * FIELD_NAME_LEN..i * FIELD_NAME_LEN + field.len()].copy_from_slice(field.as_bytes());
            }
            body.extend(element(MI_INT8, &names));
            for (_, value) in fields {
                body.extend(encode("", value));
            }
            matrix(MX_STRUCT, &[1, 1], name, &body)
        }
    }
}

/// Writes a MAT v5 file holding one zlib-compressed variable.
pub fn write_mat(path: &Path, name: &str, value: &Mat) {
    let mut out = vec![b' '; 116];
    out.extend_from_slice(&[0u8; 8]);
    out.extend_from_slice(&0x0100u16.to_le_bytes());
    out.extend_from_slice(b"IM");

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&encode(name, value)).unwrap();
    let compressed = encoder.finish().unwrap();
    out.extend_from_slice(&MI_COMPRESSED.to_le_bytes());
    out.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
    out.extend(compressed);

    fs::write(path, out).unwrap();
}

fn names(states: &[&str]) -> Mat {
    Mat::Cell(states.iter().map(|s| text(s)).collect())
}

/// Two-trial Bpod session started 2019-08-01 14:03:22.
///
/// Trial 1 visits WaitForPoke, Reward; trial 2 visits WaitForPoke, Punish,
/// WaitForPoke.
pub fn write_bpod_session(path: &Path) {
    let session = Mat::Struct(vec![
        field("nTrials", doubles(&[2.0])),
        field("TrialStartTimestamp", doubles(&[10.0, 20.0])),
        field("TrialEndTimestamp", doubles(&[15.0, 26.0])),
        field("TrialTypes", doubles(&[1.0, 2.0])),
        field("LEDTypes", doubles(&[0.0, 1.0])),
        field("Reaching", doubles(&[1.0, 0.0])),
        field(
            "RawData",
            Mat::Struct(vec![
                field(
                    "OriginalStateNamesByNumber",
                    Mat::Cell(vec![
                        names(&["WaitForPoke", "Reward"]),
                        names(&["WaitForPoke", "Punish"]),
                    ]),
                ),
                field(
                    "OriginalStateData",
                    Mat::Cell(vec![doubles(&[1.0, 2.0]), doubles(&[1.0, 2.0, 1.0])]),
                ),
                field(
                    "OriginalStateTimestamps",
                    Mat::Cell(vec![doubles(&[0.0, 1.5, 2.0]), doubles(&[0.0, 0.5, 3.0, 6.0])]),
                ),
            ]),
        ),
        field(
            "Info",
            Mat::Struct(vec![
                field("SessionDate", text("01-Aug-2019")),
                field("SessionStartTime_UTC", text("14:03:22")),
            ]),
        ),
    ]);
    write_mat(path, "SessionData", &session);
}
