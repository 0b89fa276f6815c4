mod common;

use std::path::Path;

use jaeger_nwb::document::Acquisition;
use jaeger_nwb::ecephys::EphysSource;
use jaeger_nwb::rhd::{self, load_and_combine_files};
use jaeger_nwb::{ArchiveReader, ConversionConfig, ConvertError, Experiment, Pipeline, Sections};
use ndarray::{Array2, Ix2};
use tempfile::TempDir;

const RATE: f32 = 20000.0;

// Channel 0 ramps up from zero, channel 1 ramps down.
fn ramp(samples: usize) -> Vec<Vec<u16>> {
    vec![
        (0..samples).map(|s| 32768 + s as u16).collect(),
        (0..samples).map(|s| 32768 - s as u16).collect(),
    ]
}

fn microvolts(offset: f64) -> f64 {
    offset * 0.195
}

// High for samples [0, 100) and [200, ..)
fn gate(samples: usize) -> Vec<bool> {
    (0..samples).map(|s| s < 100 || s >= 200).collect()
}

fn write_gated(path: &Path) {
    common::write_rhd(path, RATE, &ramp(256), Some(gate(256).as_slice()));
}

#[test]
fn reads_header_and_scales_amplifier() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("rec.rhd");
    common::write_rhd(&path, RATE, &ramp(128), None);

    let header = rhd::load_header(&path).unwrap();
    assert_eq!(header.sample_rate, RATE);
    assert_eq!(header.num_amplifier_channels(), 2);
    assert_eq!(header.amplifier_channels[1].native_channel_name, "A-001");

    let file = rhd::load_file(&path).unwrap();
    assert_eq!(file.num_samples(), 128);
    let samples = file.valid_amplifier_samples();
    assert_eq!(samples.dim(), (128, 2));
    assert!((samples[[10, 0]] - microvolts(10.0)).abs() < 1e-9);
    assert!((samples[[10, 1]] + microvolts(10.0)).abs() < 1e-9);
}

#[test]
fn digital_input_zero_gates_samples() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("gated.rhd");
    write_gated(&path);

    let file = rhd::load_file(&path).unwrap();
    assert_eq!(file.num_samples(), 256);
    let samples = file.valid_amplifier_samples();
    assert_eq!(samples.dim(), (156, 2));
    assert!((samples[[99, 0]] - microvolts(99.0)).abs() < 1e-9);
    assert!((samples[[100, 0]] - microvolts(200.0)).abs() < 1e-9);
}

#[test]
fn truncated_data_block_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("short.rhd");
    common::write_rhd(&path, RATE, &ramp(128), None);
    let mut bytes = std::fs::read(&path).unwrap();
    bytes.truncate(bytes.len() - 2);
    std::fs::write(&path, bytes).unwrap();

    assert!(matches!(
        rhd::load_file(&path),
        Err(rhd::IntanError::FileSizeError { .. })
    ));
}

#[test]
fn combined_files_join_in_order() {
    let tmp = TempDir::new().unwrap();
    let first = tmp.path().join("a.rhd");
    let second = tmp.path().join("b.rhd");
    common::write_rhd(&first, RATE, &ramp(128), None);
    common::write_rhd(&second, RATE, &ramp(256), None);

    let combined = load_and_combine_files(&[first.clone(), second.clone()]).unwrap();
    assert_eq!(combined.num_samples(), 384);
    assert_eq!(combined.source_files, vec![first, second]);
    assert!((combined.duration() - 384.0 / RATE).abs() < 1e-6);
}

#[test]
fn mismatched_rates_are_incompatible() {
    let tmp = TempDir::new().unwrap();
    let first = tmp.path().join("a.rhd");
    let second = tmp.path().join("b.rhd");
    common::write_rhd(&first, RATE, &ramp(128), None);
    common::write_rhd(&second, 30000.0, &ramp(128), None);

    assert!(matches!(
        EphysSource::new(vec![first, second]),
        Err(ConvertError::Intan(rhd::IntanError::IncompatibleHeaders(_)))
    ));
}

#[test]
fn directory_source_lists_files_by_name() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("intan");
    std::fs::create_dir(&dir).unwrap();
    common::write_rhd(&dir.join("rec_002.rhd"), RATE, &ramp(128), Some(gate(128).as_slice()));
    write_gated(&dir.join("rec_001.rhd"));
    std::fs::write(dir.join("notes.txt"), "not a recording").unwrap();

    let source = EphysSource::from_dir(&dir).unwrap();
    assert_eq!(source.files(), &[dir.join("rec_001.rhd"), dir.join("rec_002.rhd")]);
    assert!(!source.is_gated());
    let rows: Vec<usize> = source.chunks().map(|c| c.unwrap().nrows()).collect();
    assert_eq!(rows, vec![256, 128]);

    let gated = source.gated_on_dig_in();
    let rows: Vec<usize> = gated.chunks().map(|c| c.unwrap().nrows()).collect();
    assert_eq!(rows, vec![156, 100]);
}

#[test]
fn directory_mode_keeps_every_sample() {
    let tmp = TempDir::new().unwrap();
    let ecephys_dir = tmp.path().join("intan");
    std::fs::create_dir(&ecephys_dir).unwrap();
    write_gated(&ecephys_dir.join("rec.rhd"));
    let (treadmill_file, nose_file) = common::write_treadmill_files(tmp.path());
    let metafile = common::write_metafile(tmp.path(), None);

    let config = ConversionConfig::new(
        Experiment::Treadmill {
            treadmill_file,
            nose_file,
            ecephys_dir: Some(ecephys_dir),
            behavior_dir: None,
        },
        tmp.path().join("treadmill.nwb"),
        metafile,
    )
    .unwrap()
    .with_sections(Sections {
        ecephys: true,
        ..Sections::default()
    });
    let doc = Pipeline::new(config).assemble().unwrap();

    let Some(Acquisition::ElectricalSeries(series)) = doc.acquisition("ElectricalSeries") else {
        panic!("no ElectricalSeries acquisition");
    };
    assert!(!series.data.is_gated());
    let chunks: Vec<Array2<f64>> = series.data.chunks().map(|c| c.unwrap()).collect();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].dim(), (256, 2));
    assert!((chunks[0][[150, 0]] - microvolts(150.0)).abs() < 1e-9);
}

#[test]
fn empty_directory_is_file_not_found() {
    let tmp = TempDir::new().unwrap();
    assert!(matches!(
        EphysSource::from_dir(tmp.path()),
        Err(ConvertError::FileNotFound(_))
    ));
}

#[test]
fn lisu_conversion_writes_electrical_series() {
    let tmp = TempDir::new().unwrap();
    let ecephys_file = tmp.path().join("lisu.rhd");
    write_gated(&ecephys_file);
    let behavior_dir = tmp.path().join("labview");
    common::write_labview_dir(&behavior_dir, "GPi4_020619", &[common::LABVIEW_ROW]);
    let metafile = common::write_metafile(tmp.path(), Some("2019-06-02T10:00:00"));

    let config = ConversionConfig::new(
        Experiment::Lisu {
            ecephys_file,
            behavior_dir: Some(behavior_dir),
        },
        tmp.path().join("lisu.nwb"),
        metafile,
    )
    .unwrap()
    .with_sections(Sections {
        ecephys: true,
        behavior: true,
        ..Sections::default()
    });
    let pipeline = Pipeline::new(config);

    let doc = pipeline.assemble().unwrap();
    assert_eq!(doc.electrodes.len(), 2);
    assert!(doc.electrodes.iter().all(|e| e.location == "GPi" && e.group == "electrode_group"));
    assert_eq!(doc.trials.len(), 1);

    let report = pipeline.run().unwrap();
    let mut archive = ArchiveReader::open(&report.path).unwrap();
    let manifest = archive.manifest().unwrap();
    let series = manifest["acquisition"]
        .as_array()
        .unwrap()
        .iter()
        .find(|a| a["type"] == "ElectricalSeries")
        .unwrap()
        .clone();
    assert_eq!(series["rate"], 20000.0);
    assert_eq!(series["starting_time"], 0.0);
    assert_eq!(series["data"]["shape"], serde_json::json!([156, 2]));

    let data: Array2<f64> = archive
        .array::<f64, Ix2>("acquisition/ElectricalSeries/data/00000.npy")
        .unwrap();
    assert_eq!(data.dim(), (156, 2));
    assert!((data[[100, 1]] + microvolts(200.0)).abs() < 1e-9);
}

#[test]
fn ecephys_without_metadata_section_fails() {
    let tmp = TempDir::new().unwrap();
    let ecephys_file = tmp.path().join("lisu.rhd");
    write_gated(&ecephys_file);
    let metafile = tmp.path().join("bare.yml");
    std::fs::write(
        &metafile,
        "NWBFile:\n  session_description: bare\n  identifier: bare\n",
    )
    .unwrap();

    let config = ConversionConfig::new(
        Experiment::Lisu {
            ecephys_file,
            behavior_dir: None,
        },
        tmp.path().join("bare.nwb"),
        metafile,
    )
    .unwrap()
    .with_sections(Sections {
        ecephys: true,
        ..Sections::default()
    });
    assert!(matches!(
        Pipeline::new(config).assemble(),
        Err(ConvertError::Config(_))
    ));
}
