mod common;

use jaeger_nwb::document::{Acquisition, ColumnData, BEHAVIORAL_TIME_SERIES};
use jaeger_nwb::{ArchiveReader, ConversionConfig, ConvertError, Experiment, Pipeline, Sections};
use ndarray::{Array1, Ix1};
use tempfile::TempDir;

fn behavior_only() -> Sections {
    Sections {
        behavior: true,
        ..Sections::default()
    }
}

fn labview_pipeline(tmp: &TempDir, start: Option<&str>) -> Pipeline {
    let behavior_dir = tmp.path().join("labview");
    common::write_labview_dir(&behavior_dir, "GPi4_020619_OPTO", &[common::LABVIEW_ROW]);
    let metafile = common::write_metafile(tmp.path(), start);
    let config = ConversionConfig::new(
        Experiment::Labview { behavior_dir },
        tmp.path().join("labview.nwb"),
        metafile,
    )
    .unwrap()
    .with_sections(behavior_only());
    Pipeline::new(config)
}

#[test]
fn labview_row_becomes_one_trial() {
    let tmp = TempDir::new().unwrap();
    let doc = labview_pipeline(&tmp, None).assemble().unwrap();

    assert_eq!(doc.trials.len(), 1);
    assert_eq!(doc.trials.start_times(), &[1.5]);
    assert_eq!(doc.trials.stop_times(), &[4.0]);
    assert_eq!(doc.trials.columns().len(), 12);
    assert_eq!(doc.trials.column("results").unwrap().data, ColumnData::Int(vec![0]));
    assert_eq!(doc.trials.column("sample_t").unwrap().data, ColumnData::Int(vec![200]));
    assert_eq!(doc.trials.column("rew_t").unwrap().data, ColumnData::Float(vec![0.03]));
    assert_eq!(doc.trials.column("opto_trial").unwrap().data, ColumnData::Int(vec![1]));
    assert!(doc.devices.iter().any(|d| d.name == "Device_behavior"));

    let Some(Acquisition::BehavioralTimeSeries(container)) = doc.acquisition(BEHAVIORAL_TIME_SERIES) else {
        panic!("no behavioral container");
    };
    let names: Vec<&str> = container.series.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["left_lick", "right_lick"]);
    assert_eq!(container.series[0].data.to_vec(), vec![0.0, 1.0, 0.0]);
    assert_eq!(container.series[1].timestamps.to_vec(), vec![0.0, 0.1, 0.2]);
}

#[test]
fn labview_alone_has_no_session_start() {
    let tmp = TempDir::new().unwrap();
    let pipeline = labview_pipeline(&tmp, None);
    assert!(matches!(pipeline.run(), Err(ConvertError::Config(_))));
    assert!(!tmp.path().join("labview.nwb").exists());
}

#[test]
fn labview_archive_reads_back() {
    let tmp = TempDir::new().unwrap();
    let report = labview_pipeline(&tmp, Some("2019-06-02T10:00:00")).run().unwrap();
    assert!(report.bytes > 0);

    let mut archive = ArchiveReader::open(&report.path).unwrap();
    let manifest = archive.manifest().unwrap();
    assert_eq!(manifest["session_start_time"], "2019-06-02T10:00:00");
    assert_eq!(manifest["subject"]["subject_id"], "GPi4");
    assert_eq!(manifest["intervals"]["trials"]["count"], 1);

    let init_t: Array1<f64> = archive.array::<f64, Ix1>("intervals/trials/init_t.npy").unwrap();
    assert_eq!(init_t.to_vec(), vec![0.5]);
    let right: Array1<f64> = archive
        .array::<f64, Ix1>("acquisition/BehavioralTimeSeries/right_lick/data.npy")
        .unwrap();
    assert_eq!(right.to_vec(), vec![0.0, 0.0, 1.0]);
}

fn treadmill_config(tmp: &TempDir, start: Option<&str>, with_labview: bool) -> ConversionConfig {
    let (treadmill_file, nose_file) = common::write_treadmill_files(tmp.path());
    let behavior_dir = with_labview.then(|| {
        let dir = tmp.path().join("labview");
        common::write_labview_dir(&dir, "GPi4_080519", &[common::LABVIEW_ROW]);
        dir
    });
    let metafile = common::write_metafile(tmp.path(), start);
    ConversionConfig::new(
        Experiment::Treadmill {
            treadmill_file,
            nose_file,
            ecephys_dir: None,
            behavior_dir,
        },
        tmp.path().join("treadmill.nwb"),
        metafile,
    )
    .unwrap()
    .with_sections(behavior_only())
}

#[test]
fn treadmill_claims_start_and_pads_short_file() {
    let tmp = TempDir::new().unwrap();
    let doc = Pipeline::new(treadmill_config(&tmp, None, false)).assemble().unwrap();

    let start = doc.session_start().unwrap();
    assert_eq!(start.time.to_string(), "2019-08-05 10:13:20");

    let Some(Acquisition::BehavioralTimeSeries(container)) = doc.acquisition(BEHAVIORAL_TIME_SERIES) else {
        panic!("no behavioral container");
    };
    let treadmill = &container.series[0];
    assert_eq!(treadmill.name, "Treadmill");
    assert_eq!(treadmill.description, "treadmill speed");
    assert_eq!(treadmill.timestamps.to_vec(), vec![0.0, 0.5, 1.0]);
    assert_eq!(treadmill.data.to_vec(), vec![0.1, 0.2, 0.3]);

    let nose = &container.series[1];
    assert_eq!(nose.name, "Nose");
    assert_eq!(nose.data.len(), 3);
    assert_eq!(nose.data[1], 6.0);
    assert!(nose.data[2].is_nan());
}

#[test]
fn treadmill_and_labview_share_one_container() {
    let tmp = TempDir::new().unwrap();
    let doc = Pipeline::new(treadmill_config(&tmp, None, true)).assemble().unwrap();

    let containers = doc
        .acquisition
        .iter()
        .filter(|a| matches!(a, Acquisition::BehavioralTimeSeries(_)))
        .count();
    assert_eq!(containers, 1);
    let Some(Acquisition::BehavioralTimeSeries(container)) = doc.acquisition(BEHAVIORAL_TIME_SERIES) else {
        panic!("no behavioral container");
    };
    assert_eq!(container.series.len(), 4);
    assert_eq!(doc.trials.len(), 1);
    assert_eq!(doc.devices.len(), 1);
}

#[test]
fn conflicting_session_start_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let pipeline = Pipeline::new(treadmill_config(&tmp, Some("2019-08-01T14:03:22"), false));
    assert!(matches!(pipeline.assemble(), Err(ConvertError::SchemaMismatch(_))));
}

#[test]
fn matching_session_start_is_accepted() {
    let tmp = TempDir::new().unwrap();
    let pipeline = Pipeline::new(treadmill_config(&tmp, Some("2019-08-05T10:13:20"), false));
    let doc = pipeline.assemble().unwrap();
    assert_eq!(doc.session_start().unwrap().source, "NWBFile.session_start_time");
}

#[test]
fn bpod_session_adds_state_columns() {
    let tmp = TempDir::new().unwrap();
    let session_file = tmp.path().join("session.mat");
    common::write_bpod_session(&session_file);
    let metafile = common::write_metafile(tmp.path(), None);
    let config = ConversionConfig::new(
        Experiment::Bpod { session_file },
        tmp.path().join("bpod.nwb"),
        metafile,
    )
    .unwrap()
    .with_sections(behavior_only());
    let pipeline = Pipeline::new(config);

    let doc = pipeline.assemble().unwrap();
    assert_eq!(doc.session_start().unwrap().time.to_string(), "2019-08-01 14:03:22");
    assert_eq!(doc.trials.start_times(), &[10.0, 20.0]);
    assert_eq!(doc.trials.stop_times(), &[15.0, 26.0]);
    assert_eq!(doc.trials.column("trial_type").unwrap().data, ColumnData::Int(vec![1, 2]));
    assert_eq!(
        doc.trials.column("states").unwrap().data,
        ColumnData::Ragged(vec![
            vec!["WaitForPoke".to_string(), "Reward".to_string()],
            vec!["WaitForPoke".to_string(), "Punish".to_string(), "WaitForPoke".to_string()],
        ])
    );
    assert_eq!(doc.trials.column("Reward").unwrap().data, ColumnData::Bool(vec![true, false]));
    assert_eq!(doc.trials.column("Punish").unwrap().data, ColumnData::Bool(vec![false, true]));
    assert_eq!(
        doc.trials.column("WaitForPoke_dur").unwrap().data,
        ColumnData::Float(vec![1.5, 0.5])
    );
    let ColumnData::Float(reward_dur) = &doc.trials.column("Reward_dur").unwrap().data else {
        panic!("Reward_dur is not a float column");
    };
    assert_eq!(reward_dur[0], 0.5);
    assert!(reward_dur[1].is_nan());

    let report = pipeline.run().unwrap();
    let mut archive = ArchiveReader::open(&report.path).unwrap();
    let punish: Array1<bool> = archive.array::<bool, Ix1>("intervals/trials/Punish.npy").unwrap();
    assert_eq!(punish.to_vec(), vec![false, true]);
}
