use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;

use ndarray::Array2;
use ndarray_npy::{write_npy, ReadNpyExt};
use seidemann_core::container::{read_table, read_trials};
use seidemann_core::imaging::STUB_FRAMES;
use seidemann_core::metadata::{deep_update, load_metadata_file};
use seidemann_core::{
    BundleManifest, ConversionConfig, ConversionError, ManifestEntry, SessionConverter,
};
use seidemann_parser::{MatFile, MatValue, StructArray};

const VIDEO_FRAMES: usize = 120;

fn trial(num: f64, start: f64, stim: f64, outcome: f64, cond: f64) -> Vec<MatValue> {
    vec![
        MatValue::scalar(num),
        MatValue::scalar(start),
        MatValue::scalar(start + 1500.0),
        MatValue::scalar(stim),
        MatValue::scalar(outcome),
        MatValue::scalar(cond),
        MatValue::structure(vec![("Size", MatValue::scalar(2.0))]),
        MatValue::text("M22"),
    ]
}

fn definition(pairs: &[(&str, f64)]) -> MatValue {
    MatValue::structure(
        pairs
            .iter()
            .map(|(label, code)| (label.to_string(), MatValue::scalar(*code)))
            .collect(),
    )
}

fn write_trial_structure(path: &Path) {
    let fields = [
        "TrialNum",
        "TimeTrialStart",
        "TimeTrialEnd",
        "TimeStimOn",
        "Outcome",
        "CurrCond",
        "Graphics",
        "Subject",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    let trials = StructArray::from_records(
        fields,
        vec![
            trial(2.0, 3000.0, f64::NAN, 2.0, 2.0),
            trial(1.0, 1000.0, 1400.0, 1.0, 1.0),
            trial(3.0, 5000.0, -1.0, 1.0, 3.0),
        ],
    );
    let header = MatValue::structure(vec![
        (
            "DEF",
            MatValue::structure(vec![
                ("OUTCOME", definition(&[("CORRECT", 1.0), ("BROKE_FIXATION", 2.0)])),
                (
                    "EVENTTYPE",
                    definition(&[("NEW_TRIAL", 1.0), ("STIMULUS", 2.0), ("REWARD", 3.0)]),
                ),
                (
                    "EVENTID",
                    definition(&[("TRIAL_START", 10.0), ("STIM_ON", 20.0), ("STIM_OFF", 21.0), ("JUICE", 30.0)]),
                ),
            ]),
        ),
        (
            "Conditions",
            MatValue::structure(vec![("TypeCond", MatValue::row(vec![0.0, 1.0, 2.0]))]),
        ),
    ]);

    let mut mat = MatFile::new("session fixture");
    mat.push(
        "TS",
        MatValue::structure(vec![("Header", header), ("Trial", MatValue::Struct(trials))]),
    );
    fs::write(path, mat.to_bytes(true).unwrap()).unwrap();
}

fn write_session(dir: &Path) {
    write_trial_structure(&dir.join("M22D20210127R0TS.mat"));
    fs::write(
        dir.join("events.csv"),
        "Timestamp,Type,EventID,TrialNum\n\
         900,1,10,1\n\
         1400,2,20,1\n\
         1900,2,21,1\n\
         2900,1,10,2\n\
         4900,1,10,3\n\
         5400,2,20,3\n\
         6000,3,30,3\n",
    )
    .unwrap();
    fs::write(
        dir.join("eye.csv"),
        "Timestamp,EyeX,EyeY\n900,0.1,0.2\n1900,0.3,\n2900,0.5,0.6\n",
    )
    .unwrap();

    let mut video = Vec::new();
    for value in 0..(VIDEO_FRAMES * 4 * 4) as u16 {
        video.extend_from_slice(&value.to_le_bytes());
    }
    fs::write(dir.join("raw.dat"), video).unwrap();

    let plane = dir.join("suite2p").join("plane0");
    fs::create_dir_all(&plane).unwrap();
    let traces = Array2::<f32>::from_shape_fn((2, 6), |(r, f)| (r + f) as f32);
    write_npy(plane.join("F.npy"), &traces).unwrap();
    write_npy(plane.join("Fneu.npy"), &traces).unwrap();
    write_npy(plane.join("spks.npy"), &traces).unwrap();
    write_npy(
        plane.join("iscell.npy"),
        &Array2::<f64>::from_shape_vec((2, 2), vec![1.0, 0.9, 0.0, 0.2]).unwrap(),
    )
    .unwrap();

    fs::write(
        dir.join("metadata.toml"),
        "[NWBFile]\nsession_start_time = \"2021-01-27T10:30:00-06:00\"\nlab = \"Seidemann\"\n",
    )
    .unwrap();

    fs::write(
        dir.join("session.toml"),
        r#"version = 1
session_id = "M22D20210127R0"
output = "out/M22D20210127R0.zip"
metadata = "metadata.toml"

[behavior]
mat_file = "M22D20210127R0TS.mat"
event_log = "events.csv"

[imaging]
file_path = "raw.dat"
sampling_frequency = 15.0

[imaging.structure]
rows = 4
columns = 4
frame_axis = 1
num_channels_axis = 0

[suite2p]
folder_path = "suite2p"

[eye_tracking]
file_path = "eye.csv"
"#,
    )
    .unwrap();
    fs::create_dir_all(dir.join("out")).unwrap();
}

fn converter(dir: &Path) -> SessionConverter {
    let config = ConversionConfig::load(&dir.join("session.toml")).unwrap();
    SessionConverter::from_config(config).unwrap()
}

fn full_metadata(converter: &SessionConverter) -> serde_json::Value {
    let mut metadata = converter.metadata().unwrap();
    let path = converter.config().metadata.clone().unwrap();
    deep_update(&mut metadata, load_metadata_file(&path).unwrap());
    metadata
}

#[test]
fn converts_a_full_session() {
    let dir = tempfile::tempdir().unwrap();
    write_session(dir.path());
    let converter = converter(dir.path());
    let output = converter.config().output_path(dir.path());

    let summary = converter
        .run_conversion(&output, full_metadata(&converter), false)
        .unwrap();
    assert_eq!(summary.session_offset_ms, Some(900.0));
    assert_eq!(summary.trials, 3);
    assert_eq!(summary.event_streams, 2);
    assert_eq!(summary.imaging_frames, VIDEO_FRAMES);
    assert_eq!(summary.segmented_rois, 2);
    assert_eq!(
        summary.interfaces,
        ["behavior", "imaging", "suite2p", "eye_tracking"]
    );

    let manifest = BundleManifest::read(&output).unwrap();
    assert_eq!(manifest.metadata["NWBFile"]["lab"], "Seidemann");
    assert_eq!(manifest.metadata["NWBFile"]["session_id"], "M22D20210127R0");
    assert_eq!(
        manifest.metadata["Ophys"]["TwoPhotonSeries"][0]["rate"],
        15.0
    );

    let trials = read_trials(&output).unwrap();
    assert_eq!(trials.height(), 3);
    let names: Vec<String> = trials
        .get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect();
    assert_eq!(
        names,
        ["start_time", "TimeStimOn", "stop_time", "CurrCond", "Outcome", "condition type"]
    );
    let starts = trials.column("start_time").unwrap().f64().unwrap();
    assert_eq!(starts.get(0), Some(0.1));
    let stim = trials.column("TimeStimOn").unwrap().f64().unwrap();
    assert_eq!(stim.get(0), Some(0.5));
    assert_eq!(stim.get(1), None);
    assert_eq!(stim.get(2), None);
    let outcome = trials.column("Outcome").unwrap().str().unwrap();
    assert_eq!(outcome.get(1), Some("broke_fixation"));

    let stimulus = manifest
        .entries
        .iter()
        .find_map(|entry| match entry {
            ManifestEntry::LabeledEvents { name, labels, path, .. } if name == "StimulusEvents" => {
                Some((labels.clone(), path.clone()))
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(stimulus.0, ["stim_off", "stim_on"]);
    let events = read_table(&output, &stimulus.1).unwrap();
    let codes: Vec<Option<u32>> = events.column("data").unwrap().u32().unwrap().into_iter().collect();
    assert_eq!(codes, [Some(1), Some(0), Some(1)]);

    let eye = read_table(&output, "processing/behavior/EyeTracking.parquet").unwrap();
    let times = eye.column("timestamps").unwrap().f64().unwrap();
    assert_eq!(times.get(0), Some(0.0));
    assert_eq!(times.get(2), Some(2.0));

    let mut archive = zip::ZipArchive::new(fs::File::open(&output).unwrap()).unwrap();
    let mut bytes = Vec::new();
    archive
        .by_name("acquisition/TwoPhotonSeries/data.npy")
        .unwrap()
        .read_to_end(&mut bytes)
        .unwrap();
    let frames = ndarray::Array3::<u16>::read_npy(Cursor::new(bytes)).unwrap();
    assert_eq!(frames.dim(), (VIDEO_FRAMES, 4, 4));
    assert_eq!(frames[[1, 0, 0]], 16);
    assert_eq!(frames[[VIDEO_FRAMES - 1, 3, 3]], (VIDEO_FRAMES * 16 - 1) as u16);
}

#[test]
fn reruns_produce_identical_bundles() {
    let dir = tempfile::tempdir().unwrap();
    write_session(dir.path());
    let converter = converter(dir.path());

    let first = converter.convert(full_metadata(&converter)).unwrap();
    let second = converter.convert(full_metadata(&converter)).unwrap();
    assert_eq!(first.to_zip_archive().unwrap(), second.to_zip_archive().unwrap());
}

#[test]
fn stub_test_limits_frames() {
    let dir = tempfile::tempdir().unwrap();
    write_session(dir.path());
    let mut config = ConversionConfig::load(&dir.path().join("session.toml")).unwrap();
    config.stub_test = true;
    let converter = SessionConverter::from_config(config).unwrap();
    assert!(converter.options().unwrap().stub_test);
    assert!(VIDEO_FRAMES > STUB_FRAMES);

    let bundle = converter.convert(full_metadata(&converter)).unwrap();
    assert_eq!(bundle.imaging[0].frames.shape(), [STUB_FRAMES, 4, 4]);

    let output = dir.path().join("out").join("stub.zip");
    let summary = converter
        .run_conversion(&output, full_metadata(&converter), false)
        .unwrap();
    assert_eq!(summary.imaging_frames, STUB_FRAMES);

    let manifest = BundleManifest::read(&output).unwrap();
    let shape = manifest
        .entries
        .iter()
        .find_map(|entry| match entry {
            ManifestEntry::ImagingSeries { shape, .. } => Some(*shape),
            _ => None,
        })
        .unwrap();
    assert_eq!(shape, [STUB_FRAMES, 4, 4]);

    let mut archive = zip::ZipArchive::new(fs::File::open(&output).unwrap()).unwrap();
    let mut bytes = Vec::new();
    archive
        .by_name("acquisition/TwoPhotonSeries/data.npy")
        .unwrap()
        .read_to_end(&mut bytes)
        .unwrap();
    let frames = ndarray::Array3::<u16>::read_npy(Cursor::new(bytes)).unwrap();
    assert_eq!(frames.dim(), (STUB_FRAMES, 4, 4));
    assert_eq!(frames[[STUB_FRAMES - 1, 0, 0]], ((STUB_FRAMES - 1) * 16) as u16);
    assert!(!dir.path().join("out").join("stub.zip.partial").exists());
}

#[test]
fn missing_start_time_aborts_before_writing() {
    let dir = tempfile::tempdir().unwrap();
    write_session(dir.path());
    let converter = converter(dir.path());
    let output = dir.path().join("out").join("never.zip");

    let err = converter
        .run_conversion(&output, converter.metadata().unwrap(), false)
        .unwrap_err();
    assert!(matches!(err, ConversionError::Metadata(_)));
    assert!(!output.exists());
}

#[test]
fn unaligned_sessions_keep_raw_clock() {
    let dir = tempfile::tempdir().unwrap();
    write_session(dir.path());
    let mut config = ConversionConfig::load(&dir.path().join("session.toml")).unwrap();
    if let Some(behavior) = config.behavior.as_mut() {
        behavior.align_to_session_start = false;
        behavior.drop_new_trial_events = false;
    }
    let converter = SessionConverter::from_config(config).unwrap();

    let bundle = converter.convert(full_metadata(&converter)).unwrap();
    let trials = bundle.trials.as_ref().unwrap();
    assert_eq!(trials.rows()[0].start_time, 1.0);
    let names: Vec<&str> = bundle.labeled_events.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["NewTrialEvents", "RewardEvents", "StimulusEvents"]);
}
