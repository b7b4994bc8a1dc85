use std::fs;
use std::path::PathBuf;

use crate::errors::ParserError;
use crate::formats::schema::EVENT_LOG_COLUMNS;
use crate::formats::{
    decode_trial_structure, AnalogLogParser, Endian, EventLogParser, MatFile, MatValue, StructArray,
};
use crate::model::TrialColumn;
use crate::registry::TextLogParser;

fn fixture(path: &str) -> String {
    let base = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let full_path = base.join("tests/data").join(path);
    fs::read_to_string(&full_path)
        .unwrap_or_else(|err| panic!("failed to read fixture {}: {}", full_path.display(), err))
}

fn trial(num: f64, start: f64, outcome: f64, cond: f64, with_graphics: bool) -> Vec<MatValue> {
    let graphics = if with_graphics {
        MatValue::structure(vec![("Size", MatValue::scalar(3.0))])
    } else {
        MatValue::Empty
    };
    vec![
        MatValue::scalar(num),
        MatValue::scalar(start),
        MatValue::scalar(start + 500.0),
        MatValue::scalar(outcome),
        MatValue::scalar(cond),
        graphics,
        MatValue::text("loki"),
        MatValue::row(vec![1.0, 2.0]),
    ]
}

fn sample_ts() -> MatValue {
    let fields = [
        "TrialNum",
        "TimeTrialStart",
        "TimeTrialEnd",
        "Outcome",
        "CurrCond",
        "Graphics",
        "Subject",
        "FPPos",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    let trials = StructArray::from_records(
        fields,
        vec![
            trial(2.0, 3000.0, 1.0, 2.0, true),
            trial(1.0, 1000.0, 2.0, 1.0, false),
        ],
    );

    let header = MatValue::structure(vec![
        (
            "DEF",
            MatValue::structure(vec![
                (
                    "OUTCOME",
                    MatValue::structure(vec![
                        ("CORRECT", MatValue::scalar(1.0)),
                        ("WRONG", MatValue::scalar(2.0)),
                    ]),
                ),
                ("VERSION", MatValue::scalar(4.0)),
            ]),
        ),
        (
            "Conditions",
            MatValue::structure(vec![("TypeCond", MatValue::row(vec![0.0, 1.0, 2.0]))]),
        ),
    ]);

    MatValue::structure(vec![("Header", header), ("Trial", MatValue::Struct(trials))])
}

#[test]
fn mat_round_trip_preserves_nested_structs() {
    let mut mat = MatFile::new("test fixture");
    mat.push("TS", sample_ts());
    let bytes = mat.to_bytes(false).expect("encode");

    let parsed = MatFile::parse(&bytes).expect("parse");
    assert!(parsed.description.starts_with("MATLAB 5.0 MAT-file"));
    assert_eq!(parsed.variable("TS").unwrap(), &sample_ts());
}

#[test]
fn mat_reads_compressed_elements() {
    let mut mat = MatFile::new("compressed");
    mat.push("TS", sample_ts());
    mat.push("gain", MatValue::scalar(0.25));
    let bytes = mat.to_bytes(true).expect("encode");

    let parsed = MatFile::parse(&bytes).expect("parse");
    assert_eq!(parsed.variable_names().collect::<Vec<_>>(), vec!["TS", "gain"]);
    assert_eq!(parsed.variable("gain").unwrap().as_scalar(), Some(0.25));
    assert_eq!(parsed.variable("TS").unwrap(), &sample_ts());
}

#[test]
fn mat_reads_big_endian_files() {
    for compress in [false, true] {
        let mut mat = MatFile::new("big endian");
        mat.endian = Endian::Big;
        mat.push("TS", sample_ts());
        mat.push("gain", MatValue::scalar(0.25));
        let bytes = mat.to_bytes(compress).expect("encode");
        assert_eq!(&bytes[126..128], b"MI");

        let parsed = MatFile::parse(&bytes).expect("parse");
        assert_eq!(parsed.endian, Endian::Big);
        assert_eq!(parsed.variable("gain").unwrap().as_scalar(), Some(0.25));
        assert_eq!(parsed.variable("TS").unwrap(), &sample_ts());
    }
}

#[test]
fn mat_rejects_overflowing_dimensions() {
    let mut mat = MatFile::new("corrupt dims");
    let huge = i32::MAX as usize;
    mat.push(
        "x",
        MatValue::Numeric {
            dims: vec![huge, huge, huge],
            data: vec![1.0],
        },
    );
    let bytes = mat.to_bytes(false).expect("encode");

    let err = MatFile::parse(&bytes).unwrap_err();
    assert!(matches!(err, ParserError::Validation { .. }), "{err}");
}

#[test]
fn mat_oversized_cell_is_truncated_not_allocated() {
    let mut mat = MatFile::new("corrupt cell");
    mat.push(
        "c",
        MatValue::Cell {
            dims: vec![1_000_000_000, 1_000],
            cells: vec![MatValue::scalar(1.0)],
        },
    );
    let bytes = mat.to_bytes(false).expect("encode");

    let err = MatFile::parse(&bytes).unwrap_err();
    assert!(matches!(err, ParserError::Truncated { .. }), "{err}");
}

#[test]
fn mat_rejects_hdf5_based_files() {
    let mut bytes = vec![b' '; 600];
    bytes[..19].copy_from_slice(b"MATLAB 7.3 MAT-file");
    bytes[512..520].copy_from_slice(&[0x89, b'H', b'D', b'F', 0x0d, 0x0a, 0x1a, 0x0a]);

    let err = MatFile::parse(&bytes).unwrap_err();
    assert!(matches!(err, ParserError::UnsupportedMatVersion(_)));
}

#[test]
fn mat_reports_truncated_elements() {
    let mut mat = MatFile::new("truncated");
    mat.push("x", MatValue::row(vec![1.0, 2.0, 3.0]));
    let bytes = mat.to_bytes(false).expect("encode");

    let err = MatFile::parse(&bytes[..bytes.len() - 12]).unwrap_err();
    assert!(matches!(err, ParserError::Truncated { .. }), "{err}");
}

#[test]
fn mat_missing_variable_is_an_error() {
    let mat = MatFile::new("empty");
    let bytes = mat.to_bytes(false).expect("encode");
    let parsed = MatFile::parse(&bytes).expect("parse");
    assert!(matches!(
        parsed.variable("TS"),
        Err(ParserError::MissingVariable(name)) if name == "TS"
    ));
}

#[test]
fn decodes_header_dictionaries_and_conditions() {
    let structure = decode_trial_structure(&sample_ts()).expect("decode");

    let outcome = structure.header.definition("OUTCOME").expect("OUTCOME table");
    assert_eq!(outcome.label(1), Some("CORRECT"));
    assert_eq!(outcome.label(2), Some("WRONG"));
    assert!(structure.header.definition("VERSION").is_none());
    assert_eq!(structure.header.condition_types, vec![0, 1, 2]);
}

#[test]
fn classifies_trial_fields() {
    let structure = decode_trial_structure(&sample_ts()).expect("decode");
    let trials = &structure.trials;

    assert_eq!(trials.trial_count, 2);
    assert_eq!(
        trials.column("TrialNum"),
        Some(&TrialColumn::Numeric(vec![Some(2.0), Some(1.0)]))
    );
    assert!(trials.column("Graphics").unwrap().is_nested());
    assert!(trials.column("FPPos").unwrap().is_nested());
    assert_eq!(
        trials.column("Subject"),
        Some(&TrialColumn::Text(vec![
            Some("loki".to_string()),
            Some("loki".to_string())
        ]))
    );
}

#[test]
fn duplicate_definition_codes_are_rejected() {
    let header = MatValue::structure(vec![(
        "DEF",
        MatValue::structure(vec![(
            "OUTCOME",
            MatValue::structure(vec![
                ("CORRECT", MatValue::scalar(1.0)),
                ("ALSO_CORRECT", MatValue::scalar(1.0)),
            ]),
        )]),
    )]);
    let ts = MatValue::structure(vec![
        ("Header", header),
        ("Trial", MatValue::Struct(StructArray::from_records(vec!["TrialNum".into()], vec![vec![MatValue::scalar(1.0)]]))),
    ]);

    let err = decode_trial_structure(&ts).unwrap_err();
    assert!(matches!(err, ParserError::Validation { .. }));
}

#[test]
fn trial_cells_are_merged_by_field_name() {
    let first = MatValue::structure(vec![("TrialNum", MatValue::scalar(1.0))]);
    let second = MatValue::structure(vec![
        ("TrialNum", MatValue::scalar(2.0)),
        ("TimeReward", MatValue::scalar(700.0)),
    ]);
    let ts = MatValue::structure(vec![
        ("Header", MatValue::structure(Vec::<(String, MatValue)>::new())),
        (
            "Trial",
            MatValue::Cell {
                dims: vec![1, 2],
                cells: vec![first, second],
            },
        ),
    ]);

    let structure = decode_trial_structure(&ts).expect("decode");
    assert_eq!(
        structure.trials.column("TimeReward"),
        Some(&TrialColumn::Numeric(vec![None, Some(700.0)]))
    );
}

#[test]
fn parses_event_log() {
    let df = EventLogParser.parse(&fixture("events.csv")).expect("event log parse failed");

    assert_eq!(df.get_column_names(), EVENT_LOG_COLUMNS);
    assert_eq!(df.height(), 6);
    let timestamps = df.column("timestamp_ms").unwrap().f64().unwrap();
    assert_eq!(timestamps.get(1), Some(1250.5));
    let types = df.column("type").unwrap().i64().unwrap();
    assert_eq!(types.get(5), Some(3));
}

#[test]
fn event_log_accepts_integral_float_codes() {
    let df = EventLogParser
        .parse(&fixture("events_float_codes.csv"))
        .expect("event log parse failed");
    let ids = df.column("event_id").unwrap().i64().unwrap();
    assert_eq!(ids.get(1), Some(20));
}

#[test]
fn event_log_rejects_unexpected_header() {
    let err = EventLogParser
        .parse(&fixture("events_bad_header.csv"))
        .unwrap_err();
    assert!(matches!(err, ParserError::InvalidHeader { .. }));
}

#[test]
fn event_log_reports_bad_row_line() {
    let err = EventLogParser.parse(&fixture("events_bad_row.csv")).unwrap_err();
    match err {
        ParserError::DataRow { line_index, .. } => assert_eq!(line_index, 3),
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn event_log_without_rows_is_empty() {
    let err = EventLogParser
        .parse("Timestamp,Type,EventID,TrialNum\n")
        .unwrap_err();
    assert!(matches!(err, ParserError::EmptyData { .. }));
}

#[test]
fn parses_analog_log_with_missing_samples() {
    let df = AnalogLogParser
        .parse(&fixture("eye_tracking.csv"))
        .expect("analog parse failed");

    assert_eq!(df.get_column_names(), ["timestamp_ms", "EyeX", "EyeY"]);
    let eye_x = df.column("EyeX").unwrap().f64().unwrap();
    let eye_y = df.column("EyeY").unwrap().f64().unwrap();
    assert_eq!(eye_x.get(2), None);
    assert_eq!(eye_y.get(1), None);
    assert_eq!(eye_y.get(2), Some(0.125));
}

#[test]
fn analog_log_rejects_decreasing_timestamps() {
    let err = AnalogLogParser
        .parse("Timestamp,Photodiode\n10,1.0\n5,0.0\n")
        .unwrap_err();
    assert!(matches!(err, ParserError::DataRow { line_index: 3, .. }));
}
