// crates/seidemann-core/src/trials.rs

//! Flattens the trial struct array into a time-aligned trial table.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;
use polars::prelude::*;
use seidemann_parser::{TrialColumn, TrialRecords};
use tracing::{debug, info};

use crate::codebook::{integral_code, Codebook};
use crate::container::{CellValue, TrialRow, TrialTable, START_TIME, STOP_TIME};
use crate::error::{ConversionError, Result};

pub const TRIAL_NUMBER: &str = "TrialNum";
pub const OUTCOME: &str = "Outcome";
pub const CURRENT_CONDITION: &str = "CurrCond";
pub const CONDITION_TYPE: &str = "condition type";
pub const TRIAL_START: &str = "TimeTrialStart";
pub const TRIAL_END: &str = "TimeTrialEnd";

/// Sentinel the rig writes for "did not happen". NaN means the same.
const MISSING_SENTINEL: f64 = -1.0;

static COLUMN_DESCRIPTIONS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (OUTCOME, "Outcome of the trial, resolved from the header outcome dictionary."),
        (CURRENT_CONDITION, "1-based index of the condition presented on the trial."),
        (CONDITION_TYPE, "Type of the presented condition: blank, target or visual_stimulus."),
        ("TimeFPOn", "Time the fixation point appeared."),
        ("TimeFPOff", "Time the fixation point disappeared."),
        ("TimeFixationAcquired", "Time fixation was acquired."),
        ("TimeStimOn", "Time the visual stimulus appeared."),
        ("TimeStimOff", "Time the visual stimulus disappeared."),
        ("TimeReward", "Time the reward was delivered."),
    ])
});

pub fn column_description(name: &str) -> &str {
    COLUMN_DESCRIPTIONS.get(name).copied().unwrap_or(name)
}

/// `Time` columns are timing offsets; `Now` columns are wall-clock stamps.
pub fn is_time_column(name: &str) -> bool {
    name.contains("Time") && !name.contains("Now")
}

/// Runs the full reconstruction and loads the result into a [`TrialTable`].
pub fn build_trial_table(
    records: &TrialRecords,
    codebook: &Codebook,
    offset_ms: Option<f64>,
) -> Result<TrialTable> {
    let df = reconstruct_trials(records, codebook, offset_ms)?;
    table_from_frame(&df)
}

/// Reconstructed trials as a DataFrame: time columns (seconds) by mean offset
/// from trial start, then the remaining columns alphabetically.
pub fn reconstruct_trials(
    records: &TrialRecords,
    codebook: &Codebook,
    offset_ms: Option<f64>,
) -> Result<DataFrame> {
    if records.trial_count == 0 {
        return Err(ConversionError::Shape(
            "trial structure holds no trials".to_string(),
        ));
    }

    let mut df = flat_frame(records)?;
    replace_sentinels(&mut df)?;
    drop_empty_columns(&mut df)?;

    require(&df, TRIAL_NUMBER)?;
    require(&df, OUTCOME)?;
    require(&df, CURRENT_CONDITION)?;
    df = df.sort([TRIAL_NUMBER], SortMultipleOptions::default())?;
    df.drop_in_place(TRIAL_NUMBER)?;

    drop_constant_columns(&mut df)?;
    resolve_codes(&mut df, codebook)?;
    let time_columns = convert_time_columns(&mut df, offset_ms)?;

    let ordered = order_columns(&df, &time_columns)?;
    let mut df = df.select(ordered)?;

    for reserved in [START_TIME, STOP_TIME] {
        if df.column(reserved).is_ok() {
            return Err(ConversionError::DuplicateColumn(reserved.to_string()));
        }
    }
    require(&df, TRIAL_END)?;
    df.rename(TRIAL_START, START_TIME.into())?;
    df.rename(TRIAL_END, STOP_TIME.into())?;

    info!(
        trials = df.height(),
        columns = df.width(),
        "trial table reconstructed"
    );
    Ok(df)
}

fn require<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Column> {
    df.column(name)
        .map_err(|_| ConversionError::MissingColumn(name.to_string()))
}

fn flat_frame(records: &TrialRecords) -> Result<DataFrame> {
    let mut cols: Vec<Column> = Vec::with_capacity(records.fields.len());
    let mut nested = Vec::new();
    for (name, column) in &records.fields {
        let series = match column {
            TrialColumn::Numeric(values) => Series::new(name.as_str().into(), values.clone()),
            TrialColumn::Text(values) => Series::new(name.as_str().into(), values.clone()),
            TrialColumn::Nested => {
                nested.push(name.as_str());
                continue;
            }
        };
        cols.push(series.into());
    }
    if !nested.is_empty() {
        debug!(columns = ?nested, "dropped nested trial fields");
    }
    Ok(DataFrame::new(cols)?)
}

fn numeric_names(df: &DataFrame) -> Vec<String> {
    df.get_columns()
        .iter()
        .filter(|column| column.dtype() == &DataType::Float64)
        .map(|column| column.name().to_string())
        .collect()
}

fn replace_sentinels(df: &mut DataFrame) -> Result<()> {
    for name in numeric_names(df) {
        let values: Vec<Option<f64>> = df
            .column(&name)?
            .f64()?
            .into_iter()
            .map(|value| value.filter(|v| *v != MISSING_SENTINEL && !v.is_nan()))
            .collect();
        df.with_column(Series::new(name.as_str().into(), values))?;
    }
    Ok(())
}

fn drop_empty_columns(df: &mut DataFrame) -> Result<()> {
    let height = df.height();
    let empty: Vec<String> = df
        .get_columns()
        .iter()
        .filter(|column| column.null_count() == height)
        .map(|column| column.name().to_string())
        .collect();
    for name in &empty {
        df.drop_in_place(name)?;
    }
    if !empty.is_empty() {
        debug!(columns = ?empty, "dropped all-missing trial fields");
    }
    Ok(())
}

/// Missing counts as a value, so a column that is half missing survives.
fn drop_constant_columns(df: &mut DataFrame) -> Result<()> {
    let mut constant = Vec::new();
    for column in df.get_columns() {
        if column.n_unique()? <= 1 {
            constant.push(column.name().to_string());
        }
    }
    for name in &constant {
        df.drop_in_place(name)?;
    }
    if !constant.is_empty() {
        debug!(columns = ?constant, "dropped single-valued trial fields");
    }
    Ok(())
}

/// A code column dropped as single-valued carries no per-trial information,
/// so it is left out instead of translated.
fn resolve_codes(df: &mut DataFrame, codebook: &Codebook) -> Result<()> {
    if df.column(CONDITION_TYPE).is_ok() {
        return Err(ConversionError::DuplicateColumn(CONDITION_TYPE.to_string()));
    }

    if let Ok(column) = df.column(OUTCOME) {
        let outcomes: Vec<String> = column
            .f64()?
            .into_iter()
            .map(|code| {
                let code = integral_code(OUTCOME, code.unwrap_or(MISSING_SENTINEL))?;
                codebook.outcome_label(code)
            })
            .collect::<Result<_>>()?;
        df.with_column(Series::new(OUTCOME.into(), outcomes))?;
    } else {
        debug!("single-valued outcome left untranslated");
    }

    if let Ok(column) = df.column(CURRENT_CONDITION) {
        let condition_types: Vec<&str> = column
            .f64()?
            .into_iter()
            .map(|code| {
                let code = integral_code(CURRENT_CONDITION, code.unwrap_or(MISSING_SENTINEL))?;
                codebook.condition_label(code)
            })
            .collect::<Result<_>>()?;
        df.with_column(Series::new(CONDITION_TYPE.into(), condition_types))?;
    } else {
        debug!("single-valued condition left untranslated");
    }
    Ok(())
}

/// Milliseconds to seconds, relative to the session offset when given.
fn convert_time_columns(df: &mut DataFrame, offset_ms: Option<f64>) -> Result<Vec<String>> {
    let offset = offset_ms.unwrap_or(0.0);
    let names: Vec<String> = df
        .get_column_names()
        .into_iter()
        .filter(|name| is_time_column(name))
        .map(|name| name.to_string())
        .collect();

    for name in &names {
        let column = df.column(name)?;
        if column.dtype() != &DataType::Float64 {
            return Err(ConversionError::Shape(format!(
                "time column '{name}' holds {} values",
                column.dtype()
            )));
        }
        let seconds: Vec<Option<f64>> = column
            .f64()?
            .into_iter()
            .map(|value| value.map(|ms| (ms - offset) / 1000.0))
            .collect();
        if let Some(value) = seconds.iter().flatten().find(|value| **value < 0.0) {
            return Err(ConversionError::NegativeTime {
                column: name.clone(),
                value: *value,
            });
        }
        df.with_column(Series::new(name.as_str().into(), seconds))?;
    }
    Ok(names)
}

fn mean_offset(column: &Float64Chunked, start: &Float64Chunked) -> Option<f64> {
    let (sum, count) = column
        .into_iter()
        .zip(start.into_iter())
        .filter_map(|(value, start)| Some(value? - start?))
        .filter(|diff| !diff.is_nan())
        .fold((0.0, 0usize), |(sum, count), diff| (sum + diff, count + 1));
    (count > 0).then(|| sum / count as f64)
}

fn order_columns(df: &DataFrame, time_columns: &[String]) -> Result<Vec<String>> {
    let start = require(df, TRIAL_START)?.f64()?;

    let mut timed: Vec<(Option<f64>, &String)> = Vec::with_capacity(time_columns.len());
    for name in time_columns {
        timed.push((mean_offset(df.column(name)?.f64()?, start), name));
    }
    timed.sort_by(|(a_mean, a_name), (b_mean, b_name)| {
        let by_mean = match (a_mean, b_mean) {
            (Some(a), Some(b)) => a.total_cmp(b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_mean.then_with(|| a_name.cmp(b_name))
    });

    let mut rest: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .filter(|name| !time_columns.contains(name))
        .collect();
    rest.sort();

    let mut ordered: Vec<String> = timed.into_iter().map(|(_, name)| name.clone()).collect();
    ordered.extend(rest);
    Ok(ordered)
}

fn cells(column: &Column) -> Result<Vec<CellValue>> {
    match column.dtype() {
        DataType::Float64 => Ok(column.f64()?.into_iter().map(CellValue::from).collect()),
        DataType::String => Ok(column.str()?.into_iter().map(CellValue::from).collect()),
        other => Err(ConversionError::Container(format!(
            "trial column '{}' has unsupported type {other}",
            column.name()
        ))),
    }
}

/// Registers every non-reserved column, then appends one row per trial.
pub fn table_from_frame(df: &DataFrame) -> Result<TrialTable> {
    let starts = require(df, START_TIME)?.f64()?;
    let stops = require(df, STOP_TIME)?.f64()?;

    let mut table = TrialTable::new();
    let mut columns: Vec<(String, Vec<CellValue>)> = Vec::new();
    for column in df.get_columns() {
        let name = column.name().as_str();
        if name == START_TIME || name == STOP_TIME {
            continue;
        }
        table.add_column(name, column_description(name))?;
        columns.push((name.to_string(), cells(column)?));
    }

    for idx in 0..df.height() {
        let (Some(start_time), Some(stop_time)) = (starts.get(idx), stops.get(idx)) else {
            return Err(ConversionError::Container(format!(
                "trial {idx} is missing its start or stop time"
            )));
        };
        let values: BTreeMap<String, CellValue> = columns
            .iter()
            .map(|(name, values)| (name.clone(), values[idx].clone()))
            .collect();
        table.add_trial(TrialRow {
            start_time,
            stop_time,
            values,
        })?;
    }
    table.set_column_order(&df.get_column_names())?;
    Ok(table)
}
