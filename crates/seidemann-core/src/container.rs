// crates/seidemann-core/src/container.rs

//! Typed session container and its on-disk bundle form.
//!
//! A bundle is a deflated ZIP archive: `manifest.json` describes every entry,
//! tables are Parquet and dense arrays are `.npy`. Entry paths follow the
//! usual neurophysiology group layout (`intervals/`, `acquisition/`,
//! `processing/behavior/`, `processing/ophys/`).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io::{BufWriter, Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::{Array2, Array3};
use ndarray_npy::WriteNpyExt;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use ::zip::write::FileOptions;
use ::zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{ConversionError, Result};

pub const START_TIME: &str = "start_time";
pub const STOP_TIME: &str = "stop_time";
pub const BUNDLE_FORMAT_VERSION: u32 = 1;

const MANIFEST_PATH: &str = "manifest.json";
const TRIALS_PATH: &str = "intervals/trials.parquet";

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Missing,
    Number(f64),
    Text(String),
}

impl From<Option<f64>> for CellValue {
    fn from(value: Option<f64>) -> Self {
        value.map(CellValue::Number).unwrap_or(CellValue::Missing)
    }
}

impl From<Option<&str>> for CellValue {
    fn from(value: Option<&str>) -> Self {
        value
            .map(|text| CellValue::Text(text.to_string()))
            .unwrap_or(CellValue::Missing)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrialRow {
    pub start_time: f64,
    pub stop_time: f64,
    pub values: BTreeMap<String, CellValue>,
}

/// Interval table with two reserved time columns and any number of
/// registered, described columns. `layout` is the output column order and
/// always holds every reserved and registered name exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialTable {
    columns: Vec<ColumnSpec>,
    layout: Vec<String>,
    rows: Vec<TrialRow>,
}

impl Default for TrialTable {
    fn default() -> Self {
        Self {
            columns: Vec::new(),
            layout: vec![START_TIME.to_string(), STOP_TIME.to_string()],
            rows: Vec::new(),
        }
    }
}

impl TrialTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_column(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<()> {
        let name = name.into();
        if name == START_TIME
            || name == STOP_TIME
            || self.columns.iter().any(|column| column.name == name)
        {
            return Err(ConversionError::DuplicateColumn(name));
        }
        if !self.rows.is_empty() {
            return Err(ConversionError::Container(format!(
                "column '{name}' registered after trials were added"
            )));
        }
        self.layout.push(name.clone());
        self.columns.push(ColumnSpec {
            name,
            description: description.into(),
        });
        Ok(())
    }

    /// Reorders the output columns, reserved ones included. `order` must name
    /// every column of the table exactly once.
    pub fn set_column_order<S: AsRef<str>>(&mut self, order: &[S]) -> Result<()> {
        let wanted: BTreeSet<&str> = order.iter().map(|name| name.as_ref()).collect();
        let known: BTreeSet<&str> = self.layout.iter().map(String::as_str).collect();
        if wanted.len() != order.len() || wanted != known {
            return Err(ConversionError::Container(format!(
                "column order {:?} does not match the table columns {:?}",
                order.iter().map(|name| name.as_ref()).collect::<Vec<_>>(),
                self.layout
            )));
        }
        self.layout = order.iter().map(|name| name.as_ref().to_string()).collect();
        Ok(())
    }

    pub fn add_trial(&mut self, row: TrialRow) -> Result<()> {
        if !row.start_time.is_finite() || !row.stop_time.is_finite() {
            return Err(ConversionError::Container(format!(
                "trial {} has non-finite bounds ({}, {})",
                self.rows.len(),
                row.start_time,
                row.stop_time
            )));
        }
        if row.start_time > row.stop_time {
            return Err(ConversionError::Container(format!(
                "trial {} starts at {} s after it stops at {} s",
                self.rows.len(),
                row.start_time,
                row.stop_time
            )));
        }
        for column in &self.columns {
            if !row.values.contains_key(&column.name) {
                return Err(ConversionError::MissingColumn(column.name.clone()));
            }
        }
        if let Some(extra) = row
            .values
            .keys()
            .find(|key| !self.columns.iter().any(|column| &column.name == *key))
        {
            return Err(ConversionError::Container(format!(
                "trial {} carries unregistered column '{extra}'",
                self.rows.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn rows(&self) -> &[TrialRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Output column order. Reserved columns lead until
    /// [`TrialTable::set_column_order`] places them.
    pub fn column_names(&self) -> Vec<&str> {
        self.layout.iter().map(String::as_str).collect()
    }

    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let mut cols: Vec<Column> = Vec::with_capacity(self.columns.len() + 2);
        let starts: Vec<f64> = self.rows.iter().map(|row| row.start_time).collect();
        let stops: Vec<f64> = self.rows.iter().map(|row| row.stop_time).collect();
        cols.push(Series::new(START_TIME.into(), starts).into());
        cols.push(Series::new(STOP_TIME.into(), stops).into());

        for column in &self.columns {
            let cells: Vec<&CellValue> = self
                .rows
                .iter()
                .filter_map(|row| row.values.get(&column.name))
                .collect();
            let has_text = cells.iter().any(|cell| matches!(cell, CellValue::Text(_)));
            let has_number = cells.iter().any(|cell| matches!(cell, CellValue::Number(_)));

            let series = match (has_text, has_number) {
                (true, true) => {
                    return Err(ConversionError::Container(format!(
                        "column '{}' mixes text and numbers",
                        column.name
                    )))
                }
                (true, false) => {
                    let values: Vec<Option<&str>> = cells
                        .iter()
                        .map(|cell| match cell {
                            CellValue::Text(text) => Some(text.as_str()),
                            _ => None,
                        })
                        .collect();
                    Series::new(column.name.as_str().into(), values)
                }
                _ => {
                    let values: Vec<Option<f64>> = cells
                        .iter()
                        .map(|cell| match cell {
                            CellValue::Number(value) => Some(*value),
                            _ => None,
                        })
                        .collect();
                    Series::new(column.name.as_str().into(), values)
                }
            };
            cols.push(series.into());
        }

        Ok(DataFrame::new(cols)?.select(self.layout.iter().cloned())?)
    }
}

/// Timestamps paired with integer codes into a label vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledEvents {
    pub name: String,
    pub description: String,
    pub timestamps: Vec<f64>,
    pub data: Vec<u32>,
    pub labels: Vec<String>,
}

impl LabeledEvents {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        timestamps: Vec<f64>,
        data: Vec<u32>,
        labels: Vec<String>,
    ) -> Result<Self> {
        let name = name.into();
        if timestamps.is_empty() {
            return Err(ConversionError::Container(format!(
                "labeled events '{name}' have no events"
            )));
        }
        if timestamps.len() != data.len() {
            return Err(ConversionError::Shape(format!(
                "labeled events '{name}': {} timestamps but {} codes",
                timestamps.len(),
                data.len()
            )));
        }
        if let Some(code) = data.iter().find(|code| **code as usize >= labels.len()) {
            return Err(ConversionError::Container(format!(
                "labeled events '{name}': code {code} outside a vocabulary of {} labels",
                labels.len()
            )));
        }
        Ok(Self {
            name,
            description: description.into(),
            timestamps,
            data,
            labels,
        })
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn to_dataframe(&self) -> Result<DataFrame> {
        Ok(DataFrame::new(vec![
            Series::new("timestamps".into(), self.timestamps.clone()).into(),
            Series::new("data".into(), self.data.clone()).into(),
        ])?)
    }

    fn path(&self) -> String {
        format!("processing/behavior/{}.parquet", self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesGroup {
    Acquisition,
    Behavior,
}

impl SeriesGroup {
    pub fn path(&self) -> &'static str {
        match self {
            SeriesGroup::Acquisition => "acquisition",
            SeriesGroup::Behavior => "processing/behavior",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    pub name: String,
    pub description: String,
    pub unit: String,
    pub group: SeriesGroup,
    pub timestamps: Vec<f64>,
    pub channels: Vec<(String, Vec<Option<f64>>)>,
}

impl TimeSeries {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
        group: SeriesGroup,
        timestamps: Vec<f64>,
        channels: Vec<(String, Vec<Option<f64>>)>,
    ) -> Result<Self> {
        let name = name.into();
        if channels.is_empty() {
            return Err(ConversionError::Container(format!(
                "time series '{name}' has no channels"
            )));
        }
        for (channel, values) in &channels {
            if values.len() != timestamps.len() {
                return Err(ConversionError::Shape(format!(
                    "time series '{name}': channel '{channel}' has {} samples for {} timestamps",
                    values.len(),
                    timestamps.len()
                )));
            }
        }
        Ok(Self {
            name,
            description: description.into(),
            unit: unit.into(),
            group,
            timestamps,
            channels,
        })
    }

    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let mut cols: Vec<Column> = Vec::with_capacity(self.channels.len() + 1);
        cols.push(Series::new("timestamps".into(), self.timestamps.clone()).into());
        for (channel, values) in &self.channels {
            cols.push(Series::new(channel.as_str().into(), values.clone()).into());
        }
        Ok(DataFrame::new(cols)?)
    }

    fn path(&self) -> String {
        format!("{}/{}.parquet", self.group.path(), self.name)
    }
}

/// Imaging frames in (frames, rows, columns) order that can write themselves
/// as one complete `.npy` file.
pub trait FrameSource: fmt::Debug + Send + Sync {
    fn dtype(&self) -> &'static str;
    fn shape(&self) -> [usize; 3];
    fn write_npy(&self, writer: &mut dyn Write) -> Result<()>;
}

/// Frames held in memory, kept in their source dtype.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameBlock {
    U8(Array3<u8>),
    U16(Array3<u16>),
    I16(Array3<i16>),
    U32(Array3<u32>),
    F32(Array3<f32>),
    F64(Array3<f64>),
}

impl FrameSource for FrameBlock {
    fn dtype(&self) -> &'static str {
        match self {
            FrameBlock::U8(_) => "uint8",
            FrameBlock::U16(_) => "uint16",
            FrameBlock::I16(_) => "int16",
            FrameBlock::U32(_) => "uint32",
            FrameBlock::F32(_) => "float32",
            FrameBlock::F64(_) => "float64",
        }
    }

    fn shape(&self) -> [usize; 3] {
        let dim = match self {
            FrameBlock::U8(a) => a.dim(),
            FrameBlock::U16(a) => a.dim(),
            FrameBlock::I16(a) => a.dim(),
            FrameBlock::U32(a) => a.dim(),
            FrameBlock::F32(a) => a.dim(),
            FrameBlock::F64(a) => a.dim(),
        };
        [dim.0, dim.1, dim.2]
    }

    fn write_npy(&self, writer: &mut dyn Write) -> Result<()> {
        match self {
            FrameBlock::U8(a) => a.write_npy(writer)?,
            FrameBlock::U16(a) => a.write_npy(writer)?,
            FrameBlock::I16(a) => a.write_npy(writer)?,
            FrameBlock::U32(a) => a.write_npy(writer)?,
            FrameBlock::F32(a) => a.write_npy(writer)?,
            FrameBlock::F64(a) => a.write_npy(writer)?,
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ImagingSeries {
    pub name: String,
    pub description: String,
    pub rate: f64,
    pub frames: Arc<dyn FrameSource>,
}

impl ImagingSeries {
    fn path(&self) -> String {
        format!("acquisition/{}/data.npy", self.name)
    }
}

/// One imaging plane's ROI traces, each `rois x frames`.
#[derive(Debug, Clone, PartialEq)]
pub struct Segmentation {
    pub plane: usize,
    pub rate: f64,
    pub fluorescence: Array2<f32>,
    pub neuropil: Array2<f32>,
    pub deconvolved: Array2<f32>,
    pub accepted: Vec<bool>,
    pub probability: Vec<f64>,
}

impl Segmentation {
    pub fn new(
        plane: usize,
        rate: f64,
        fluorescence: Array2<f32>,
        neuropil: Array2<f32>,
        deconvolved: Array2<f32>,
        accepted: Vec<bool>,
        probability: Vec<f64>,
    ) -> Result<Self> {
        let shape = fluorescence.dim();
        for (label, other) in [("neuropil", neuropil.dim()), ("deconvolved", deconvolved.dim())] {
            if other != shape {
                return Err(ConversionError::Shape(format!(
                    "plane {plane}: {label} traces are {other:?}, fluorescence is {shape:?}"
                )));
            }
        }
        if accepted.len() != shape.0 || probability.len() != shape.0 {
            return Err(ConversionError::Shape(format!(
                "plane {plane}: {} ROIs but {} classifier rows",
                shape.0,
                accepted.len().min(probability.len())
            )));
        }
        Ok(Self {
            plane,
            rate,
            fluorescence,
            neuropil,
            deconvolved,
            accepted,
            probability,
        })
    }

    pub fn roi_count(&self) -> usize {
        self.fluorescence.nrows()
    }

    pub fn frame_count(&self) -> usize {
        self.fluorescence.ncols()
    }

    pub fn roi_table(&self) -> Result<DataFrame> {
        let ids: Vec<u32> = (0..self.roi_count() as u32).collect();
        Ok(DataFrame::new(vec![
            Series::new("roi_id".into(), ids).into(),
            Series::new("accepted".into(), self.accepted.clone()).into(),
            Series::new("probability".into(), self.probability.clone()).into(),
        ])?)
    }

    fn paths(&self) -> SegmentationPaths {
        let plane = self.plane;
        SegmentationPaths {
            roi_table: format!(
                "processing/ophys/ImageSegmentation/PlaneSegmentation{plane}.parquet"
            ),
            fluorescence: format!("processing/ophys/Fluorescence/RoiResponseSeries{plane}.npy"),
            neuropil: format!("processing/ophys/Neuropil/RoiResponseSeries{plane}.npy"),
            deconvolved: format!("processing/ophys/Deconvolved/RoiResponseSeries{plane}.npy"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentationPaths {
    pub roi_table: String,
    pub fluorescence: String,
    pub neuropil: String,
    pub deconvolved: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ManifestEntry {
    Trials {
        path: String,
        rows: usize,
        columns: Vec<ColumnSpec>,
    },
    LabeledEvents {
        path: String,
        name: String,
        description: String,
        events: usize,
        labels: Vec<String>,
    },
    TimeSeries {
        path: String,
        name: String,
        description: String,
        unit: String,
        samples: usize,
        channels: Vec<String>,
    },
    ImagingSeries {
        path: String,
        name: String,
        description: String,
        rate: f64,
        dtype: String,
        shape: [usize; 3],
    },
    Segmentation {
        plane: usize,
        rate: f64,
        rois: usize,
        frames: usize,
        paths: SegmentationPaths,
    },
}

impl ManifestEntry {
    pub fn kind(&self) -> &'static str {
        match self {
            ManifestEntry::Trials { .. } => "trials",
            ManifestEntry::LabeledEvents { .. } => "labeled_events",
            ManifestEntry::TimeSeries { .. } => "time_series",
            ManifestEntry::ImagingSeries { .. } => "imaging_series",
            ManifestEntry::Segmentation { .. } => "segmentation",
        }
    }

    pub fn path(&self) -> &str {
        match self {
            ManifestEntry::Trials { path, .. }
            | ManifestEntry::LabeledEvents { path, .. }
            | ManifestEntry::TimeSeries { path, .. }
            | ManifestEntry::ImagingSeries { path, .. } => path,
            ManifestEntry::Segmentation { paths, .. } => &paths.roi_table,
        }
    }

    /// One-line description for listings.
    pub fn summary(&self) -> String {
        match self {
            ManifestEntry::Trials { rows, columns, .. } => {
                format!("{rows} trials, {} columns", columns.len() + 2)
            }
            ManifestEntry::LabeledEvents { events, labels, .. } => {
                format!("{events} events, labels: {}", labels.join(", "))
            }
            ManifestEntry::TimeSeries {
                samples,
                channels,
                unit,
                ..
            } => format!("{samples} samples of {} ({unit})", channels.join(", ")),
            ManifestEntry::ImagingSeries {
                shape, dtype, rate, ..
            } => format!(
                "{} frames of {}x{} {dtype} at {rate} Hz",
                shape[0], shape[1], shape[2]
            ),
            ManifestEntry::Segmentation { rois, frames, .. } => {
                format!("{rois} ROIs x {frames} frames")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub format_version: u32,
    pub metadata: Value,
    pub entries: Vec<ManifestEntry>,
}

impl BundleManifest {
    pub fn read(path: &Path) -> Result<Self> {
        let file = fs::File::open(path)?;
        let mut archive = ZipArchive::new(file)?;
        read_manifest(&mut archive)
    }

    pub fn from_archive(zip_bytes: &[u8]) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(zip_bytes))?;
        read_manifest(&mut archive)
    }
}

/// Everything produced for one session, ready to be written as a bundle.
#[derive(Debug, Clone, Default)]
pub struct SessionBundle {
    pub metadata: Value,
    pub trials: Option<TrialTable>,
    pub labeled_events: Vec<LabeledEvents>,
    pub time_series: Vec<TimeSeries>,
    pub imaging: Vec<ImagingSeries>,
    pub segmentation: Vec<Segmentation>,
}

impl SessionBundle {
    pub fn new(metadata: Value) -> Self {
        Self {
            metadata,
            ..Self::default()
        }
    }

    pub fn set_trials(&mut self, trials: TrialTable) -> Result<()> {
        if self.trials.is_some() {
            return Err(ConversionError::Container(
                "session already has a trial table".to_string(),
            ));
        }
        self.trials = Some(trials);
        Ok(())
    }

    pub fn add_labeled_events(&mut self, events: LabeledEvents) -> Result<()> {
        self.ensure_free(&events.path())?;
        self.labeled_events.push(events);
        Ok(())
    }

    pub fn add_time_series(&mut self, series: TimeSeries) -> Result<()> {
        self.ensure_free(&series.path())?;
        self.time_series.push(series);
        Ok(())
    }

    pub fn add_imaging(&mut self, series: ImagingSeries) -> Result<()> {
        self.ensure_free(&series.path())?;
        self.imaging.push(series);
        Ok(())
    }

    pub fn add_segmentation(&mut self, segmentation: Segmentation) -> Result<()> {
        self.ensure_free(&segmentation.paths().roi_table)?;
        self.segmentation.push(segmentation);
        Ok(())
    }

    fn ensure_free(&self, path: &str) -> Result<()> {
        if self.manifest().entries.iter().any(|entry| entry.path() == path) {
            return Err(ConversionError::Container(format!(
                "bundle already holds an entry at '{path}'"
            )));
        }
        Ok(())
    }

    pub fn manifest(&self) -> BundleManifest {
        let mut entries = Vec::new();

        if let Some(trials) = &self.trials {
            entries.push(ManifestEntry::Trials {
                path: TRIALS_PATH.to_string(),
                rows: trials.len(),
                columns: trials.columns().to_vec(),
            });
        }
        for events in &self.labeled_events {
            entries.push(ManifestEntry::LabeledEvents {
                path: events.path(),
                name: events.name.clone(),
                description: events.description.clone(),
                events: events.len(),
                labels: events.labels.clone(),
            });
        }
        for series in &self.time_series {
            entries.push(ManifestEntry::TimeSeries {
                path: series.path(),
                name: series.name.clone(),
                description: series.description.clone(),
                unit: series.unit.clone(),
                samples: series.timestamps.len(),
                channels: series.channels.iter().map(|(name, _)| name.clone()).collect(),
            });
        }
        for series in &self.imaging {
            entries.push(ManifestEntry::ImagingSeries {
                path: series.path(),
                name: series.name.clone(),
                description: series.description.clone(),
                rate: series.rate,
                dtype: series.frames.dtype().to_string(),
                shape: series.frames.shape(),
            });
        }
        for segmentation in &self.segmentation {
            entries.push(ManifestEntry::Segmentation {
                plane: segmentation.plane,
                rate: segmentation.rate,
                rois: segmentation.roi_count(),
                frames: segmentation.frame_count(),
                paths: segmentation.paths(),
            });
        }

        BundleManifest {
            format_version: BUNDLE_FORMAT_VERSION,
            metadata: self.metadata.clone(),
            entries,
        }
    }

    pub fn to_zip_archive(&self) -> Result<Vec<u8>> {
        Ok(self.write_archive(Cursor::new(Vec::new()))?.into_inner())
    }

    /// Streams every entry into `writer`; frames go straight from their
    /// source into the archive.
    fn write_archive<W: Write + Seek>(&self, writer: W) -> Result<W> {
        let manifest = self.manifest();
        let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;

        let mut zip = ZipWriter::new(writer);
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

        zip.start_file(MANIFEST_PATH, options)?;
        zip.write_all(&manifest_bytes)?;

        if let Some(trials) = &self.trials {
            write_parquet(&mut zip, TRIALS_PATH, trials.to_dataframe()?, options)?;
        }
        for events in &self.labeled_events {
            write_parquet(&mut zip, &events.path(), events.to_dataframe()?, options)?;
        }
        for series in &self.time_series {
            write_parquet(&mut zip, &series.path(), series.to_dataframe()?, options)?;
        }
        for series in &self.imaging {
            zip.start_file(series.path(), options.large_file(true))?;
            series.frames.write_npy(&mut zip)?;
            debug!(
                path = series.path().as_str(),
                shape = ?series.frames.shape(),
                "bundle frames written"
            );
        }
        for segmentation in &self.segmentation {
            let paths = segmentation.paths();
            write_parquet(&mut zip, &paths.roi_table, segmentation.roi_table()?, options)?;
            for (path, traces) in [
                (&paths.fluorescence, &segmentation.fluorescence),
                (&paths.neuropil, &segmentation.neuropil),
                (&paths.deconvolved, &segmentation.deconvolved),
            ] {
                zip.start_file(path.as_str(), options)?;
                traces.write_npy(&mut zip)?;
            }
        }

        Ok(zip.finish()?)
    }

    /// Writes through a sibling `.partial` file so a failed run leaves no bundle behind.
    pub fn write(&self, path: &Path, overwrite: bool) -> Result<()> {
        if path.exists() && !overwrite {
            return Err(ConversionError::Container(format!(
                "{} already exists; pass overwrite to replace it",
                path.display()
            )));
        }

        let partial = partial_path(path);
        if let Err(err) = self.write_partial(&partial, path) {
            let _ = fs::remove_file(&partial);
            return Err(err);
        }

        info!(
            path = %path.display(),
            bytes = fs::metadata(path)?.len(),
            entries = self.manifest().entries.len(),
            "session bundle written"
        );
        Ok(())
    }

    fn write_partial(&self, partial: &Path, path: &Path) -> Result<()> {
        let file = fs::File::create(partial)?;
        let mut writer = self.write_archive(BufWriter::new(file))?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);
        fs::rename(partial, path)?;
        Ok(())
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

fn write_parquet<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    path: &str,
    mut df: DataFrame,
    options: FileOptions,
) -> Result<()> {
    let mut buffer = Vec::new();
    ParquetWriter::new(&mut buffer).finish(&mut df)?;
    zip.start_file(path, options)?;
    zip.write_all(&buffer)?;
    debug!(path, rows = df.height(), "bundle table written");
    Ok(())
}

fn read_manifest<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<BundleManifest> {
    let mut manifest_file = archive.by_name(MANIFEST_PATH).map_err(|_| {
        ConversionError::Container("bundle is missing manifest.json".to_string())
    })?;
    let mut manifest_bytes = Vec::new();
    manifest_file.read_to_end(&mut manifest_bytes)?;
    let manifest: BundleManifest = serde_json::from_slice(&manifest_bytes)?;
    if manifest.format_version != BUNDLE_FORMAT_VERSION {
        return Err(ConversionError::Container(format!(
            "unsupported bundle format version {}",
            manifest.format_version
        )));
    }
    Ok(manifest)
}

/// Reads any Parquet entry of a bundle back into a DataFrame.
pub fn read_table(path: &Path, entry: &str) -> Result<DataFrame> {
    let file = fs::File::open(path)?;
    let mut archive = ZipArchive::new(file)?;
    let mut entry_file = archive
        .by_name(entry)
        .map_err(|_| ConversionError::Container(format!("bundle has no entry '{entry}'")))?;
    let mut bytes = Vec::new();
    entry_file.read_to_end(&mut bytes)?;
    Ok(ParquetReader::new(Cursor::new(bytes)).finish()?)
}

pub fn read_trials(path: &Path) -> Result<DataFrame> {
    read_table(path, TRIALS_PATH)
}
