// crates/seidemann-core/src/analog.rs

use std::path::{Path, PathBuf};

use polars::prelude::*;
use seidemann_parser::formats::schema::TIMESTAMP_COLUMN;
use seidemann_parser::{parse_log_file, AnalogLogParser};
use serde_json::{json, Value};
use tracing::info;

use crate::container::{SeriesGroup, SessionBundle, TimeSeries};
use crate::converter::{ConversionOptions, DataInterface};
use crate::error::{ConversionError, Result};

/// Which analog recording an interface carries; fixes its name and group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalogKind {
    EyeTracking,
    Photodiode,
}

impl AnalogKind {
    pub fn series_name(&self) -> &'static str {
        match self {
            AnalogKind::EyeTracking => "EyeTracking",
            AnalogKind::Photodiode => "Photodiode",
        }
    }

    pub fn group(&self) -> SeriesGroup {
        match self {
            AnalogKind::EyeTracking => SeriesGroup::Behavior,
            AnalogKind::Photodiode => SeriesGroup::Acquisition,
        }
    }

    fn interface_name(&self) -> &'static str {
        match self {
            AnalogKind::EyeTracking => "eye_tracking",
            AnalogKind::Photodiode => "photodiode",
        }
    }

    pub fn default_unit(&self) -> &'static str {
        match self {
            AnalogKind::EyeTracking => "degrees",
            AnalogKind::Photodiode => "volts",
        }
    }

    pub fn default_description(&self) -> &'static str {
        match self {
            AnalogKind::EyeTracking => "Eye position sampled during the session.",
            AnalogKind::Photodiode => "Photodiode signal marking screen updates.",
        }
    }
}

pub struct AnalogSignalInterface {
    kind: AnalogKind,
    path: PathBuf,
    unit: String,
    description: String,
    samples: DataFrame,
}

impl AnalogSignalInterface {
    pub fn open(
        kind: AnalogKind,
        path: &Path,
        unit: Option<String>,
        description: Option<String>,
    ) -> Result<Self> {
        let samples = parse_log_file(&AnalogLogParser, path)?;
        info!(
            signal = kind.series_name(),
            path = %path.display(),
            samples = samples.height(),
            channels = samples.width() - 1,
            "analog log loaded"
        );
        Ok(Self {
            kind,
            path: path.to_path_buf(),
            unit: unit.unwrap_or_else(|| kind.default_unit().to_string()),
            description: description.unwrap_or_else(|| kind.default_description().to_string()),
            samples,
        })
    }

    pub fn kind(&self) -> AnalogKind {
        self.kind
    }

    /// Samples as a time series in seconds relative to `offset_ms`.
    pub fn to_time_series(&self, offset_ms: Option<f64>) -> Result<TimeSeries> {
        let offset = offset_ms.unwrap_or(0.0);
        let timestamps: Vec<f64> = self
            .samples
            .column(TIMESTAMP_COLUMN)?
            .f64()?
            .into_iter()
            .map(|value| {
                value
                    .map(|ms| (ms - offset) / 1000.0)
                    .ok_or_else(|| ConversionError::MissingColumn(TIMESTAMP_COLUMN.to_string()))
            })
            .collect::<Result<_>>()?;
        if let Some(first) = timestamps.first().filter(|first| **first < 0.0) {
            return Err(ConversionError::NegativeTime {
                column: self.kind.series_name().to_string(),
                value: *first,
            });
        }

        let mut channels = Vec::with_capacity(self.samples.width() - 1);
        for column in self.samples.get_columns() {
            if column.name().as_str() == TIMESTAMP_COLUMN {
                continue;
            }
            let values: Vec<Option<f64>> = column.f64()?.into_iter().collect();
            channels.push((column.name().to_string(), values));
        }

        TimeSeries::new(
            self.kind.series_name(),
            self.description.clone(),
            self.unit.clone(),
            self.kind.group(),
            timestamps,
            channels,
        )
    }
}

impl DataInterface for AnalogSignalInterface {
    fn name(&self) -> &'static str {
        self.kind.interface_name()
    }

    fn source_files(&self) -> Vec<PathBuf> {
        vec![self.path.clone()]
    }

    fn metadata(&self) -> Result<Value> {
        Ok(json!({
            "Behavior": {
                (self.kind.series_name()): {
                    "unit": self.unit,
                    "description": self.description,
                }
            }
        }))
    }

    fn add_to_bundle(&self, bundle: &mut SessionBundle, options: &ConversionOptions) -> Result<()> {
        let series = self.to_time_series(options.session_offset_ms)?;
        info!(
            signal = self.kind.series_name(),
            group = series.group.path(),
            "analog signal added"
        );
        bundle.add_time_series(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn interface(kind: AnalogKind, content: &str) -> (tempfile::TempDir, AnalogSignalInterface) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signal.csv");
        fs::write(&path, content).unwrap();
        let interface = AnalogSignalInterface::open(kind, &path, None, None).unwrap();
        (dir, interface)
    }

    #[test]
    fn eye_tracking_is_offset_and_in_seconds() {
        let (_dir, eye) = interface(
            AnalogKind::EyeTracking,
            "Timestamp,EyeX,EyeY\n1000,0.5,1.0\n1500,,2.0\n",
        );
        let series = eye.to_time_series(Some(500.0)).unwrap();
        assert_eq!(series.group, SeriesGroup::Behavior);
        assert_eq!(series.unit, "degrees");
        assert_eq!(series.timestamps, vec![0.5, 1.0]);
        assert_eq!(series.channels[0], ("EyeX".to_string(), vec![Some(0.5), None]));
    }

    #[test]
    fn photodiode_goes_to_acquisition() {
        let (_dir, diode) = interface(AnalogKind::Photodiode, "Timestamp,Photodiode\n0,1.0\n");
        let series = diode.to_time_series(None).unwrap();
        assert_eq!(series.group, SeriesGroup::Acquisition);
        assert_eq!(series.name, "Photodiode");
    }

    #[test]
    fn samples_before_session_start_are_rejected() {
        let (_dir, diode) = interface(AnalogKind::Photodiode, "Timestamp,Photodiode\n100,1.0\n");
        assert!(matches!(
            diode.to_time_series(Some(200.0)),
            Err(ConversionError::NegativeTime { .. })
        ));
    }
}
