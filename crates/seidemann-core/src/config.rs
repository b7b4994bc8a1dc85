// crates/seidemann-core/src/config.rs

//! Versioned description of one session's inputs. Each optional section
//! selects an input channel.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::codebook::DefinitionNames;
use crate::error::{ConversionError, Result};
use crate::events::EventStream;
use crate::imaging::{RawDtype, VideoStructure};

pub const CONFIG_VERSION: u32 = 1;

fn default_variable() -> String {
    "TS".to_string()
}

fn default_true() -> bool {
    true
}

fn default_rate() -> f64 {
    30.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConversionConfig {
    pub version: u32,
    pub session_id: String,
    #[serde(default)]
    pub session_description: Option<String>,
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub metadata: Option<PathBuf>,
    #[serde(default)]
    pub stub_test: bool,
    #[serde(default)]
    pub behavior: Option<BehaviorConfig>,
    #[serde(default)]
    pub imaging: Option<ImagingConfig>,
    #[serde(default)]
    pub suite2p: Option<Suite2pConfig>,
    #[serde(default)]
    pub eye_tracking: Option<AnalogConfig>,
    #[serde(default)]
    pub photodiode: Option<AnalogConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BehaviorConfig {
    pub mat_file: PathBuf,
    pub event_log: PathBuf,
    #[serde(default = "default_variable")]
    pub variable: String,
    #[serde(default = "default_true")]
    pub align_to_session_start: bool,
    #[serde(default = "default_true")]
    pub drop_new_trial_events: bool,
    #[serde(default)]
    pub definitions: DefinitionNames,
    /// Extra or replacement streams keyed by event-type label.
    #[serde(default)]
    pub event_streams: BTreeMap<String, EventStream>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImagingConfig {
    pub file_path: PathBuf,
    #[serde(default = "default_rate")]
    pub sampling_frequency: f64,
    #[serde(default)]
    pub dtype: RawDtype,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub channel: usize,
    #[serde(default)]
    pub structure: VideoStructure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Suite2pConfig {
    pub folder_path: PathBuf,
    #[serde(default)]
    pub plane: usize,
    #[serde(default = "default_rate")]
    pub sampling_frequency: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalogConfig {
    pub file_path: PathBuf,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ConversionConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_toml_str(&content, base_dir)
    }

    /// Parses and validates; relative paths resolve against `base_dir`.
    pub fn from_toml_str(content: &str, base_dir: &Path) -> Result<Self> {
        let mut config: ConversionConfig = toml::from_str(content)?;
        if config.version != CONFIG_VERSION {
            return Err(ConversionError::Config(format!(
                "unsupported config version {} (expected {CONFIG_VERSION})",
                config.version
            )));
        }
        config.resolve_paths(base_dir);
        config.validate()?;
        Ok(config)
    }

    fn resolve_paths(&mut self, base_dir: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base_dir.join(&*path);
            }
        };

        if let Some(output) = self.output.as_mut() {
            resolve(output);
        }
        if let Some(metadata) = self.metadata.as_mut() {
            resolve(metadata);
        }
        if let Some(behavior) = self.behavior.as_mut() {
            resolve(&mut behavior.mat_file);
            resolve(&mut behavior.event_log);
        }
        if let Some(imaging) = self.imaging.as_mut() {
            resolve(&mut imaging.file_path);
        }
        if let Some(suite2p) = self.suite2p.as_mut() {
            resolve(&mut suite2p.folder_path);
        }
        for analog in [self.eye_tracking.as_mut(), self.photodiode.as_mut()]
            .into_iter()
            .flatten()
        {
            resolve(&mut analog.file_path);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.session_id.trim().is_empty() {
            return Err(ConversionError::Config("session_id must not be empty".to_string()));
        }
        if self.enabled_channels().is_empty() {
            return Err(ConversionError::Config(
                "no input channel configured".to_string(),
            ));
        }
        if let Some(imaging) = &self.imaging {
            imaging.structure.validate()?;
            if imaging.channel >= imaging.structure.num_channels {
                return Err(ConversionError::Config(format!(
                    "imaging channel {} outside 0..{}",
                    imaging.channel, imaging.structure.num_channels
                )));
            }
        }
        let rates = [
            self.imaging.as_ref().map(|c| c.sampling_frequency),
            self.suite2p.as_ref().map(|c| c.sampling_frequency),
        ];
        if let Some(rate) = rates
            .into_iter()
            .flatten()
            .find(|rate| !(rate.is_finite() && *rate > 0.0))
        {
            return Err(ConversionError::Config(format!(
                "sampling frequency must be positive, got {rate}"
            )));
        }
        if let Some(behavior) = &self.behavior {
            if behavior.variable.is_empty() {
                return Err(ConversionError::Config(
                    "behavior.variable must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn enabled_channels(&self) -> Vec<&'static str> {
        [
            ("behavior", self.behavior.is_some()),
            ("imaging", self.imaging.is_some()),
            ("suite2p", self.suite2p.is_some()),
            ("eye_tracking", self.eye_tracking.is_some()),
            ("photodiode", self.photodiode.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, enabled)| enabled.then_some(name))
        .collect()
    }

    /// Configured output, or `<session_id>.zip` next to `base_dir`.
    pub fn output_path(&self, base_dir: &Path) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| base_dir.join(format!("{}.zip", self.session_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
version = 1
session_id = "M22D20210127R0"
stub_test = true

[behavior]
mat_file = "M22D20210127R0TS.mat"
event_log = "events.csv"

[behavior.event_streams.laser]
name = "LaserEvents"
description = "Laser pulses"

[imaging]
file_path = "/data/raw.dat"
dtype = "int16"

[imaging.structure]
rows = 256

[suite2p]
folder_path = "suite2p"
plane = 1

[photodiode]
file_path = "photodiode.csv"
"#;

    #[test]
    fn parses_sections_with_defaults() {
        let config = ConversionConfig::from_toml_str(FULL, Path::new("/sessions/a")).unwrap();

        let behavior = config.behavior.as_ref().unwrap();
        assert_eq!(behavior.mat_file, Path::new("/sessions/a/M22D20210127R0TS.mat"));
        assert_eq!(behavior.variable, "TS");
        assert!(behavior.align_to_session_start);
        assert!(behavior.drop_new_trial_events);
        assert_eq!(behavior.definitions.outcome, "OUTCOME");
        assert_eq!(behavior.event_streams["laser"].name, "LaserEvents");

        let imaging = config.imaging.as_ref().unwrap();
        assert_eq!(imaging.file_path, Path::new("/data/raw.dat"));
        assert_eq!(imaging.dtype, RawDtype::Int16);
        assert_eq!(imaging.sampling_frequency, 30.0);
        assert_eq!(imaging.structure.rows, 256);
        assert_eq!(imaging.structure.columns, 512);
        assert_eq!(imaging.structure.frame_axis, 1);

        assert_eq!(config.suite2p.as_ref().unwrap().plane, 1);
        assert!(config.eye_tracking.is_none());
        assert_eq!(
            config.enabled_channels(),
            ["behavior", "imaging", "suite2p", "photodiode"]
        );
        assert_eq!(
            config.output_path(Path::new("/out")),
            Path::new("/out/M22D20210127R0.zip")
        );
    }

    #[test]
    fn rejects_other_versions() {
        let err = ConversionConfig::from_toml_str(
            "version = 2\nsession_id = \"s\"\n[photodiode]\nfile_path = \"p.csv\"\n",
            Path::new("."),
        )
        .unwrap_err();
        assert!(matches!(err, ConversionError::Config(_)));
    }

    #[test]
    fn requires_a_channel() {
        let err = ConversionConfig::from_toml_str("version = 1\nsession_id = \"s\"\n", Path::new("."))
            .unwrap_err();
        assert!(matches!(err, ConversionError::Config(_)));
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = ConversionConfig::from_toml_str(
            "version = 1\nsession_id = \"s\"\n[photodiode]\npath = \"p.csv\"\n",
            Path::new("."),
        )
        .unwrap_err();
        assert!(matches!(err, ConversionError::Toml(_)));
    }

    #[test]
    fn invalid_axes_fail_validation() {
        let content = "version = 1\nsession_id = \"s\"\n[imaging]\nfile_path = \"v.dat\"\n[imaging.structure]\nrows_axis = 1\n";
        assert!(ConversionConfig::from_toml_str(content, Path::new(".")).is_err());
    }
}
