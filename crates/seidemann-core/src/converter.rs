// crates/seidemann-core/src/converter.rs

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::analog::{AnalogKind, AnalogSignalInterface};
use crate::behavior::BehaviorInterface;
use crate::config::ConversionConfig;
use crate::container::SessionBundle;
use crate::error::Result;
use crate::imaging::{ImagingInterface, MemmapImaging};
use crate::metadata::{base_metadata, deep_update, file_hash, validate_metadata};
use crate::suite2p::Suite2pInterface;

/// Settings shared by every interface during one conversion.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConversionOptions {
    pub stub_test: bool,
    /// Milliseconds subtracted from every timestamp before conversion to seconds.
    pub session_offset_ms: Option<f64>,
}

/// One input channel of a session.
pub trait DataInterface {
    fn name(&self) -> &'static str;
    fn source_files(&self) -> Vec<PathBuf>;
    fn metadata(&self) -> Result<Value>;
    fn add_to_bundle(&self, bundle: &mut SessionBundle, options: &ConversionOptions) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionSummary {
    pub output: PathBuf,
    pub session_id: String,
    pub interfaces: Vec<&'static str>,
    pub session_offset_ms: Option<f64>,
    pub trials: usize,
    pub event_streams: usize,
    pub time_series: usize,
    pub imaging_frames: usize,
    pub segmented_rois: usize,
}

pub struct SessionConverter {
    config: ConversionConfig,
    behavior: Option<BehaviorInterface>,
    others: Vec<Box<dyn DataInterface>>,
}

impl SessionConverter {
    pub fn from_config(config: ConversionConfig) -> Result<Self> {
        config.validate()?;

        let behavior = config
            .behavior
            .as_ref()
            .map(BehaviorInterface::open)
            .transpose()?;

        let mut others: Vec<Box<dyn DataInterface>> = Vec::new();
        if let Some(imaging) = &config.imaging {
            let video = MemmapImaging::open(
                &imaging.file_path,
                imaging.structure,
                imaging.dtype,
                imaging.offset,
                imaging.sampling_frequency,
            )?;
            others.push(Box::new(ImagingInterface::new(video, imaging.channel)?));
        }
        if let Some(suite2p) = &config.suite2p {
            others.push(Box::new(Suite2pInterface::open(
                &suite2p.folder_path,
                suite2p.plane,
                suite2p.sampling_frequency,
            )?));
        }
        for (kind, section) in [
            (AnalogKind::EyeTracking, &config.eye_tracking),
            (AnalogKind::Photodiode, &config.photodiode),
        ] {
            if let Some(analog) = section {
                others.push(Box::new(AnalogSignalInterface::open(
                    kind,
                    &analog.file_path,
                    analog.unit.clone(),
                    analog.description.clone(),
                )?));
            }
        }

        info!(
            session_id = config.session_id.as_str(),
            channels = ?config.enabled_channels(),
            "session converter ready"
        );
        Ok(Self {
            config,
            behavior,
            others,
        })
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    pub fn behavior(&self) -> Option<&BehaviorInterface> {
        self.behavior.as_ref()
    }

    fn interfaces(&self) -> impl Iterator<Item = &dyn DataInterface> {
        self.behavior
            .iter()
            .map(|behavior| behavior as &dyn DataInterface)
            .chain(self.others.iter().map(|other| other.as_ref()))
    }

    /// Metadata known from the sources: session identity, file hashes and
    /// whatever each interface reports, merged in interface order.
    pub fn metadata(&self) -> Result<Value> {
        let mut sources = Vec::new();
        for interface in self.interfaces() {
            for path in interface.source_files() {
                sources.push((path.display().to_string(), file_hash(&path)?));
            }
        }
        let mut metadata = base_metadata(
            &self.config.session_id,
            self.config.session_description.as_deref(),
            &sources,
        );
        for interface in self.interfaces() {
            deep_update(&mut metadata, interface.metadata()?);
        }
        Ok(metadata)
    }

    pub fn options(&self) -> Result<ConversionOptions> {
        let session_offset_ms = match &self.behavior {
            Some(behavior) => behavior.session_offset_ms()?,
            None => None,
        };
        Ok(ConversionOptions {
            stub_test: self.config.stub_test,
            session_offset_ms,
        })
    }

    pub fn convert(&self, metadata: Value) -> Result<SessionBundle> {
        validate_metadata(&metadata)?;
        let options = self.options()?;
        debug!(?options, "conversion options resolved");

        let mut bundle = SessionBundle::new(metadata);
        for interface in self.interfaces() {
            interface.add_to_bundle(&mut bundle, &options)?;
            debug!(interface = interface.name(), "interface added to bundle");
        }
        Ok(bundle)
    }

    pub fn run_conversion(
        &self,
        output: &Path,
        metadata: Value,
        overwrite: bool,
    ) -> Result<ConversionSummary> {
        let options = self.options()?;
        let bundle = self.convert(metadata)?;
        bundle.write(output, overwrite)?;

        let summary = ConversionSummary {
            output: output.to_path_buf(),
            session_id: self.config.session_id.clone(),
            interfaces: self.interfaces().map(|interface| interface.name()).collect(),
            session_offset_ms: options.session_offset_ms,
            trials: bundle.trials.as_ref().map_or(0, |trials| trials.len()),
            event_streams: bundle.labeled_events.len(),
            time_series: bundle.time_series.len(),
            imaging_frames: bundle
                .imaging
                .iter()
                .map(|series| series.frames.shape()[0])
                .sum(),
            segmented_rois: bundle
                .segmentation
                .iter()
                .map(|segmentation| segmentation.roi_count())
                .sum(),
        };
        info!(
            output = %output.display(),
            trials = summary.trials,
            event_streams = summary.event_streams,
            "conversion finished"
        );
        Ok(summary)
    }
}
