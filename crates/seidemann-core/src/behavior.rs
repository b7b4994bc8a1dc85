// crates/seidemann-core/src/behavior.rs

use std::path::PathBuf;

use polars::prelude::DataFrame;
use seidemann_parser::{parse_log_file, read_trial_structure, EventLogParser, TrialStructure};
use serde_json::{json, Value};
use tracing::info;

use crate::codebook::Codebook;
use crate::config::BehaviorConfig;
use crate::container::{LabeledEvents, SessionBundle, TrialTable};
use crate::converter::{ConversionOptions, DataInterface};
use crate::error::Result;
use crate::events::{label_events, session_offset_ms, split_events, EventStreamCatalog};
use crate::trials::build_trial_table;

/// Trial struct plus event log, decoded once with a shared codebook.
pub struct BehaviorInterface {
    config: BehaviorConfig,
    structure: TrialStructure,
    events: DataFrame,
    codebook: Codebook,
    catalog: EventStreamCatalog,
}

impl BehaviorInterface {
    pub fn open(config: &BehaviorConfig) -> Result<Self> {
        let structure = read_trial_structure(&config.mat_file, &config.variable)?;
        let codebook = Codebook::from_header(&structure.header, &config.definitions)?;
        let events = parse_log_file(&EventLogParser, &config.event_log)?;
        info!(
            mat_file = %config.mat_file.display(),
            trials = structure.trials.trial_count,
            events = events.height(),
            "behavior sources loaded"
        );
        Ok(Self {
            config: config.clone(),
            structure,
            events,
            codebook,
            catalog: EventStreamCatalog::with_overrides(&config.event_streams),
        })
    }

    /// Zero point shared by every time-stamped interface, when alignment is on.
    pub fn session_offset_ms(&self) -> Result<Option<f64>> {
        if !self.config.align_to_session_start {
            return Ok(None);
        }
        session_offset_ms(&self.events).map(Some)
    }

    pub fn codebook(&self) -> &Codebook {
        &self.codebook
    }

    pub fn trial_table(&self, offset_ms: Option<f64>) -> Result<TrialTable> {
        build_trial_table(&self.structure.trials, &self.codebook, offset_ms)
    }

    pub fn event_streams(&self, offset_ms: Option<f64>) -> Result<Vec<LabeledEvents>> {
        let labeled = label_events(&self.events, &self.codebook, offset_ms)?;
        split_events(&labeled, &self.catalog, self.config.drop_new_trial_events)
    }
}

impl DataInterface for BehaviorInterface {
    fn name(&self) -> &'static str {
        "behavior"
    }

    fn source_files(&self) -> Vec<PathBuf> {
        vec![self.config.mat_file.clone(), self.config.event_log.clone()]
    }

    fn metadata(&self) -> Result<Value> {
        let conditions: Vec<&str> = self
            .codebook
            .conditions()
            .iter()
            .map(|condition| condition.as_str())
            .collect();
        Ok(json!({
            "Behavior": {
                "trial_variable": self.config.variable,
                "conditions": conditions,
            }
        }))
    }

    fn add_to_bundle(&self, bundle: &mut SessionBundle, options: &ConversionOptions) -> Result<()> {
        let offset = options.session_offset_ms;
        bundle.set_trials(self.trial_table(offset)?)?;
        for stream in self.event_streams(offset)? {
            bundle.add_labeled_events(stream)?;
        }
        Ok(())
    }
}
