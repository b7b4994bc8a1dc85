// crates/seidemann-core/src/events.rs

//! Splits the mixed event log into one labeled stream per event type.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use polars::prelude::*;
use seidemann_parser::formats::schema::EVENT_LOG_COLUMNS;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::codebook::Codebook;
use crate::container::LabeledEvents;
use crate::error::{ConversionError, Result};

/// Type label of the per-trial marker stream, redundant with the trial table.
pub const NEW_TRIAL: &str = "new trial";

const TIMESTAMP: &str = "timestamps";
const TYPE_LABEL: &str = "type";
const EVENT_LABEL: &str = "label";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStream {
    pub name: String,
    pub description: String,
}

/// Catalog key for an event-type label: header dictionaries spell
/// `NEW_TRIAL` where the catalog says `new trial`.
fn catalog_key(type_label: &str) -> String {
    type_label.to_lowercase().replace('_', " ")
}

/// Stream name and description per lowercase event-type label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventStreamCatalog {
    streams: BTreeMap<String, EventStream>,
}

static DEFAULT_STREAMS: Lazy<EventStreamCatalog> = Lazy::new(|| {
    let entries = [
        (NEW_TRIAL, "NewTrialEvents", "Start markers written by the rig at each new trial."),
        ("fixation", "FixationEvents", "Fixation point and fixation acquisition events."),
        ("stimulus", "StimulusEvents", "Visual stimulus onset and offset events."),
        ("saccade", "SaccadeEvents", "Saccade detection events."),
        ("reward", "RewardEvents", "Reward delivery events."),
        ("outcome", "OutcomeEvents", "Trial outcome decisions."),
        ("ttl", "TTLEvents", "TTL pulses exchanged with the acquisition system."),
    ];
    EventStreamCatalog {
        streams: entries
            .into_iter()
            .map(|(label, name, description)| {
                (
                    label.to_string(),
                    EventStream {
                        name: name.to_string(),
                        description: description.to_string(),
                    },
                )
            })
            .collect(),
    }
});

impl Default for EventStreamCatalog {
    fn default() -> Self {
        DEFAULT_STREAMS.clone()
    }
}

impl EventStreamCatalog {
    /// Built-in streams with entries added or replaced by `overrides`.
    pub fn with_overrides(overrides: &BTreeMap<String, EventStream>) -> Self {
        let mut catalog = Self::default();
        for (label, stream) in overrides {
            catalog.streams.insert(catalog_key(label), stream.clone());
        }
        catalog
    }

    pub fn lookup(&self, type_label: &str) -> Result<&EventStream> {
        self.streams
            .get(&catalog_key(type_label))
            .ok_or_else(|| ConversionError::UnknownEventType(type_label.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EventStream)> {
        self.streams.iter().map(|(label, stream)| (label.as_str(), stream))
    }
}

/// Earliest event timestamp in milliseconds; the zero point of the session.
pub fn session_offset_ms(events: &DataFrame) -> Result<f64> {
    events
        .column(EVENT_LOG_COLUMNS[0])?
        .f64()?
        .min()
        .ok_or(ConversionError::EmptyEventLog)
}

/// Event log with codes replaced by lowercase labels and times in seconds.
/// Raw codes and the trial index are gone.
pub fn label_events(
    events: &DataFrame,
    codebook: &Codebook,
    offset_ms: Option<f64>,
) -> Result<DataFrame> {
    if events.height() == 0 {
        return Err(ConversionError::EmptyEventLog);
    }
    let offset = offset_ms.unwrap_or(0.0);

    let [timestamp_column, type_column, id_column, _trial_column] = EVENT_LOG_COLUMNS;
    let timestamps = events.column(timestamp_column)?.f64()?;
    let types = events.column(type_column)?.i64()?;
    let ids = events.column(id_column)?.i64()?;

    let mut seconds = Vec::with_capacity(events.height());
    let mut type_labels = Vec::with_capacity(events.height());
    let mut event_labels = Vec::with_capacity(events.height());
    for idx in 0..events.height() {
        let (Some(ms), Some(type_code), Some(id_code)) =
            (timestamps.get(idx), types.get(idx), ids.get(idx))
        else {
            return Err(ConversionError::MissingColumn(format!(
                "event {idx} lacks a timestamp, type or event id"
            )));
        };
        let time = (ms - offset) / 1000.0;
        if time < 0.0 {
            return Err(ConversionError::NegativeTime {
                column: TIMESTAMP.to_string(),
                value: time,
            });
        }
        seconds.push(time);
        type_labels.push(codebook.event_type_label(type_code)?);
        event_labels.push(codebook.event_id_label(id_code)?);
    }

    Ok(DataFrame::new(vec![
        Series::new(TIMESTAMP.into(), seconds).into(),
        Series::new(TYPE_LABEL.into(), type_labels).into(),
        Series::new(EVENT_LABEL.into(), event_labels).into(),
    ])?)
}

/// One stream per event type in label order. Event codes index the sorted
/// labels seen in that stream only.
pub fn split_events(
    labeled: &DataFrame,
    catalog: &EventStreamCatalog,
    drop_new_trial: bool,
) -> Result<Vec<LabeledEvents>> {
    let timestamps = labeled.column(TIMESTAMP)?.f64()?;
    let types = labeled.column(TYPE_LABEL)?.str()?;
    let labels = labeled.column(EVENT_LABEL)?.str()?;

    let mut groups: BTreeMap<&str, Vec<(f64, &str)>> = BTreeMap::new();
    for ((time, type_label), label) in timestamps.into_iter().zip(types).zip(labels) {
        let (Some(time), Some(type_label), Some(label)) = (time, type_label, label) else {
            continue;
        };
        groups.entry(type_label).or_default().push((time, label));
    }

    let mut streams = Vec::with_capacity(groups.len());
    for (type_label, events) in groups {
        if drop_new_trial && catalog_key(type_label) == NEW_TRIAL {
            debug!(events = events.len(), "dropped new trial events");
            continue;
        }
        let stream = catalog.lookup(type_label)?;

        let vocabulary: Vec<String> = events
            .iter()
            .map(|(_, label)| *label)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect();
        let data: Vec<u32> = events
            .iter()
            .map(|(_, label)| {
                vocabulary
                    .binary_search_by(|known| known.as_str().cmp(label))
                    .map(|idx| idx as u32)
                    .map_err(|_| ConversionError::UnknownEventType(label.to_string()))
            })
            .collect::<Result<_>>()?;
        let times: Vec<f64> = events.iter().map(|(time, _)| *time).collect();

        info!(
            stream = stream.name.as_str(),
            events = times.len(),
            labels = vocabulary.len(),
            "labeled event stream built"
        );
        streams.push(LabeledEvents::new(
            stream.name.clone(),
            stream.description.clone(),
            times,
            data,
            vocabulary,
        )?);
    }
    Ok(streams)
}
