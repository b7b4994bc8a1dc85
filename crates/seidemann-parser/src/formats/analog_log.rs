use csv::StringRecord;
use polars::prelude::*;

use crate::errors::ParserError;
use crate::registry::TextLogParser;

use super::schema::{ANALOG_TIMESTAMP_HEADER, TIMESTAMP_COLUMN};
use super::{next_header_row, parse_optional_f64, parse_required_f64};

/// Sampled signals (eye position, photodiode) logged as `Timestamp, <channel>...`.
pub struct AnalogLogParser;

impl Default for AnalogLogParser {
    fn default() -> Self {
        Self
    }
}

impl AnalogLogParser {
    const NAME: &'static str = "ANALOG_LOG";

    fn channel_names(columns: &StringRecord) -> Result<Vec<String>, ParserError> {
        let first = columns.get(0).map(str::trim).unwrap_or("");
        if first != ANALOG_TIMESTAMP_HEADER {
            return Err(ParserError::FormatMismatch {
                parser: Self::NAME,
                reason: format!("first column must be '{ANALOG_TIMESTAMP_HEADER}', found '{first}'"),
            });
        }

        let channels: Vec<String> = columns.iter().skip(1).map(|c| c.trim().to_string()).collect();
        if channels.is_empty() {
            return Err(ParserError::InvalidHeader {
                parser: Self::NAME,
                row_index: 1,
                message: "no channel columns after the timestamp".to_string(),
            });
        }
        for (idx, name) in channels.iter().enumerate() {
            if name.is_empty() || name == TIMESTAMP_COLUMN {
                return Err(ParserError::InvalidHeader {
                    parser: Self::NAME,
                    row_index: 1,
                    message: format!("invalid channel name '{name}' at position {}", idx + 1),
                });
            }
            if channels[..idx].contains(name) {
                return Err(ParserError::InvalidHeader {
                    parser: Self::NAME,
                    row_index: 1,
                    message: format!("duplicate channel '{name}'"),
                });
            }
        }
        Ok(channels)
    }
}

impl TextLogParser for AnalogLogParser {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(&self, content: &str) -> Result<DataFrame, ParserError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(content.as_bytes());

        let mut records = reader.records();
        let columns = next_header_row(Self::NAME, &mut records)?;
        let channels = Self::channel_names(&columns)?;

        let mut timestamps: Vec<f64> = Vec::new();
        let mut values: Vec<Vec<Option<f64>>> = vec![Vec::new(); channels.len()];

        for (row_idx, record) in records.enumerate() {
            let record = record.map_err(|err| ParserError::Csv {
                parser: Self::NAME,
                source: err,
            })?;
            let line_index = row_idx + 2;

            if record.iter().all(|field| field.trim().is_empty()) {
                continue;
            }
            if record.len() != channels.len() + 1 {
                return Err(ParserError::DataRow {
                    parser: Self::NAME,
                    line_index,
                    message: format!(
                        "expected {} columns but found {}",
                        channels.len() + 1,
                        record.len()
                    ),
                });
            }

            let timestamp = parse_required_f64(
                Self::NAME,
                record.get(0).unwrap_or(""),
                line_index,
                ANALOG_TIMESTAMP_HEADER,
            )?;
            if let Some(previous) = timestamps.last() {
                if timestamp < *previous {
                    return Err(ParserError::DataRow {
                        parser: Self::NAME,
                        line_index,
                        message: format!("timestamp {timestamp} precedes previous sample {previous}"),
                    });
                }
            }
            timestamps.push(timestamp);

            for (channel_idx, name) in channels.iter().enumerate() {
                let value = record.get(channel_idx + 1).unwrap_or("");
                values[channel_idx].push(parse_optional_f64(Self::NAME, value, line_index, name)?);
            }
        }

        if timestamps.is_empty() {
            return Err(ParserError::EmptyData { parser: Self::NAME });
        }

        let mut cols: Vec<Column> = Vec::with_capacity(channels.len() + 1);
        cols.push(Series::new(TIMESTAMP_COLUMN.into(), timestamps).into());
        for (name, data) in channels.iter().zip(values) {
            cols.push(Series::new(name.as_str().into(), data).into());
        }

        DataFrame::new(cols).map_err(|err| ParserError::Validation {
            parser: Self::NAME,
            message: format!("failed to build analog dataframe: {err}"),
        })
    }
}
