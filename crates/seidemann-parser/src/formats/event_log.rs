use csv::StringRecord;
use polars::prelude::*;

use crate::errors::ParserError;
use crate::registry::TextLogParser;

use super::schema::{EVENT_LOG_COLUMNS, EVENT_LOG_HEADER};
use super::{next_header_row, parse_required_f64, parse_required_i64};

/// `Timestamp, Type, EventID, TrialNum` event logs written by the behavior rig.
pub struct EventLogParser;

impl Default for EventLogParser {
    fn default() -> Self {
        Self
    }
}

impl EventLogParser {
    const NAME: &'static str = "EVENT_LOG";

    fn validate_header(columns: &StringRecord) -> Result<(), ParserError> {
        if columns.len() != EVENT_LOG_HEADER.len() {
            return Err(ParserError::FormatMismatch {
                parser: Self::NAME,
                reason: format!(
                    "expected {} columns, found {}",
                    EVENT_LOG_HEADER.len(),
                    columns.len()
                ),
            });
        }
        for (idx, (found, expected)) in columns.iter().zip(EVENT_LOG_HEADER.iter()).enumerate() {
            if found.trim() != *expected {
                return Err(ParserError::InvalidHeader {
                    parser: Self::NAME,
                    row_index: 1,
                    message: format!("unexpected column '{found}' at position {idx}, expected '{expected}'"),
                });
            }
        }
        Ok(())
    }
}

impl TextLogParser for EventLogParser {
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
        Self::validate_header(&columns)?;

        let mut timestamps = Vec::new();
        let mut types = Vec::new();
        let mut event_ids = Vec::new();
        let mut trial_nums = Vec::new();

        for (row_idx, record) in records.enumerate() {
            let record = record.map_err(|err| ParserError::Csv {
                parser: Self::NAME,
                source: err,
            })?;
            let line_index = row_idx + 2; // header row is line 1

            if record.iter().all(|field| field.trim().is_empty()) {
                continue;
            }
            if record.len() != EVENT_LOG_HEADER.len() {
                return Err(ParserError::DataRow {
                    parser: Self::NAME,
                    line_index,
                    message: format!(
                        "expected {} columns but found {}",
                        EVENT_LOG_HEADER.len(),
                        record.len()
                    ),
                });
            }

            let field = |idx: usize| record.get(idx).unwrap_or("");
            timestamps.push(parse_required_f64(
                Self::NAME,
                field(0),
                line_index,
                EVENT_LOG_HEADER[0],
            )?);
            types.push(parse_required_i64(
                Self::NAME,
                field(1),
                line_index,
                EVENT_LOG_HEADER[1],
            )?);
            event_ids.push(parse_required_i64(
                Self::NAME,
                field(2),
                line_index,
                EVENT_LOG_HEADER[2],
            )?);
            trial_nums.push(parse_required_i64(
                Self::NAME,
                field(3),
                line_index,
                EVENT_LOG_HEADER[3],
            )?);
        }

        if timestamps.is_empty() {
            return Err(ParserError::EmptyData { parser: Self::NAME });
        }

        DataFrame::new(vec![
            Series::new(EVENT_LOG_COLUMNS[0].into(), timestamps).into(),
            Series::new(EVENT_LOG_COLUMNS[1].into(), types).into(),
            Series::new(EVENT_LOG_COLUMNS[2].into(), event_ids).into(),
            Series::new(EVENT_LOG_COLUMNS[3].into(), trial_nums).into(),
        ])
        .map_err(|err| ParserError::Validation {
            parser: Self::NAME,
            message: format!("failed to build event dataframe: {err}"),
        })
    }
}
