use csv::{StringRecord, StringRecordsIter};

use crate::errors::ParserError;

pub(crate) fn next_header_row<R: std::io::Read>(
    parser: &'static str,
    records: &mut StringRecordsIter<'_, R>,
) -> Result<StringRecord, ParserError> {
    records
        .next()
        .ok_or(ParserError::FormatMismatch {
            parser,
            reason: "file missing column header row".to_string(),
        })?
        .map_err(|err| ParserError::Csv {
            parser,
            source: err,
        })
}

pub(crate) fn parse_required_f64(
    parser: &'static str,
    value: &str,
    line_index: usize,
    column: &str,
) -> Result<f64, ParserError> {
    parse_optional_f64(parser, value, line_index, column)?.ok_or_else(|| ParserError::DataRow {
        parser,
        line_index,
        message: format!("column '{column}' is empty"),
    })
}

pub(crate) fn parse_optional_f64(
    parser: &'static str,
    value: &str,
    line_index: usize,
    column: &str,
) -> Result<Option<f64>, ParserError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }

    trimmed
        .parse::<f64>()
        .map(Some)
        .map_err(|err| ParserError::DataRow {
            parser,
            line_index,
            message: format!("failed to parse column '{column}' as float: {err}"),
        })
}

/// Integer codes are sometimes exported as `3.0`; integral floats are accepted.
pub(crate) fn parse_required_i64(
    parser: &'static str,
    value: &str,
    line_index: usize,
    column: &str,
) -> Result<i64, ParserError> {
    let trimmed = value.trim();
    if let Ok(parsed) = trimmed.parse::<i64>() {
        return Ok(parsed);
    }

    match trimmed.parse::<f64>() {
        Ok(parsed) if parsed.is_finite() && parsed.fract() == 0.0 => Ok(parsed as i64),
        _ => Err(ParserError::DataRow {
            parser,
            line_index,
            message: format!("failed to parse column '{column}' as integer: '{trimmed}'"),
        }),
    }
}
