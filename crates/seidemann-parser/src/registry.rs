use std::fs;
use std::path::Path;

use polars::prelude::DataFrame;

use crate::errors::ParserError;

/// A line-oriented log format that parses into a single dataframe.
pub trait TextLogParser {
    fn name(&self) -> &'static str;
    fn parse(&self, content: &str) -> Result<DataFrame, ParserError>;
}

pub fn parse_log_file(
    parser: &dyn TextLogParser,
    path: impl AsRef<Path>,
) -> Result<DataFrame, ParserError> {
    let content = fs::read_to_string(path.as_ref())?;
    parser.parse(&content)
}
