use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("{parser} format mismatch: {reason}")]
    FormatMismatch {
        parser: &'static str,
        reason: String,
    },

    #[error("{parser} header row {row_index} invalid: {message}")]
    InvalidHeader {
        parser: &'static str,
        row_index: usize,
        message: String,
    },

    #[error("{parser} CSV error: {source}")]
    Csv {
        parser: &'static str,
        #[source]
        source: csv::Error,
    },

    #[error("{parser} data row {line_index} invalid: {message}")]
    DataRow {
        parser: &'static str,
        line_index: usize,
        message: String,
    },

    #[error("{parser} validation error: {message}")]
    Validation {
        parser: &'static str,
        message: String,
    },

    #[error("{parser} file did not contain any data rows")]
    EmptyData { parser: &'static str },

    #[error("unsupported MAT-file version: {0}")]
    UnsupportedMatVersion(String),

    #[error("MAT element truncated at byte {offset}: needed {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("unsupported MAT data type {0}")]
    UnsupportedDataType(u32),

    #[error("failed to inflate compressed MAT element: {0}")]
    Decompress(#[source] std::io::Error),

    #[error("MAT-file has no variable named '{0}'")]
    MissingVariable(String),

    #[error("struct '{parent}' has no field '{field}'")]
    MissingField { parent: String, field: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
