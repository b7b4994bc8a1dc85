// crates/seidemann-core/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Source parsing failed: {0}")]
    Parser(#[from] seidemann_parser::ParserError),

    #[error("Polars operation failed: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("ZIP operation failed: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Failed to read .npy array: {0}")]
    NpyRead(#[from] ndarray_npy::ReadNpyError),

    #[error("Failed to write .npy array: {0}")]
    NpyWrite(#[from] ndarray_npy::WriteNpyError),

    #[error("Failed to map .npy array: {0}")]
    NpyView(#[from] ndarray_npy::ViewNpyError),

    #[error("{table} has no entry for code {code}")]
    UnresolvableCode { table: String, code: i64 },

    #[error("Required column '{0}' is missing")]
    MissingColumn(String),

    #[error("Column '{0}' would appear twice in the trial table")]
    DuplicateColumn(String),

    #[error("Column '{column}' has negative time {value} s after session alignment")]
    NegativeTime { column: String, value: f64 },

    #[error("Event log contains no events")]
    EmptyEventLog,

    #[error("No stream name registered for event type '{0}'")]
    UnknownEventType(String),

    #[error("Shape mismatch: {0}")]
    Shape(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid metadata: {0}")]
    Metadata(String),

    #[error("Container rejected data: {0}")]
    Container(String),
}

pub type Result<T> = std::result::Result<T, ConversionError>;
