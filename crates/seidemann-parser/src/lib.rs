pub mod errors;
pub mod formats;
pub mod model;
mod registry;

pub use errors::ParserError;
pub use formats::{
    decode_trial_structure, read_trial_structure, AnalogLogParser, EventLogParser, MatFile,
    MatValue, StructArray,
};
pub use model::{CodeTable, SessionHeader, TrialColumn, TrialRecords, TrialStructure};
pub use registry::{parse_log_file, TextLogParser};

#[cfg(test)]
mod tests;
