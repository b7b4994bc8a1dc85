mod analog_log;
mod common;
mod event_log;
pub mod mat;
pub mod schema;
mod trial_structure;

pub use analog_log::AnalogLogParser;
pub use event_log::EventLogParser;
pub use mat::{Endian, MatFile, MatValue, StructArray};
pub use trial_structure::{
    decode_header, decode_trial_structure, decode_trials, read_trial_structure,
};

pub(crate) use common::{next_header_row, parse_optional_f64, parse_required_f64, parse_required_i64};
