pub const EVENT_LOG_HEADER: [&str; 4] = ["Timestamp", "Type", "EventID", "TrialNum"];

pub const EVENT_LOG_COLUMNS: [&str; 4] = ["timestamp_ms", "type", "event_id", "trial_num"];

pub const ANALOG_TIMESTAMP_HEADER: &str = "Timestamp";

pub const TIMESTAMP_COLUMN: &str = "timestamp_ms";
