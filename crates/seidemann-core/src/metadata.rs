// crates/seidemann-core/src/metadata.rs

use std::fs;
use std::path::Path;

use blake3::Hasher;
use chrono::DateTime;
use serde_json::{Map, Value};

use crate::error::{ConversionError, Result};

/// Merges `update` into `base`. Objects merge key by key; any other value,
/// lists included, replaces what was there.
pub fn deep_update(base: &mut Value, update: Value) {
    match (base, update) {
        (Value::Object(base_map), Value::Object(update_map)) => {
            for (key, value) in update_map {
                match base_map.get_mut(&key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        deep_update(existing, value)
                    }
                    _ => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, update) => *base = update,
    }
}

pub fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(text) => Value::String(text),
        toml::Value::Integer(number) => Value::from(number),
        toml::Value::Float(number) => Value::from(number),
        toml::Value::Boolean(flag) => Value::Bool(flag),
        toml::Value::Datetime(datetime) => Value::String(datetime.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(key, value)| (key, toml_to_json(value)))
                .collect(),
        ),
    }
}

pub fn load_metadata_file(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)?;
    let table: toml::Table = toml::from_str(&content)?;
    Ok(toml_to_json(toml::Value::Table(table)))
}

pub fn file_hash(path: &Path) -> Result<String> {
    let mut hasher = Hasher::new();
    let mut file = fs::File::open(path)?;
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// `NWBFile` fields and source-file hashes known before any user metadata.
pub fn base_metadata(
    session_id: &str,
    session_description: Option<&str>,
    sources: &[(String, String)],
) -> Value {
    let mut nwbfile = Map::new();
    nwbfile.insert("session_id".into(), Value::from(session_id));
    nwbfile.insert(
        "session_description".into(),
        Value::from(session_description.unwrap_or(session_id)),
    );

    let hashes: Map<String, Value> = sources
        .iter()
        .map(|(path, hash)| (path.clone(), Value::from(hash.as_str())))
        .collect();

    let mut root = Map::new();
    root.insert("NWBFile".into(), Value::Object(nwbfile));
    root.insert("SourceFiles".into(), Value::Object(hashes));
    Value::Object(root)
}

/// Checks what the bundle needs before anything is written.
pub fn validate_metadata(metadata: &Value) -> Result<()> {
    let nwbfile = metadata
        .get("NWBFile")
        .and_then(Value::as_object)
        .ok_or_else(|| ConversionError::Metadata("missing NWBFile section".to_string()))?;

    let start = nwbfile
        .get("session_start_time")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            ConversionError::Metadata("NWBFile.session_start_time is required".to_string())
        })?;
    DateTime::parse_from_rfc3339(start).map_err(|err| {
        ConversionError::Metadata(format!(
            "NWBFile.session_start_time '{start}' is not RFC 3339: {err}"
        ))
    })?;

    match nwbfile.get("session_id").and_then(Value::as_str) {
        Some(id) if !id.trim().is_empty() => Ok(()),
        _ => Err(ConversionError::Metadata(
            "NWBFile.session_id must be a non-empty string".to_string(),
        )),
    }
}
