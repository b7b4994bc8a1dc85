use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::ParserError;
use crate::model::{CodeTable, SessionHeader, TrialColumn, TrialRecords, TrialStructure};

use super::mat::{MatFile, MatValue, StructArray};

const PARSER: &str = "TRIAL_STRUCTURE";

/// Reads `variable` (usually `TS`) from a MAT-file and decodes it.
pub fn read_trial_structure(
    path: impl AsRef<Path>,
    variable: &str,
) -> Result<TrialStructure, ParserError> {
    let mat = MatFile::open(path)?;
    decode_trial_structure(mat.variable(variable)?)
}

pub fn decode_trial_structure(value: &MatValue) -> Result<TrialStructure, ParserError> {
    let header = value.require_field("TS", "Header")?;
    let trials = value.require_field("TS", "Trial")?;

    Ok(TrialStructure {
        header: decode_header(header)?,
        trials: decode_trials(trials)?,
    })
}

pub fn decode_header(header: &MatValue) -> Result<SessionHeader, ParserError> {
    let mut definitions = BTreeMap::new();
    if let Some(def) = header.field("DEF").and_then(MatValue::as_struct) {
        for (idx, name) in def.field_names.iter().enumerate() {
            let Some(entry) = def.elements.first().and_then(|values| values.get(idx)) else {
                continue;
            };
            if let Some(table) = decode_code_table(name, entry)? {
                definitions.insert(name.clone(), table);
            }
        }
    }

    let condition_types = match header.field("Conditions") {
        Some(conditions) => decode_condition_types(conditions)?,
        None => Vec::new(),
    };

    Ok(SessionHeader {
        definitions,
        condition_types,
    })
}

/// `label = code` scalar fields become one table; anything else is not a dictionary.
fn decode_code_table(name: &str, value: &MatValue) -> Result<Option<CodeTable>, ParserError> {
    let Some(entries) = value.as_struct() else {
        return Ok(None);
    };
    if entries.len() != 1 {
        return Ok(None);
    }

    let mut table = CodeTable::new(name);
    for (idx, label) in entries.field_names.iter().enumerate() {
        let Some(code) = entries.elements[0].get(idx).and_then(MatValue::as_scalar) else {
            return Ok(None);
        };
        let code = integral_code(code).ok_or_else(|| ParserError::Validation {
            parser: PARSER,
            message: format!("{name}.{label} has non-integral code {code}"),
        })?;
        if let Some(previous) = table.insert(code, label.clone()) {
            return Err(ParserError::Validation {
                parser: PARSER,
                message: format!("{name} maps code {code} to both '{previous}' and '{label}'"),
            });
        }
    }
    Ok(Some(table))
}

fn decode_condition_types(conditions: &MatValue) -> Result<Vec<i64>, ParserError> {
    let array = conditions.as_struct().ok_or_else(|| ParserError::Validation {
        parser: PARSER,
        message: format!("Header.Conditions is a {}, expected struct", conditions.kind()),
    })?;

    let mut types = Vec::new();
    for element in 0..array.len() {
        let value = array
            .get(element, "TypeCond")
            .ok_or_else(|| ParserError::MissingField {
                parent: "Header.Conditions".to_string(),
                field: "TypeCond".to_string(),
            })?;
        let values: &[f64] = match value {
            MatValue::Numeric { data, .. } => data.as_slice(),
            MatValue::Empty => &[],
            other => {
                return Err(ParserError::Validation {
                    parser: PARSER,
                    message: format!("TypeCond is a {}, expected numeric", other.kind()),
                })
            }
        };
        for raw in values {
            let code = integral_code(*raw).ok_or_else(|| ParserError::Validation {
                parser: PARSER,
                message: format!("TypeCond holds non-integral value {raw}"),
            })?;
            types.push(code);
        }
    }
    Ok(types)
}

fn integral_code(value: f64) -> Option<i64> {
    if value.is_finite() && value.fract() == 0.0 {
        Some(value as i64)
    } else {
        None
    }
}

/// Trials come either as a struct array or as a cell array of scalar structs.
pub fn decode_trials(value: &MatValue) -> Result<TrialRecords, ParserError> {
    match value {
        MatValue::Struct(array) => Ok(records_from_struct_array(array)),
        MatValue::Cell { cells, .. } => {
            let mut field_names: Vec<String> = Vec::new();
            for cell in cells {
                let trial = cell
                    .as_struct()
                    .filter(|s| s.len() == 1)
                    .ok_or_else(|| ParserError::Validation {
                        parser: PARSER,
                        message: format!("trial cell holds a {}, expected scalar struct", cell.kind()),
                    })?;
                for name in &trial.field_names {
                    if !field_names.contains(name) {
                        field_names.push(name.clone());
                    }
                }
            }

            let elements = cells
                .iter()
                .filter_map(MatValue::as_struct)
                .map(|trial| {
                    field_names
                        .iter()
                        .map(|name| trial.get(0, name).cloned().unwrap_or(MatValue::Empty))
                        .collect()
                })
                .collect();
            Ok(records_from_struct_array(&StructArray::from_records(
                field_names,
                elements,
            )))
        }
        MatValue::Empty => Err(ParserError::EmptyData { parser: PARSER }),
        other => Err(ParserError::Validation {
            parser: PARSER,
            message: format!("Trial is a {}, expected struct array", other.kind()),
        }),
    }
}

enum Cell<'a> {
    Missing,
    Number(f64),
    Text(&'a str),
    Nested,
}

fn classify(value: &MatValue) -> Cell<'_> {
    match value {
        MatValue::Empty => Cell::Missing,
        MatValue::Numeric { data, .. } if data.len() == 1 => Cell::Number(data[0]),
        MatValue::Char { text, .. } => Cell::Text(text.as_str()),
        _ => Cell::Nested,
    }
}

fn records_from_struct_array(array: &StructArray) -> TrialRecords {
    let trial_count = array.len();
    let mut fields = Vec::with_capacity(array.field_names.len());

    for (idx, name) in array.field_names.iter().enumerate() {
        let cells: Vec<Cell<'_>> = array
            .elements
            .iter()
            .map(|values| values.get(idx).map(classify).unwrap_or(Cell::Missing))
            .collect();

        let column = if cells.iter().any(|c| matches!(c, Cell::Nested)) {
            TrialColumn::Nested
        } else if cells.iter().any(|c| matches!(c, Cell::Text(_))) {
            TrialColumn::Text(
                cells
                    .iter()
                    .map(|c| match c {
                        Cell::Text(text) => Some(text.to_string()),
                        Cell::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect(),
            )
        } else {
            TrialColumn::Numeric(
                cells
                    .iter()
                    .map(|c| match c {
                        Cell::Number(n) => Some(*n),
                        _ => None,
                    })
                    .collect(),
            )
        };
        fields.push((name.clone(), column));
    }

    TrialRecords {
        fields,
        trial_count,
    }
}
