//! Header dictionaries resolved once per session.

use std::fmt;

use seidemann_parser::{CodeTable, SessionHeader};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConversionError, Result};

/// Names of the `Header.DEF` dictionaries used for code resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefinitionNames {
    pub outcome: String,
    pub event_type: String,
    pub event_id: String,
}

impl Default for DefinitionNames {
    fn default() -> Self {
        Self {
            outcome: "OUTCOME".to_string(),
            event_type: "EVENTTYPE".to_string(),
            event_id: "EVENTID".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    Blank,
    Target,
    VisualStimulus,
}

impl ConditionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::Blank => "blank",
            ConditionType::Target => "target",
            ConditionType::VisualStimulus => "visual_stimulus",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<i64> for ConditionType {
    type Error = ConversionError;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            0 => Ok(ConditionType::Blank),
            1 => Ok(ConditionType::Target),
            2 => Ok(ConditionType::VisualStimulus),
            code => Err(ConversionError::UnresolvableCode {
                table: "TypeCond".to_string(),
                code,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Codebook {
    outcomes: CodeTable,
    event_types: CodeTable,
    event_ids: CodeTable,
    conditions: Vec<ConditionType>,
}

impl Codebook {
    pub fn from_header(header: &SessionHeader, names: &DefinitionNames) -> Result<Self> {
        let table = |name: &str| match header.definition(name) {
            Some(table) => table.clone(),
            None => {
                warn!(dictionary = name, "trial header defines no such dictionary");
                CodeTable::new(name)
            }
        };

        let conditions = header
            .condition_types
            .iter()
            .map(|code| ConditionType::try_from(*code))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            outcomes: table(&names.outcome),
            event_types: table(&names.event_type),
            event_ids: table(&names.event_id),
            conditions,
        })
    }

    pub fn outcome_label(&self, code: i64) -> Result<String> {
        resolve(&self.outcomes, code)
    }

    pub fn event_type_label(&self, code: i64) -> Result<String> {
        resolve(&self.event_types, code)
    }

    pub fn event_id_label(&self, code: i64) -> Result<String> {
        resolve(&self.event_ids, code)
    }

    /// `CurrCond` is 1-based into the header's condition list.
    pub fn condition_label(&self, curr_cond: i64) -> Result<&'static str> {
        usize::try_from(curr_cond - 1)
            .ok()
            .and_then(|idx| self.conditions.get(idx))
            .map(ConditionType::as_str)
            .ok_or(ConversionError::UnresolvableCode {
                table: "Conditions".to_string(),
                code: curr_cond,
            })
    }

    pub fn conditions(&self) -> &[ConditionType] {
        &self.conditions
    }
}

fn resolve(table: &CodeTable, code: i64) -> Result<String> {
    table
        .label(code)
        .map(str::to_lowercase)
        .ok_or_else(|| ConversionError::UnresolvableCode {
            table: table.name().to_string(),
            code,
        })
}

/// Codes stored as floats must be integral to be looked up.
pub(crate) fn integral_code(table: &str, value: f64) -> Result<i64> {
    if value.is_finite() && value.fract() == 0.0 {
        Ok(value as i64)
    } else {
        Err(ConversionError::UnresolvableCode {
            table: table.to_string(),
            code: value as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> SessionHeader {
        let mut outcomes = CodeTable::new("OUTCOME");
        outcomes.insert(1, "CORRECT");
        outcomes.insert(2, "Broke_Fixation");
        let mut header = SessionHeader::default();
        header.definitions.insert("OUTCOME".into(), outcomes);
        header.condition_types = vec![0, 2];
        header
    }

    #[test]
    fn labels_are_lowercased() {
        let codebook = Codebook::from_header(&header(), &DefinitionNames::default()).unwrap();
        assert_eq!(codebook.outcome_label(2).unwrap(), "broke_fixation");
    }

    #[test]
    fn unknown_codes_fail() {
        let codebook = Codebook::from_header(&header(), &DefinitionNames::default()).unwrap();
        assert!(matches!(
            codebook.outcome_label(9),
            Err(ConversionError::UnresolvableCode { code: 9, .. })
        ));
        assert!(codebook.event_type_label(1).is_err());
    }

    #[test]
    fn conditions_are_one_based() {
        let codebook = Codebook::from_header(&header(), &DefinitionNames::default()).unwrap();
        assert_eq!(codebook.condition_label(1).unwrap(), "blank");
        assert_eq!(codebook.condition_label(2).unwrap(), "visual_stimulus");
        assert!(codebook.condition_label(0).is_err());
        assert!(codebook.condition_label(3).is_err());
    }

    #[test]
    fn unknown_condition_type_aborts() {
        let mut bad = header();
        bad.condition_types.push(7);
        assert!(Codebook::from_header(&bad, &DefinitionNames::default()).is_err());
    }
}
