use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A `code -> label` dictionary read from the trial structure header
/// (`Header.DEF.<NAME>` holds `label = code` pairs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeTable {
    name: String,
    labels: BTreeMap<i64, String>,
}

impl CodeTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
        }
    }

    /// Inserts a mapping, returning the label previously bound to `code`.
    pub fn insert(&mut self, code: i64, label: impl Into<String>) -> Option<String> {
        self.labels.insert(code, label.into())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self, code: i64) -> Option<&str> {
        self.labels.get(&code).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &str)> {
        self.labels.iter().map(|(code, label)| (*code, label.as_str()))
    }
}

impl fmt::Display for CodeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} codes)", self.name, self.labels.len())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionHeader {
    pub definitions: BTreeMap<String, CodeTable>,
    /// Type code per condition, indexed by condition number minus one.
    pub condition_types: Vec<i64>,
}

impl SessionHeader {
    pub fn definition(&self, name: &str) -> Option<&CodeTable> {
        self.definitions.get(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrialColumn {
    Numeric(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
    /// Field held sub-structs, cells or non-scalar arrays in at least one trial.
    Nested,
}

impl TrialColumn {
    pub fn is_nested(&self) -> bool {
        matches!(self, TrialColumn::Nested)
    }
}

/// Per-field columns of the trial struct array, in source field order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrialRecords {
    pub fields: Vec<(String, TrialColumn)>,
    pub trial_count: usize,
}

impl TrialRecords {
    pub fn column(&self, name: &str) -> Option<&TrialColumn> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, column)| column)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrialStructure {
    pub header: SessionHeader,
    pub trials: TrialRecords,
}
