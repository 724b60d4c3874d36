use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::UtcDateTime;

/// Typed value stored under a canonical field name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Timestamp(UtcDateTime),
    Text(String),
    Null,
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<UtcDateTime> {
        match self {
            Self::Timestamp(value) => Some(*value),
            _ => None,
        }
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// One canonical row.
pub type Record = BTreeMap<String, FieldValue>;

/// Canonical, provider-neutral output of a fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub records: Vec<Record>,
    pub source_name: String,
    pub fetched_at: UtcDateTime,
}

impl ResultSet {
    pub fn new(source_name: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            records,
            source_name: source_name.into(),
            fetched_at: UtcDateTime::now(),
        }
    }

    /// Result returned when no provider produced data.
    pub fn empty() -> Self {
        Self::new(String::new(), Vec::new())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Looks up `field` in the first record carrying `code`.
    pub fn value(&self, code: &str, field: &str) -> Option<&FieldValue> {
        self.records
            .iter()
            .find(|record| record.get("code").and_then(FieldValue::as_str) == Some(code))
            .and_then(|record| record.get(field))
    }
}
