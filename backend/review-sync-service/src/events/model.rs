use crate::error::SinkError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// How a change event is applied to the index.
///
/// The binlog feed only distinguishes inserts from everything else; any
/// non-`INSERT` type (including `DELETE`) is applied as a partial merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Full create-or-replace of the document.
    Insert,
    /// Partial create-or-update of the document.
    Update,
}

impl Operation {
    pub fn classify(tag: &str) -> Self {
        if tag == "INSERT" {
            Operation::Insert
        } else {
            Operation::Update
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single field value inside a changed row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Number(value.into())
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

/// One changed row: field name to value, serialized as a flat JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowPayload(BTreeMap<String, FieldValue>);

impl RowPayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly for constructing rows by hand.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.0.get(field)
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Extract the document key from `key_field`.
    ///
    /// Strings are used as-is when non-blank; integers are rendered in decimal.
    /// Anything else cannot identify a document.
    pub fn document_key(&self, key_field: &str) -> Result<String, SinkError> {
        match self.0.get(key_field) {
            None | Some(FieldValue::Null) => Err(SinkError::InvalidDocument(format!(
                "row has no `{key_field}` field"
            ))),
            Some(FieldValue::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
            Some(FieldValue::Number(n)) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
            Some(other) => Err(SinkError::InvalidDocument(format!(
                "`{key_field}` cannot be used as a document key: {other:?}"
            ))),
        }
    }
}

impl FromIterator<(String, FieldValue)> for RowPayload {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A decoded binlog message.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub operation: Operation,
    /// DDL statements are never applied to the index.
    pub is_schema_change: bool,
    pub database: String,
    pub table: String,
    /// The type tag as it arrived (`INSERT`, `UPDATE`, `DELETE`, ...).
    pub raw_type: String,
    pub rows: Vec<RowPayload>,
}
