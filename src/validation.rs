//! Validation rules
//!
//! Stateless checks run before any write: identifier syntax for table and
//! field names, and schema conformance for record payloads.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{FlatError, Result};
use crate::record::{Record, Value};

/// Longest accepted table or field name
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// Check that `name` is a valid identifier: `[A-Za-z_][A-Za-z0-9_]*`,
/// at most [`MAX_IDENTIFIER_LEN`] bytes.
///
/// Identifiers end up in file names, so nothing else is allowed.
pub fn validate_identifier(kind: &'static str, name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_head = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    let valid_tail = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid_head && valid_tail && name.len() <= MAX_IDENTIFIER_LEN {
        Ok(())
    } else {
        Err(FlatError::InvalidIdentifier {
            kind,
            name: name.to_string(),
        })
    }
}

// =============================================================================
// Field Types
// =============================================================================

/// Expected type of a schema field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    /// Accepts integers as well
    Float,
    Boolean,
    Map,
    List,
}

impl FieldType {
    /// Whether `value` conforms to this type
    pub fn matches(self, value: &Value) -> bool {
        match (self, value) {
            (FieldType::String, Value::String(_)) => true,
            (FieldType::Integer, Value::Int(_)) => true,
            (FieldType::Float, Value::Float(_) | Value::Int(_)) => true,
            (FieldType::Boolean, Value::Bool(_)) => true,
            (FieldType::Map, Value::Map(_)) => true,
            (FieldType::List, Value::List(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::Map => "map",
            FieldType::List => "list",
        };
        f.write_str(name)
    }
}

impl FromStr for FieldType {
    type Err = FlatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "string" | "str" => Ok(FieldType::String),
            "integer" | "int" => Ok(FieldType::Integer),
            "float" | "double" | "number" => Ok(FieldType::Float),
            "boolean" | "bool" => Ok(FieldType::Boolean),
            "map" | "array" | "object" => Ok(FieldType::Map),
            "list" => Ok(FieldType::List),
            other => Err(FlatError::Validation(format!("unknown field type {:?}", other))),
        }
    }
}

// =============================================================================
// Schema
// =============================================================================

/// Optional per-table schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Fields that must be present (and non-null)
    #[serde(default)]
    pub required: Vec<String>,

    /// Expected type per field; only checked when the field is present
    #[serde(default)]
    pub field_types: BTreeMap<String, FieldType>,
}

impl Schema {
    pub fn new(required: Vec<String>, field_types: BTreeMap<String, FieldType>) -> Self {
        Self {
            required,
            field_types,
        }
    }

    /// Check field names of the schema itself
    pub fn check_names(&self) -> Result<()> {
        for field in self.required.iter().chain(self.field_types.keys()) {
            validate_identifier("field", field)?;
        }
        Ok(())
    }

    /// Check a record payload against the schema
    pub fn validate(&self, record: &Record) -> Result<()> {
        for field in &self.required {
            match record.get(field) {
                None | Some(Value::Null) => return Err(FlatError::MissingField(field.clone())),
                Some(_) => {}
            }
        }

        for (field, expected) in &self.field_types {
            if let Some(value) = record.get(field) {
                if !value.is_null() && !expected.matches(value) {
                    return Err(FlatError::FieldType {
                        field: field.clone(),
                        expected: *expected,
                        found: value.type_name(),
                    });
                }
            }
        }

        Ok(())
    }
}
