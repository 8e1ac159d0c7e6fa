//! Find conditions
//!
//! `(field, operator, value)` predicates evaluated against stored records.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::{FlatError, Result};
use crate::record::{Record, Value};

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl Operator {
    /// Whether a comparison outcome satisfies the operator
    ///
    /// `None` (incomparable) only satisfies `!=`.
    fn accepts(self, ordering: Option<Ordering>) -> bool {
        match (self, ordering) {
            (Operator::Ne, ord) => ord != Some(Ordering::Equal),
            (_, None) => false,
            (Operator::Eq, Some(ord)) => ord == Ordering::Equal,
            (Operator::Gt, Some(ord)) => ord == Ordering::Greater,
            (Operator::Lt, Some(ord)) => ord == Ordering::Less,
            (Operator::Ge, Some(ord)) => ord != Ordering::Less,
            (Operator::Le, Some(ord)) => ord != Ordering::Greater,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Ge => ">=",
            Operator::Le => "<=",
        }
    }
}

impl FromStr for Operator {
    type Err = FlatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "=" | "==" => Ok(Operator::Eq),
            "!=" | "<>" => Ok(Operator::Ne),
            ">" => Ok(Operator::Gt),
            "<" => Ok(Operator::Lt),
            ">=" => Ok(Operator::Ge),
            "<=" => Ok(Operator::Le),
            other => Err(FlatError::Query(format!("unsupported operator {:?}", other))),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single predicate
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: Operator,
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// `field = value`
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Operator::Eq, value)
    }

    /// Parse the operator from its textual form (`=`, `!=`, `>`, ...)
    pub fn parse(field: impl Into<String>, op: &str, value: impl Into<Value>) -> Result<Self> {
        Ok(Self::new(field, op.parse()?, value))
    }

    /// Evaluate against a record
    ///
    /// A missing field satisfies only `!=`. Coercion follows the stored
    /// value's type (see [`Value::compare_stored`]).
    pub fn matches(&self, record: &Record) -> bool {
        let ordering = record
            .get(&self.field)
            .and_then(|stored| Value::compare_stored(stored, &self.value));
        self.op.accepts(ordering)
    }
}

/// Whether `record` satisfies every condition
pub fn matches_all(conditions: &[Condition], record: &Record) -> bool {
    conditions.iter().all(|c| c.matches(record))
}
