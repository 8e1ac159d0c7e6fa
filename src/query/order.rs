//! Result ordering

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::FlatError;
use crate::record::{Record, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortDirection {
    type Err = FlatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(FlatError::Query(format!("unknown sort direction {:?}", other))),
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => f.write_str("asc"),
            SortDirection::Desc => f.write_str("desc"),
        }
    }
}

/// Ascending order of two records by `field`
///
/// Missing (or null) values sort first. Two values that both read as
/// numbers compare numerically; anything else compares by string form.
pub fn compare_by_field(a: &Record, b: &Record, field: &str) -> Ordering {
    let present = |r: &Record| r.get(field).filter(|v| !v.is_null()).cloned();
    match (present(a), present(b)) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => compare_values(&x, &y),
    }
}

fn compare_values(x: &Value, y: &Value) -> Ordering {
    match (numeric(x), numeric(y)) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        _ => x.to_string().cmp(&y.to_string()),
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}
