//! Record Module
//!
//! Typed records and the line codec used by the version log.
//!
//! ## Responsibilities
//! - Field-name → tagged value mapping (`Record`, `Value`)
//! - Engine-managed reserved fields (`id`, timestamps, tombstone marker)
//! - Encoding a `RecordVersion` as one self-delimited log line
//!
//! ## Line Format
//! ```text
//! {"_deleted":false,"created_at":1700000000000,"id":7,"title":"hello"}\n
//! ```
//! One JSON object per append. A line without a positive integer `id`
//! is rejected on decode.

mod value;
mod version;

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

pub use value::Value;
pub use version::RecordVersion;

// =============================================================================
// Reserved Fields
// =============================================================================

/// Record identifier, unique per table
pub const ID: &str = "id";

/// Insertion timestamp (unix millis)
pub const CREATED_AT: &str = "created_at";

/// Last modification timestamp (unix millis), set by update only
pub const UPDATED_AT: &str = "updated_at";

/// Tombstone timestamp (unix millis), set by delete
pub const DELETED_AT: &str = "deleted_at";

/// Tombstone marker
pub const DELETED: &str = "_deleted";

/// Fields managed by the engine; callers never supply them
pub const RESERVED_FIELDS: [&str; 5] = [ID, CREATED_AT, UPDATED_AT, DELETED_AT, DELETED];

/// Whether `field` is managed by the engine
pub fn is_reserved(field: &str) -> bool {
    RESERVED_FIELDS.contains(&field)
}

// =============================================================================
// Record
// =============================================================================

/// A record: field name → value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style field setter
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Set a field
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    /// The record id, if present and a positive integer
    pub fn id(&self) -> Option<u64> {
        self.0.get(ID).and_then(Value::as_u64).filter(|id| *id > 0)
    }

    /// Whether the tombstone marker is set
    pub fn is_deleted(&self) -> bool {
        matches!(self.0.get(DELETED), Some(Value::Bool(true)))
    }

    /// Fields supplied by callers (reserved fields excluded)
    pub fn user_fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter().filter(|(k, _)| !is_reserved(k))
    }

    /// Drop every reserved field
    pub fn without_reserved(mut self) -> Self {
        self.0.retain(|k, _| !is_reserved(k));
        self
    }

    /// Field-level equality ignoring engine-managed fields
    pub fn same_content(&self, other: &Record) -> bool {
        self.user_fields().eq(other.user_fields())
    }

    /// Copy of the record restricted to `fields`
    pub fn project(&self, fields: &[String]) -> Record {
        fields
            .iter()
            .filter_map(|f| self.0.get(f).map(|v| (f.clone(), v.clone())))
            .collect()
    }

    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.0
    }
}

impl Deref for Record {
    type Target = BTreeMap<String, Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Record {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<BTreeMap<String, Value>> for Record {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Build a [`Record`] from `field => value` pairs
///
/// ```
/// let post = flatstore::record! { "title" => "hello", "views" => 3 };
/// assert_eq!(post.len(), 2);
/// ```
#[macro_export]
macro_rules! record {
    () => {
        $crate::record::Record::new()
    };
    ($($field:expr => $value:expr),+ $(,)?) => {{
        let mut record = $crate::record::Record::new();
        $( record.set($field, $value); )+
        record
    }};
}
