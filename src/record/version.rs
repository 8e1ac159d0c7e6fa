//! Record versions
//!
//! One append to the data file: a live record or a tombstone.

use crate::error::{FlatError, Result};

use super::{Record, Value, DELETED};

/// A single appended version of a record
#[derive(Debug, Clone, PartialEq)]
pub enum RecordVersion {
    /// The current content of a record
    Live(Record),

    /// A superseded or logically deleted version
    Tombstone(Record),
}

impl RecordVersion {
    /// Record id carried by the version (validated on decode)
    pub fn id(&self) -> Option<u64> {
        self.record().id()
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, RecordVersion::Tombstone(_))
    }

    pub fn record(&self) -> &Record {
        match self {
            RecordVersion::Live(r) | RecordVersion::Tombstone(r) => r,
        }
    }

    pub fn into_record(self) -> Record {
        match self {
            RecordVersion::Live(r) | RecordVersion::Tombstone(r) => r,
        }
    }

    /// The live record, or `None` for a tombstone
    pub fn into_live(self) -> Option<Record> {
        match self {
            RecordVersion::Live(r) => Some(r),
            RecordVersion::Tombstone(_) => None,
        }
    }

    /// Serialize to one newline-terminated JSON line
    ///
    /// The `_deleted` marker is written from the variant, never from the
    /// record's own field.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.id().is_none() {
            return Err(FlatError::Decode(
                "refusing to encode a version without a positive id".to_string(),
            ));
        }

        let mut record = self.record().clone();
        record.insert(DELETED.to_string(), Value::Bool(self.is_tombstone()));

        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        Ok(line)
    }

    /// Parse one line (with or without its trailing newline)
    pub fn decode(line: &[u8]) -> Result<Self> {
        let line = line.strip_suffix(b"\n").unwrap_or(line);
        if line.is_empty() {
            return Err(FlatError::Decode("empty log entry".to_string()));
        }

        let mut record: Record = serde_json::from_slice(line)
            .map_err(|e| FlatError::Decode(format!("malformed log entry: {}", e)))?;

        if record.id().is_none() {
            return Err(FlatError::Decode(
                "log entry lacks a positive integer id".to_string(),
            ));
        }

        // The marker lives in the variant from here on
        let deleted = record.is_deleted();
        record.remove(DELETED);

        Ok(if deleted {
            RecordVersion::Tombstone(record)
        } else {
            RecordVersion::Live(record)
        })
    }
}
