//! Audit Module
//!
//! Append-only journal of every mutation, kept beside each table.
//!
//! ## Responsibilities
//! - One JSON line per insert/update/delete/clear
//! - Paginated reads for operators and replay tooling
//! - Rotation: optional timestamped copy, then truncate
//!
//! The engine never reads the journal itself; it is an external audit
//! trail, not a recovery log.
//!
//! ## Line Format
//! ```text
//! {"ts":1700000000000,"action":"update","id":7,"data":{...}}\n
//! ```

mod journal;

use serde::{Deserialize, Serialize};

use crate::record::Record;

pub use journal::AuditLog;

/// Kind of journalled mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Insert,
    Update,
    Delete,
    Clear,
}

/// A single journal line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Timestamp (unix millis) when the entry was written
    pub ts: u64,

    pub action: AuditAction,

    /// Record affected, if the action targets one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    /// Record content after the mutation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Record>,
}
