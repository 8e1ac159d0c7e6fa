//! Table Module
//!
//! The per-table engine that coordinates the log, index and audit stores.
//!
//! ## Responsibilities
//! - insert/update/delete/select/find and their bulk variants
//! - Tombstone-then-append versioning with best-effort compensation
//! - Secondary index maintenance for changed fields only
//! - Compaction, backup, clearing, schema and index management
//! - Bounded in-memory read cache
//!
//! ## Record Lifecycle
//! ```text
//!            insert            update             delete
//!   absent ─────────► live ─────────► live ─────────► tombstoned
//!                                                        │
//!                                           compaction   ▼
//!                                                      absent
//! ```
//! A deleted id never becomes live again.
//!
//! ## Table Lock
//! ```text
//! writers (mutations, compaction, clear) ── exclusive ─┐
//!                                                      ├─ T_data.lock
//! readers (offset lookup + file read)    ── shared ────┘
//! ```
//! An offset is only meaningful together with the file it was taken from,
//! so resolving it and reading it happen under one hold of the lock.
//!
//! ## Write Sequence (update)
//! ```text
//! read current ─► append tombstone(current) ─► append live(new)
//!              ─► repoint primary ─► fix secondary ─► journal ─► cache
//! ```

mod bulk;
mod cache;
mod condition;
mod engine;
mod maintenance;

use std::path::{Path, PathBuf};

pub use bulk::BulkOutcome;
pub use cache::RecordCache;
pub use condition::{matches_all, Condition, Operator};
pub use engine::TableEngine;
pub use maintenance::CompactionReport;

/// Files belonging to one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePaths {
    /// `T_data`: append-only version log
    pub data: PathBuf,
    /// `T_index`: primary index document
    pub index: PathBuf,
    /// `T_log`: audit journal
    pub log: PathBuf,
    /// `T_schema`: persisted schema, if any
    pub schema: PathBuf,
    /// `T_data.lock`: table-wide lock; writers exclusive, readers shared
    pub lock: PathBuf,
}

impl TablePaths {
    pub fn new(dir: &Path, table: &str) -> Self {
        Self {
            data: dir.join(format!("{}_data", table)),
            index: dir.join(format!("{}_index", table)),
            log: dir.join(format!("{}_log", table)),
            schema: dir.join(format!("{}_schema", table)),
            lock: dir.join(format!("{}_data.lock", table)),
        }
    }
}

/// How a mutation updates the primary index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IndexWrite {
    /// Persist before returning (single-record operations)
    Immediate,
    /// Stage in memory; the batch commits once at the end
    Deferred,
}

/// Outcome of one update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UpdateOutcome {
    Updated,
    Unchanged,
    NotFound,
}
