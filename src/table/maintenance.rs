//! Table Maintenance
//!
//! Compaction, secondary index management, schema, backup and clearing.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::audit::AuditAction;
use crate::error::Result;
use crate::fs::{copy_into, write_atomic};
use crate::index::IndexStore;
use crate::metrics::Operation;
use crate::record::Record;
use crate::validation::{FieldType, Schema};

use super::TableEngine;

/// Summary of one compaction
#[derive(Debug, Clone)]
pub struct CompactionReport {
    pub table: String,
    /// Live records in the rewritten file
    pub records_retained: usize,
    /// Versions read from the old file
    pub versions_scanned: u64,
    /// Superseded and deleted versions removed
    pub versions_dropped: u64,
    pub bytes_before: u64,
    pub bytes_after: u64,
    /// Kept pre-compaction snapshot, if configured
    pub backup: Option<PathBuf>,
    pub elapsed: Duration,
}

impl CompactionReport {
    pub fn bytes_reclaimed(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

impl TableEngine {
    // =========================================================================
    // Compaction
    // =========================================================================

    /// Rewrite the data file keeping only live records, then rebuild every
    /// index from the result
    pub fn compact(&self) -> Result<CompactionReport> {
        let started = Instant::now();
        let _write_guard = self.lock_writes()?;
        let mut index = self.index.lock();

        index.commit()?;
        let outcome = self.log.compact()?;

        // Dropped ids stay allocated
        index.raise_counter(outcome.highest_id)?;

        // Offsets changed for every record; rebuild before anyone reads
        self.cache.lock().clear();
        index.rebuild_primary(outcome.offsets())?;
        self.sync_cache(&mut index)?;
        for field in index.indexed_fields()? {
            let buckets = buckets_for(&field, outcome.entries.iter().map(|e| (e.id, &e.record)));
            index.rebuild_secondary(&field, buckets)?;
        }

        let records_retained = outcome.entries.len();
        let report = CompactionReport {
            table: self.name.clone(),
            records_retained,
            versions_scanned: outcome.versions_scanned,
            versions_dropped: outcome.versions_scanned.saturating_sub(records_retained as u64),
            bytes_before: outcome.bytes_before,
            bytes_after: outcome.bytes_after,
            backup: outcome.backup,
            elapsed: started.elapsed(),
        };

        self.metrics
            .record_operation(&self.name, Operation::Compact, report.elapsed);
        Ok(report)
    }

    // =========================================================================
    // Secondary Indexes
    // =========================================================================

    /// Create a secondary index on `field` and fill it from live records
    ///
    /// Returns false if the index already existed.
    pub fn create_index(&self, field: &str) -> Result<bool> {
        let _write_guard = self.lock_writes()?;
        let mut index = self.index.lock();

        if !index.create_index(field)? {
            return Ok(false);
        }

        let live = self.live_records(&mut index)?;
        let buckets = buckets_for(field, live.iter().map(|(id, record)| (*id, record)));
        index.rebuild_secondary(field, buckets)?;

        tracing::info!("{}: indexed {} records on {:?}", self.name, live.len(), field);
        Ok(true)
    }

    /// Drop the secondary index on `field`; false if there was none
    pub fn drop_index(&self, field: &str) -> Result<bool> {
        let _write_guard = self.lock_writes()?;
        self.index.lock().drop_index(field)
    }

    // =========================================================================
    // Schema
    // =========================================================================

    /// Set and persist the schema checked by subsequent writes
    ///
    /// Existing records are not re-validated.
    pub fn set_schema(
        &self,
        required: Vec<String>,
        field_types: BTreeMap<String, FieldType>,
    ) -> Result<()> {
        let schema = Schema::new(required, field_types);
        schema.check_names()?;

        let bytes = serde_json::to_vec_pretty(&schema)?;
        let _write_guard = self.lock_writes()?;
        write_atomic(&self.paths.schema, &bytes, self.sync)?;
        *self.schema.write() = Some(schema);

        tracing::info!("{}: schema updated", self.name);
        Ok(())
    }

    /// Current schema, if any
    pub fn schema(&self) -> Option<Schema> {
        self.schema.read().clone()
    }

    /// Remove the schema; writes are no longer checked
    pub fn clear_schema(&self) -> Result<()> {
        let _write_guard = self.lock_writes()?;
        match fs::remove_file(&self.paths.schema) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        *self.schema.write() = None;
        Ok(())
    }

    // =========================================================================
    // Backup & Clear
    // =========================================================================

    /// Copy every file of the table into `dir`
    pub fn backup(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let _write_guard = self.lock_writes()?;
        let mut index = self.index.lock();
        index.commit()?;

        let mut copied = Vec::new();
        copied.extend(self.log.backup_to(dir)?);
        copied.extend(index.backup_to(dir)?);
        copied.extend(self.audit.backup_to(dir)?);
        if self.paths.schema.exists() {
            copied.extend(copy_into(&self.paths.schema, dir)?);
        }

        tracing::info!("{}: backed up {} files to {:?}", self.name, copied.len(), dir);
        Ok(copied)
    }

    /// Remove every record
    ///
    /// Ids keep counting from where they were; indexes stay declared but
    /// empty.
    pub fn clear(&self) -> Result<()> {
        let _write_guard = self.lock_writes()?;
        let mut index = self.index.lock();

        index.discard_pending();
        self.log.clear()?;
        index.clear_primary()?;
        for field in index.indexed_fields()? {
            index.rebuild_secondary(&field, BTreeMap::new())?;
        }
        self.cache.lock().clear();
        self.journal(AuditAction::Clear, None, None);

        tracing::info!("{}: cleared", self.name);
        Ok(())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Every live `(id, record)` in id order
    fn live_records(&self, index: &mut IndexStore) -> Result<Vec<(u64, Record)>> {
        let snapshot = index.snapshot()?;
        self.sync_cache(index)?;

        let mut records = Vec::new();
        for (id, offset) in snapshot {
            if let Some(record) = self.read_live(id, offset)? {
                records.push((id, record));
            }
        }
        Ok(records)
    }
}

/// Group ids by the index key of `field`; records without it are skipped
fn buckets_for<'a>(
    field: &str,
    records: impl Iterator<Item = (u64, &'a Record)>,
) -> BTreeMap<String, Vec<u64>> {
    let mut buckets: BTreeMap<String, Vec<u64>> = BTreeMap::new();
    for (id, record) in records {
        if let Some(value) = record.get(field) {
            buckets.entry(value.index_key()).or_default().push(id);
        }
    }
    buckets
}
