//! Index Store
//!
//! Coordinates the primary index and the lazily loaded secondary indexes
//! of one table.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::SyncStrategy;
use crate::error::Result;
use crate::fs::copy_into;
use crate::metrics::{IndexPersist, MetricsSink};
use crate::validation::validate_identifier;

use super::primary::PrimaryIndex;
use super::secondary::SecondaryIndex;

/// Primary + secondary indexes for one table
///
/// ## Durability:
/// - `next_id`, `set`, `remove`: persisted before returning
/// - `stage` + `commit`: batched, persisted once by `commit`
/// - Secondary mutations: persisted per call, per field file
pub struct IndexStore {
    /// Table name (for file names, logs and metrics)
    table: String,
    /// Directory holding the index files
    dir: PathBuf,
    sync: SyncStrategy,
    metrics: Arc<dyn MetricsSink>,
    primary: PrimaryIndex,
    /// Loaded on first use per field
    secondary: BTreeMap<String, SecondaryIndex>,
}

impl IndexStore {
    /// Open the indexes of `table` in `dir`
    ///
    /// Fails with `Corruption` if the primary document is unreadable; it has
    /// been quarantined by then, so opening again starts from empty.
    pub fn open(
        table: &str,
        dir: &Path,
        sync: SyncStrategy,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self> {
        let primary = PrimaryIndex::open(Self::primary_path_in(dir, table))?;

        Ok(Self {
            table: table.to_string(),
            dir: dir.to_path_buf(),
            sync,
            metrics,
            primary,
            secondary: BTreeMap::new(),
        })
    }

    /// `{dir}/{table}_index`
    pub fn primary_path_in(dir: &Path, table: &str) -> PathBuf {
        dir.join(format!("{}_index", table))
    }

    /// `{dir}/{table}_index_{field}`
    pub fn secondary_path_in(dir: &Path, table: &str, field: &str) -> PathBuf {
        dir.join(format!("{}_index_{}", table, field))
    }

    // =========================================================================
    // Primary Index
    // =========================================================================

    /// Allocate the next id, durably
    ///
    /// The counter is persisted before returning, so an id is never handed
    /// out twice even if the caller crashes before appending anything.
    pub fn next_id(&mut self) -> Result<u64> {
        let id = self.primary.allocate(self.sync)?;
        self.metrics.record_index_persist(&self.table, IndexPersist::Counter);
        tracing::debug!("{}: allocated id {}", self.table, id);
        Ok(id)
    }

    /// Whether no id has ever been recorded as allocated
    ///
    /// True for a new table, and after a corrupt document was reset.
    pub fn counter_is_unset(&mut self) -> Result<bool> {
        self.primary.refresh()?;
        Ok(self.primary.last_id() == 0)
    }

    /// Move the id counter up to at least `highest`; never lowers it
    pub fn raise_counter(&mut self, highest: u64) -> Result<bool> {
        let raised = self.primary.modify(self.sync, |doc| {
            if doc.last_id >= highest {
                return false;
            }
            doc.last_id = highest;
            true
        })?;
        if raised {
            self.metrics.record_index_persist(&self.table, IndexPersist::Counter);
            tracing::info!("{}: id counter raised to {}", self.table, highest);
        }
        Ok(raised)
    }

    /// Offset generation; changes whenever existing offsets are invalidated
    pub fn generation(&mut self) -> Result<u64> {
        self.primary.refresh()?;
        Ok(self.primary.generation())
    }

    /// Offset of the current version of `id`
    pub fn get(&mut self, id: u64) -> Result<Option<u64>> {
        self.primary.refresh()?;
        Ok(self.primary.get(id))
    }

    /// Every live id → offset
    pub fn snapshot(&mut self) -> Result<BTreeMap<u64, u64>> {
        self.primary.refresh()?;
        Ok(self.primary.snapshot())
    }

    /// Live ids in ascending order
    pub fn ids(&mut self) -> Result<Vec<u64>> {
        Ok(self.snapshot()?.into_keys().collect())
    }

    /// Number of live ids
    pub fn len(&mut self) -> Result<usize> {
        self.primary.refresh()?;
        Ok(self.primary.len())
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Point `id` at `offset` and persist
    pub fn set(&mut self, id: u64, offset: u64) -> Result<()> {
        let written = self.primary.modify(self.sync, |doc| {
            doc.offsets.insert(id, offset) != Some(offset)
        })?;
        self.note_offsets_persist(written);
        Ok(())
    }

    /// Remove `id` and persist; false if it was not indexed
    pub fn remove(&mut self, id: u64) -> Result<bool> {
        let removed = self.primary.modify(self.sync, |doc| doc.offsets.remove(&id).is_some())?;
        self.note_offsets_persist(removed);
        Ok(removed)
    }

    /// Defer `id → offset` (or removal) until `commit`
    pub fn stage(&mut self, id: u64, offset: Option<u64>) {
        self.primary.stage(id, offset);
    }

    /// Whether staged changes await a commit
    pub fn has_pending(&self) -> bool {
        self.primary.has_staged()
    }

    /// Merge staged changes into the persisted document in one write
    pub fn commit(&mut self) -> Result<()> {
        let written = self.primary.commit(self.sync)?;
        self.note_offsets_persist(written);
        Ok(())
    }

    /// Forget staged changes
    pub fn discard_pending(&mut self) {
        self.primary.discard_staged();
    }

    /// Replace the whole offset map (after compaction)
    ///
    /// The id counter only moves forward. The generation is bumped so
    /// readers drop anything cached under the old offsets.
    pub fn rebuild_primary(&mut self, offsets: BTreeMap<u64, u64>) -> Result<()> {
        self.primary.discard_staged();
        let written = self.primary.modify(self.sync, |doc| {
            let highest = offsets.keys().next_back().copied().unwrap_or(0);
            doc.last_id = doc.last_id.max(highest);
            doc.offsets = offsets;
            doc.generation += 1;
            true
        })?;
        self.note_offsets_persist(written);
        Ok(())
    }

    /// Remove every id, keeping the counter
    pub fn clear_primary(&mut self) -> Result<()> {
        self.rebuild_primary(BTreeMap::new())
    }

    // =========================================================================
    // Secondary Indexes
    // =========================================================================

    /// Fields with a secondary index
    pub fn indexed_fields(&mut self) -> Result<Vec<String>> {
        self.primary.refresh()?;
        Ok(self.primary.fields().iter().cloned().collect())
    }

    pub fn is_indexed(&mut self, field: &str) -> Result<bool> {
        self.primary.refresh()?;
        Ok(self.primary.fields().contains(field))
    }

    /// Declare a secondary index on `field` (empty until rebuilt)
    ///
    /// Returns false if it already existed.
    pub fn create_index(&mut self, field: &str) -> Result<bool> {
        validate_identifier("field", field)?;

        let created = self
            .primary
            .modify(self.sync, |doc| doc.indexes.insert(field.to_string()))?;
        if created {
            self.note_offsets_persist(true);
            let sync = self.sync;
            self.secondary(field)?.replace(BTreeMap::new(), sync)?;
            tracing::info!("{}: created index on {:?}", self.table, field);
        }
        Ok(created)
    }

    /// Drop the index on `field` and delete its file
    pub fn drop_index(&mut self, field: &str) -> Result<bool> {
        let dropped = self.primary.modify(self.sync, |doc| doc.indexes.remove(field))?;
        if dropped {
            self.note_offsets_persist(true);
            self.secondary(field)?.remove_file()?;
            self.secondary.remove(field);
            tracing::info!("{}: dropped index on {:?}", self.table, field);
        }
        Ok(dropped)
    }

    /// Record that `id` holds `key` in `field`
    pub fn add_secondary(&mut self, field: &str, key: &str, id: u64) -> Result<()> {
        let sync = self.sync;
        let written = self.secondary(field)?.add(key, id, sync)?;
        self.note_secondary_persist(written);
        Ok(())
    }

    /// Forget that `id` holds `key` in `field`
    pub fn remove_secondary(&mut self, field: &str, key: &str, id: u64) -> Result<()> {
        let sync = self.sync;
        let written = self.secondary(field)?.remove(key, id, sync)?;
        self.note_secondary_persist(written);
        Ok(())
    }

    /// Ids recorded under any of `keys`, ascending and deduplicated
    pub fn lookup_secondary(&mut self, field: &str, keys: &[String]) -> Result<Vec<u64>> {
        let index = self.secondary(field)?;
        index.refresh()?;

        let ids: BTreeSet<u64> = keys
            .iter()
            .flat_map(|key| index.lookup(key).iter().copied())
            .collect();
        Ok(ids.into_iter().collect())
    }

    /// Current buckets of `field`
    pub fn secondary_buckets(&mut self, field: &str) -> Result<BTreeMap<String, Vec<u64>>> {
        let index = self.secondary(field)?;
        index.refresh()?;
        Ok(index.buckets().clone())
    }

    /// Replace every bucket of `field`
    pub fn rebuild_secondary(
        &mut self,
        field: &str,
        buckets: BTreeMap<String, Vec<u64>>,
    ) -> Result<()> {
        let sync = self.sync;
        self.secondary(field)?.replace(buckets, sync)?;
        self.note_secondary_persist(true);
        Ok(())
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Copy every index document into `dir`
    pub fn backup_to(&mut self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut copied = Vec::new();
        if let Some(path) = copy_into(self.primary.path(), dir)? {
            copied.push(path);
        }
        for field in self.indexed_fields()? {
            let path = self.secondary(&field)?.path().to_path_buf();
            if let Some(path) = copy_into(&path, dir)? {
                copied.push(path);
            }
        }
        Ok(copied)
    }

    /// Path of the primary index document
    pub fn primary_path(&self) -> &Path {
        self.primary.path()
    }

    /// Path of the secondary index document for `field`
    pub fn secondary_path(&self, field: &str) -> PathBuf {
        Self::secondary_path_in(&self.dir, &self.table, field)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Loaded secondary index for `field`
    fn secondary(&mut self, field: &str) -> Result<&mut SecondaryIndex> {
        let path = self.secondary_path(field);
        match self.secondary.entry(field.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => Ok(entry.insert(SecondaryIndex::open(path)?)),
        }
    }

    fn note_offsets_persist(&self, written: bool) {
        if written {
            self.metrics.record_index_persist(&self.table, IndexPersist::Offsets);
        }
    }

    fn note_secondary_persist(&self, written: bool) {
        if written {
            self.metrics.record_index_persist(&self.table, IndexPersist::Secondary);
        }
    }
}
