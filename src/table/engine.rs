//! Table Engine
//!
//! Single-record operations and reads.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::audit::{AuditAction, AuditLog};
use crate::config::{Config, SyncStrategy};
use crate::error::{FlatError, Result};
use crate::fs::{unix_millis, FileLock, LockMode};
use crate::index::IndexStore;
use crate::log::LogStore;
use crate::metrics::{MetricsSink, Operation};
use crate::record::{Record, RecordVersion, Value, CREATED_AT, DELETED_AT, ID, UPDATED_AT};
use crate::validation::{validate_identifier, Schema};

use super::cache::RecordCache;
use super::condition::{matches_all, Condition, Operator};
use super::{IndexWrite, TablePaths, UpdateOutcome};

/// Storage engine for one table
///
/// ## Concurrency Model
///
/// - **Across processes**: mutations and compaction hold `T_data.lock`
///   exclusively; reads hold it shared while they resolve offsets and read
///   them. Each file is additionally guarded by its own `flock`. No lock
///   spans tables.
/// - **Within a process**: mutations are serialized by `write_lock`
///   (acquire order: write_lock → T_data.lock → index → cache). Reads take
///   the index mutex only long enough to resolve an offset.
pub struct TableEngine {
    /// Table name
    pub(super) name: String,

    /// Files of this table
    pub(super) paths: TablePaths,

    pub(super) sync: SyncStrategy,

    /// Append-only version log
    pub(super) log: LogStore,

    /// Primary + secondary indexes (in-memory copy, reloaded when stale)
    pub(super) index: Mutex<IndexStore>,

    /// Mutation journal
    pub(super) audit: AuditLog,

    /// Bounded read cache
    pub(super) cache: Mutex<RecordCache>,

    /// Optional schema checked before writes
    pub(super) schema: RwLock<Option<Schema>>,

    /// Serializes mutations issued through this instance; taken before
    /// the table lock file
    pub(super) write_lock: Mutex<()>,

    pub(super) metrics: Arc<dyn MetricsSink>,
}

/// Exclusive hold on a table for one mutation
pub(super) struct WriteGuard<'a> {
    _table: FileLock,
    _local: MutexGuard<'a, ()>,
}

impl TableEngine {
    /// Open or create table `name` inside `config.data_dir`
    pub fn open(name: &str, config: &Config, metrics: Arc<dyn MetricsSink>) -> Result<Self> {
        config.validate()?;
        validate_identifier("table", name)?;
        fs::create_dir_all(&config.data_dir)?;

        let paths = TablePaths::new(&config.data_dir, name);
        let sync = config.sync_strategy;

        let log = LogStore::open(
            name,
            &paths.data,
            sync,
            config.keep_compaction_backup,
            Arc::clone(&metrics),
        )?;
        let index = IndexStore::open(name, &config.data_dir, sync, Arc::clone(&metrics))?;
        let audit = AuditLog::open(&paths.log, sync, config.audit_enabled)?;
        let schema = Self::load_schema(&paths)?;

        tracing::debug!("Opened table {} in {:?}", name, config.data_dir);

        Ok(Self {
            name: name.to_string(),
            paths,
            sync,
            log,
            index: Mutex::new(index),
            audit,
            cache: Mutex::new(RecordCache::new(config.cache_capacity)),
            schema: RwLock::new(schema),
            write_lock: Mutex::new(()),
            metrics,
        })
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert a record; returns its new id
    ///
    /// Reserved fields in `data` are ignored.
    pub fn insert(&self, data: Record) -> Result<u64> {
        let started = Instant::now();
        let _write_guard = self.lock_writes()?;
        let mut index = self.index.lock();

        let id = self.insert_locked(&mut index, data, IndexWrite::Immediate)?;

        self.metrics
            .record_operation(&self.name, Operation::Insert, started.elapsed());
        Ok(id)
    }

    /// Merge `data` into record `id`
    ///
    /// Returns false if `id` is not live. Returns true without writing
    /// anything when the merge changes no caller-visible field.
    pub fn update(&self, id: u64, data: Record) -> Result<bool> {
        let started = Instant::now();
        let _write_guard = self.lock_writes()?;
        let mut index = self.index.lock();

        let outcome = self.update_locked(&mut index, id, data, IndexWrite::Immediate)?;

        self.metrics
            .record_operation(&self.name, Operation::Update, started.elapsed());
        Ok(outcome != UpdateOutcome::NotFound)
    }

    /// Logically delete record `id`; false if it was not live
    pub fn delete(&self, id: u64) -> Result<bool> {
        let started = Instant::now();
        let _write_guard = self.lock_writes()?;
        let mut index = self.index.lock();

        let deleted = self.delete_locked(&mut index, id, IndexWrite::Immediate)?;

        self.metrics
            .record_operation(&self.name, Operation::Delete, started.elapsed());
        Ok(deleted)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Fetch record `id`, or `None` if it is not live
    pub fn select(&self, id: u64) -> Result<Option<Record>> {
        let started = Instant::now();

        let _read_guard = self.lock_reads()?;
        let record = self.select_locked(id)?;

        self.metrics
            .record_operation(&self.name, Operation::Select, started.elapsed());
        Ok(record)
    }

    /// Every live record, ordered by id
    pub fn select_all(&self) -> Result<Vec<Record>> {
        let _read_guard = self.lock_reads()?;
        let snapshot = self.resolve_all()?;

        let mut records = Vec::with_capacity(snapshot.len());
        for (id, offset) in snapshot {
            if let Some(record) = self.read_live(id, offset)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Records matching every condition, ordered by id, then paginated
    ///
    /// If the first `=` condition targets an indexed field its bucket
    /// narrows the candidates; every candidate is still checked against
    /// all conditions. Otherwise the data file is scanned.
    pub fn find(
        &self,
        conditions: &[Condition],
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Record>> {
        let started = Instant::now();
        let _read_guard = self.lock_reads()?;

        let matches = match self.index_candidates(conditions)? {
            Some(ids) => {
                let mut matches = Vec::new();
                for id in ids {
                    if let Some(record) = self.select_locked(id)? {
                        if matches_all(conditions, &record) {
                            matches.push(record);
                        }
                    }
                }
                matches
            }
            None => self.scan_matching(conditions)?,
        };

        let page = matches
            .into_iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .collect();

        self.metrics
            .record_operation(&self.name, Operation::Find, started.elapsed());
        Ok(page)
    }

    /// Number of live records
    pub fn count(&self) -> Result<usize> {
        self.index.lock().len()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn paths(&self) -> &TablePaths {
        &self.paths
    }

    /// The mutation journal of this table
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Fields with a secondary index
    pub fn indexed_fields(&self) -> Result<Vec<String>> {
        self.index.lock().indexed_fields()
    }

    /// Buckets of the secondary index on `field`
    pub fn index_buckets(&self, field: &str) -> Result<BTreeMap<String, Vec<u64>>> {
        self.index.lock().secondary_buckets(field)
    }

    /// Size of the data file in bytes
    pub fn data_size(&self) -> Result<u64> {
        self.log.size()
    }

    /// Records currently held by the read cache
    pub fn cached_records(&self) -> usize {
        self.cache.lock().len()
    }

    // =========================================================================
    // Locked Operations (write_lock held by caller)
    // =========================================================================

    pub(super) fn insert_locked(
        &self,
        index: &mut IndexStore,
        data: Record,
        mode: IndexWrite,
    ) -> Result<u64> {
        let mut record = data.without_reserved();
        self.validate(&record)?;

        // Step 1: Allocate (durable even if the append below fails)
        let id = self.allocate_id(index)?;
        record.set(ID, id);
        record.set(CREATED_AT, unix_millis());

        // Step 2: Append
        let version = RecordVersion::Live(record);
        let offset = self.log.append(&version)?;

        // Step 3: Index
        point(index, id, Some(offset), mode)?;
        let record = version.into_record();
        self.reindex(index, id, None, Some(&record))?;

        // Step 4: Journal and cache
        self.journal(AuditAction::Insert, Some(id), Some(&record));
        self.cache.lock().put(id, offset, record);

        tracing::debug!("{}: inserted record {} at offset {}", self.name, id, offset);
        Ok(id)
    }

    pub(super) fn update_locked(
        &self,
        index: &mut IndexStore,
        id: u64,
        data: Record,
        mode: IndexWrite,
    ) -> Result<UpdateOutcome> {
        let old_offset = match index.get(id)? {
            Some(offset) => offset,
            None => return Ok(UpdateOutcome::NotFound),
        };
        let current = match self.log.read_at(old_offset)?.into_live() {
            Some(record) => record,
            None => return Ok(UpdateOutcome::NotFound),
        };

        let mut merged = current.clone();
        merged.extend(data.without_reserved());
        if merged.same_content(&current) {
            tracing::debug!("{}: update of record {} changes nothing", self.name, id);
            return Ok(UpdateOutcome::Unchanged);
        }
        self.validate(&merged)?;
        merged.set(UPDATED_AT, unix_millis());

        // Step 1: Supersede the current version
        self.log.append(&RecordVersion::Tombstone(current.clone()))?;

        // Step 2: Append the new version
        let new_offset = match self.log.append(&RecordVersion::Live(merged.clone())) {
            Ok(offset) => offset,
            Err(e) => return Err(self.compensate(index, id, &current, mode, e)),
        };

        // Step 3: Repoint. On failure the log is ahead of the index: reads
        // keep returning the old content and compaction adopts the new one.
        if let Err(e) = point(index, id, Some(new_offset), mode) {
            tracing::error!(
                "{}: record {} appended at {} but index repoint failed: {}",
                self.name,
                id,
                new_offset,
                e
            );
            self.cache.lock().remove(id);
            return Err(FlatError::Mutation {
                id,
                source: Box::new(e),
            });
        }

        // Step 4: Secondary indexes, journal, cache
        self.reindex(index, id, Some(&current), Some(&merged))?;
        self.journal(AuditAction::Update, Some(id), Some(&merged));
        self.cache.lock().put(id, new_offset, merged);

        tracing::debug!("{}: updated record {} → offset {}", self.name, id, new_offset);
        Ok(UpdateOutcome::Updated)
    }

    pub(super) fn delete_locked(
        &self,
        index: &mut IndexStore,
        id: u64,
        mode: IndexWrite,
    ) -> Result<bool> {
        let offset = match index.get(id)? {
            Some(offset) => offset,
            None => return Ok(false),
        };
        let current = match self.log.read_at(offset)?.into_live() {
            Some(record) => record,
            None => return Ok(false),
        };

        // Step 1: Tombstone
        let mut tombstone = current.clone();
        tombstone.set(DELETED_AT, unix_millis());
        self.log.append(&RecordVersion::Tombstone(tombstone))?;

        // Step 2: Unindex
        if let Err(e) = point(index, id, None, mode) {
            return Err(self.compensate(index, id, &current, mode, e));
        }
        self.cache.lock().remove(id);
        self.reindex(index, id, Some(&current), None)?;

        // Step 3: Journal
        self.journal(AuditAction::Delete, Some(id), None);

        tracing::debug!("{}: deleted record {}", self.name, id);
        Ok(true)
    }

    // =========================================================================
    // Table Lock
    // =========================================================================

    /// Exclusive hold for a mutation, in-process mutex first
    pub(super) fn lock_writes(&self) -> Result<WriteGuard<'_>> {
        let local = self.write_lock.lock();
        let table = FileLock::open(&self.paths.lock, &lock_file_options(), LockMode::Exclusive)?;
        Ok(WriteGuard {
            _table: table,
            _local: local,
        })
    }

    /// Shared hold for resolving offsets and reading them
    fn lock_reads(&self) -> Result<FileLock> {
        Ok(FileLock::open(&self.paths.lock, &lock_file_options(), LockMode::Shared)?)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Next id, never at or below an id already present in the data log
    ///
    /// A counter that was never persisted (new table, or reset after a
    /// corrupt index document) is seeded from the log first.
    fn allocate_id(&self, index: &mut IndexStore) -> Result<u64> {
        if index.counter_is_unset()? {
            let highest = self.log.highest_id()?;
            if highest > 0 {
                tracing::warn!(
                    "{}: id counter missing, resuming after id {} found in the data log",
                    self.name,
                    highest
                );
                index.raise_counter(highest)?;
            }
        }
        index.next_id()
    }

    /// Live record `id`; caller holds the table lock
    fn select_locked(&self, id: u64) -> Result<Option<Record>> {
        let offset = {
            let mut index = self.index.lock();
            let offset = index.get(id)?;
            self.sync_cache(&mut index)?;
            offset
        };
        match offset {
            Some(offset) => self.read_live(id, offset),
            None => Ok(None),
        }
    }

    /// Every live id → offset; caller holds the table lock
    pub(super) fn resolve_all(&self) -> Result<BTreeMap<u64, u64>> {
        let mut index = self.index.lock();
        let snapshot = index.snapshot()?;
        self.sync_cache(&mut index)?;
        Ok(snapshot)
    }

    /// Drop cached records if the offsets they were read at were rebuilt
    pub(super) fn sync_cache(&self, index: &mut IndexStore) -> Result<()> {
        let generation = index.generation()?;
        self.cache.lock().observe_generation(generation);
        Ok(())
    }

    /// Undo a half-applied mutation by re-appending `current` as live and
    /// pointing the index at it. Best effort; always returns the error to
    /// raise.
    fn compensate(
        &self,
        index: &mut IndexStore,
        id: u64,
        current: &Record,
        mode: IndexWrite,
        cause: FlatError,
    ) -> FlatError {
        tracing::warn!("{}: mutation of record {} failed ({}), compensating", self.name, id, cause);
        self.cache.lock().remove(id);

        match self.log.append(&RecordVersion::Live(current.clone())) {
            Ok(offset) => match point(index, id, Some(offset), mode) {
                Ok(()) => tracing::warn!("{}: record {} restored at offset {}", self.name, id, offset),
                Err(e) => tracing::error!(
                    "{}: record {} re-appended at {} but index restore failed: {}",
                    self.name,
                    id,
                    offset,
                    e
                ),
            },
            Err(e) => tracing::error!(
                "{}: could not re-append record {}; it is tombstoned in the log: {}",
                self.name,
                id,
                e
            ),
        }

        FlatError::Mutation {
            id,
            source: Box::new(cause),
        }
    }

    /// Read the live version at `offset` through the cache
    pub(super) fn read_live(&self, id: u64, offset: u64) -> Result<Option<Record>> {
        if let Some(record) = self.cache.lock().get(id, offset) {
            self.metrics.record_cache(&self.name, true);
            return Ok(Some(record));
        }
        self.metrics.record_cache(&self.name, false);

        match self.log.read_at(offset)?.into_live() {
            Some(record) if record.id() == Some(id) => {
                self.cache.lock().put(id, offset, record.clone());
                Ok(Some(record))
            }
            _ => Ok(None),
        }
    }

    /// Candidate ids from the secondary index of the first `=` condition
    fn index_candidates(&self, conditions: &[Condition]) -> Result<Option<Vec<u64>>> {
        let first_eq = match conditions.iter().find(|c| c.op == Operator::Eq) {
            Some(condition) => condition,
            None => return Ok(None),
        };

        let mut index = self.index.lock();
        if !index.is_indexed(&first_eq.field)? {
            return Ok(None);
        }

        let ids = index.lookup_secondary(&first_eq.field, &first_eq.value.lookup_keys())?;
        tracing::debug!(
            "{}: index on {:?} narrowed find to {} candidates",
            self.name,
            first_eq.field,
            ids.len()
        );
        Ok(Some(ids))
    }

    /// Full scan keeping only versions the primary index points at;
    /// caller holds the table lock
    fn scan_matching(&self, conditions: &[Condition]) -> Result<Vec<Record>> {
        let current = self.resolve_all()?;

        let mut found = BTreeMap::new();
        for item in self.log.scan()? {
            let (offset, version) = item?;
            let id = match version.id() {
                Some(id) if current.get(&id) == Some(&offset) => id,
                _ => continue,
            };
            if let Some(record) = version.into_live() {
                if matches_all(conditions, &record) {
                    found.insert(id, record);
                }
            }
        }
        Ok(found.into_values().collect())
    }

    /// Move `id` between secondary buckets for every field whose value changed
    pub(super) fn reindex(
        &self,
        index: &mut IndexStore,
        id: u64,
        old: Option<&Record>,
        new: Option<&Record>,
    ) -> Result<()> {
        for field in index.indexed_fields()? {
            let old_key = old.and_then(|r| r.get(&field)).map(Value::index_key);
            let new_key = new.and_then(|r| r.get(&field)).map(Value::index_key);
            if old_key == new_key {
                continue;
            }
            if let Some(key) = old_key {
                index.remove_secondary(&field, &key, id)?;
            }
            if let Some(key) = new_key {
                index.add_secondary(&field, &key, id)?;
            }
        }
        Ok(())
    }

    /// Check `record` against the schema, if one is set
    fn validate(&self, record: &Record) -> Result<()> {
        if let Some((field, _)) = record.iter().find(|(_, value)| !value.is_finite()) {
            return Err(FlatError::Validation(format!(
                "field {:?} holds a NaN or infinite number",
                field
            )));
        }
        match &*self.schema.read() {
            Some(schema) => schema.validate(record),
            None => Ok(()),
        }
    }

    /// Journal a mutation; a journal failure never fails the mutation
    pub(super) fn journal(&self, action: AuditAction, id: Option<u64>, data: Option<&Record>) {
        if let Err(e) = self.audit.append(action, id, data) {
            tracing::warn!("{}: audit journal append failed: {}", self.name, e);
        }
    }

    fn load_schema(paths: &TablePaths) -> Result<Option<Schema>> {
        match fs::read(&paths.schema) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn lock_file_options() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true);
    options
}

/// Apply a primary index change in the requested mode
pub(super) fn point(
    index: &mut IndexStore,
    id: u64,
    offset: Option<u64>,
    mode: IndexWrite,
) -> Result<()> {
    match (mode, offset) {
        (IndexWrite::Immediate, Some(offset)) => index.set(id, offset),
        (IndexWrite::Immediate, None) => index.remove(id).map(|_| ()),
        (IndexWrite::Deferred, offset) => {
            index.stage(id, offset);
            Ok(())
        }
    }
}
