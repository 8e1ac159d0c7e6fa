//! Primary Index
//!
//! id → byte offset, the id counter, and the list of declared secondary
//! indexes, all in one document.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::SyncStrategy;
use crate::error::{FlatError, Result};

use super::file::IndexFile;

/// On-disk shape of `T_index`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct PrimaryDocument {
    /// Highest id ever allocated; survives deletes and compaction
    #[serde(default)]
    pub last_id: u64,

    /// Live id → offset of its current version
    #[serde(default)]
    pub offsets: BTreeMap<u64, u64>,

    /// Fields with a secondary index
    #[serde(default)]
    pub indexes: BTreeSet<String>,

    /// Bumped whenever offsets are rebuilt (compaction, clear); offsets
    /// from an older generation may now name a different record
    #[serde(default)]
    pub generation: u64,
}

/// In-memory view of the primary index plus not-yet-merged batch changes
pub(crate) struct PrimaryIndex {
    file: IndexFile,
    doc: PrimaryDocument,
    /// Deferred mutations from a bulk operation (`None` = removal)
    staged: BTreeMap<u64, Option<u64>>,
}

impl PrimaryIndex {
    /// Load the document at `path`
    pub(crate) fn open(path: PathBuf) -> Result<Self> {
        let mut file = IndexFile::new(path);
        let doc = file.load()?;
        Ok(Self {
            file,
            doc,
            staged: BTreeMap::new(),
        })
    }

    /// Reload if another writer touched the document
    pub(crate) fn refresh(&mut self) -> Result<()> {
        if self.file.is_stale() {
            let loaded = self.file.load();
            self.doc = self.reset_on_corruption(loaded)?;
        }
        Ok(())
    }

    /// Current offset of `id`, staged changes first
    pub(crate) fn get(&self, id: u64) -> Option<u64> {
        match self.staged.get(&id) {
            Some(staged) => *staged,
            None => self.doc.offsets.get(&id).copied(),
        }
    }

    /// Live id → offset map including staged changes
    pub(crate) fn snapshot(&self) -> BTreeMap<u64, u64> {
        let mut offsets = self.doc.offsets.clone();
        apply_staged(&mut offsets, &self.staged);
        offsets
    }

    pub(crate) fn len(&self) -> usize {
        if self.staged.is_empty() {
            self.doc.offsets.len()
        } else {
            self.snapshot().len()
        }
    }

    pub(crate) fn last_id(&self) -> u64 {
        self.doc.last_id
    }

    pub(crate) fn generation(&self) -> u64 {
        self.doc.generation
    }

    pub(crate) fn fields(&self) -> &BTreeSet<String> {
        &self.doc.indexes
    }

    pub(crate) fn path(&self) -> &std::path::Path {
        self.file.path()
    }

    // =========================================================================
    // Durable Mutations
    // =========================================================================

    /// Allocate and persist the next id
    pub(crate) fn allocate(&mut self, sync: SyncStrategy) -> Result<u64> {
        let mut allocated = 0;
        self.modify(sync, |doc| {
            let highest = doc.offsets.keys().next_back().copied().unwrap_or(0);
            allocated = doc.last_id.max(highest) + 1;
            doc.last_id = allocated;
            true
        })?;
        Ok(allocated)
    }

    /// Apply `f` to a freshly loaded document and persist it if changed
    pub(crate) fn modify<F>(&mut self, sync: SyncStrategy, f: F) -> Result<bool>
    where
        F: FnOnce(&mut PrimaryDocument) -> bool,
    {
        let modified = self.file.modify(sync, f);
        let (doc, changed) = self.reset_on_corruption(modified)?;
        self.doc = doc;
        Ok(changed)
    }

    // =========================================================================
    // Deferred Mutations
    // =========================================================================

    pub(crate) fn stage(&mut self, id: u64, offset: Option<u64>) {
        self.staged.insert(id, offset);
    }

    pub(crate) fn has_staged(&self) -> bool {
        !self.staged.is_empty()
    }

    /// Merge every staged change into the document in one persist
    pub(crate) fn commit(&mut self, sync: SyncStrategy) -> Result<bool> {
        if self.staged.is_empty() {
            return Ok(false);
        }

        let staged = std::mem::take(&mut self.staged);
        match self.modify(sync, |doc| {
            apply_staged(&mut doc.offsets, &staged);
            true
        }) {
            Ok(changed) => Ok(changed),
            Err(e) => {
                // Keep the batch so a later commit can retry it
                self.staged = staged;
                Err(e)
            }
        }
    }

    /// Drop staged changes without persisting them
    pub(crate) fn discard_staged(&mut self) {
        self.staged.clear();
    }

    fn reset_on_corruption<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(FlatError::Corruption { .. }) = &result {
            tracing::warn!("Primary index reset to empty after corruption");
            self.doc = PrimaryDocument::default();
            self.staged.clear();
        }
        result
    }
}

fn apply_staged(offsets: &mut BTreeMap<u64, u64>, staged: &BTreeMap<u64, Option<u64>>) {
    for (id, offset) in staged {
        match offset {
            Some(offset) => {
                offsets.insert(*id, *offset);
            }
            None => {
                offsets.remove(id);
            }
        }
    }
}
