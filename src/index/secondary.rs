//! Secondary Index
//!
//! field value → ids of live records holding that value, for one field.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::SyncStrategy;
use crate::error::{FlatError, Result};

use super::file::IndexFile;

/// value key → ids, in insertion order
pub(crate) type Buckets = BTreeMap<String, Vec<u64>>;

pub(crate) struct SecondaryIndex {
    file: IndexFile,
    buckets: Buckets,
}

impl SecondaryIndex {
    /// Load the bucket document at `path`
    pub(crate) fn open(path: PathBuf) -> Result<Self> {
        let mut file = IndexFile::new(path);
        let buckets = file.load()?;
        Ok(Self { file, buckets })
    }

    pub(crate) fn refresh(&mut self) -> Result<()> {
        if self.file.is_stale() {
            let loaded = self.file.load();
            self.buckets = self.reset_on_corruption(loaded)?;
        }
        Ok(())
    }

    pub(crate) fn lookup(&self, key: &str) -> &[u64] {
        self.buckets.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn buckets(&self) -> &Buckets {
        &self.buckets
    }

    pub(crate) fn path(&self) -> &std::path::Path {
        self.file.path()
    }

    /// Add `id` under `key` if absent; true if the file was rewritten
    pub(crate) fn add(&mut self, key: &str, id: u64, sync: SyncStrategy) -> Result<bool> {
        self.modify(sync, |buckets| {
            let bucket = buckets.entry(key.to_string()).or_default();
            if bucket.contains(&id) {
                false
            } else {
                bucket.push(id);
                true
            }
        })
    }

    /// Remove `id` from `key`, pruning the bucket when it empties
    pub(crate) fn remove(&mut self, key: &str, id: u64, sync: SyncStrategy) -> Result<bool> {
        self.modify(sync, |buckets| {
            let Some(bucket) = buckets.get_mut(key) else {
                return false;
            };
            let before = bucket.len();
            bucket.retain(|existing| *existing != id);
            let changed = bucket.len() != before;
            if bucket.is_empty() {
                buckets.remove(key);
            }
            changed
        })
    }

    /// Replace every bucket
    pub(crate) fn replace(&mut self, buckets: Buckets, sync: SyncStrategy) -> Result<()> {
        self.modify(sync, |doc| {
            *doc = buckets;
            true
        })?;
        Ok(())
    }

    /// Delete the bucket file
    pub(crate) fn remove_file(&mut self) -> Result<()> {
        self.buckets.clear();
        self.file.remove()
    }

    fn modify<F>(&mut self, sync: SyncStrategy, f: F) -> Result<bool>
    where
        F: FnOnce(&mut Buckets) -> bool,
    {
        let modified = self.file.modify(sync, f);
        let (buckets, changed) = self.reset_on_corruption(modified)?;
        self.buckets = buckets;
        Ok(changed)
    }

    fn reset_on_corruption<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(FlatError::Corruption { .. }) = &result {
            tracing::warn!("Secondary index {:?} reset to empty after corruption", self.file.path());
            self.buckets.clear();
        }
        result
    }
}
