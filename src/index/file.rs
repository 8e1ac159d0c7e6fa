//! Locked JSON documents
//!
//! Shared load/modify plumbing for the primary and secondary index files.

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::SyncStrategy;
use crate::error::{FlatError, Result};
use crate::fs::{quarantine, with_suffix, write_atomic, FileLock, Fingerprint, LockMode};

/// A JSON document guarded by a sibling `.lock` file
pub(crate) struct IndexFile {
    path: PathBuf,
    lock_path: PathBuf,
    /// On-disk state as of our last read or write
    fingerprint: Option<Fingerprint>,
}

impl IndexFile {
    pub(crate) fn new(path: PathBuf) -> Self {
        let lock_path = with_suffix(&path, ".lock");
        Self {
            path,
            lock_path,
            fingerprint: None,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Whether another writer changed the document since we last saw it
    pub(crate) fn is_stale(&self) -> bool {
        Fingerprint::of(&self.path) != self.fingerprint
    }

    /// Read the document under a shared lock
    pub(crate) fn load<T>(&mut self) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        let _lock = self.lock(LockMode::Shared)?;
        self.read()
    }

    /// Reload under an exclusive lock, apply `f`, and rewrite if it reports
    /// a change. Returns the resulting document and whether it was written.
    pub(crate) fn modify<T, F>(&mut self, sync: SyncStrategy, f: F) -> Result<(T, bool)>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T) -> bool,
    {
        let _lock = self.lock(LockMode::Exclusive)?;
        let mut doc: T = self.read()?;

        let changed = f(&mut doc);
        if changed {
            write_atomic(&self.path, &serde_json::to_vec(&doc)?, sync)?;
            self.fingerprint = Fingerprint::of(&self.path);
        }

        Ok((doc, changed))
    }

    /// Delete the document and its lock file
    pub(crate) fn remove(&mut self) -> Result<()> {
        for path in [&self.path, &self.lock_path] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.fingerprint = None;
        Ok(())
    }

    fn lock(&self, mode: LockMode) -> Result<FileLock> {
        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true);
        Ok(FileLock::open(&self.lock_path, &options, mode)?)
    }

    /// Parse the document; caller holds the lock
    ///
    /// A missing or empty file is an empty document. An unparsable one is
    /// renamed aside and reported as `Corruption`; the next read starts
    /// from empty.
    fn read<T>(&mut self) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.fingerprint = None;
                return Ok(T::default());
            }
            Err(e) => return Err(e.into()),
        };
        self.fingerprint = Fingerprint::of(&self.path);

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(T::default());
        }

        match serde_json::from_slice(&bytes) {
            Ok(doc) => Ok(doc),
            Err(e) => {
                tracing::error!("Index document {:?} is corrupt: {}", self.path, e);
                let quarantined = quarantine(&self.path)?;
                self.fingerprint = None;
                Err(FlatError::Corruption {
                    path: self.path.clone(),
                    quarantined,
                })
            }
        }
    }
}
