//! Audit Journal
//!
//! File-backed, lock-guarded implementation of the audit trail.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::config::SyncStrategy;
use crate::error::Result;
use crate::fs::{copy_into, unix_millis, FileLock, LockMode};
use crate::record::Record;

use super::{AuditAction, AuditEntry};

/// Append-only mutation journal for one table
pub struct AuditLog {
    path: PathBuf,
    sync: SyncStrategy,
    /// When false, `append` is a no-op
    enabled: bool,
}

impl AuditLog {
    /// Open or create the journal at `path`
    pub fn open(path: &Path, sync: SyncStrategy, enabled: bool) -> Result<Self> {
        if enabled {
            OpenOptions::new().create(true).append(true).open(path)?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            sync,
            enabled,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Journal one mutation
    pub fn append(&self, action: AuditAction, id: Option<u64>, data: Option<&Record>) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let entry = AuditEntry {
            ts: unix_millis(),
            action,
            id,
            data: data.cloned(),
        };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let lock = FileLock::open(&self.path, &Self::append_options(), LockMode::Exclusive)?;
        let mut file = lock.file();
        file.write_all(&line)?;
        if self.sync.is_durable() {
            lock.file().sync_data()?;
        }
        Ok(())
    }

    /// Read up to `limit` entries after skipping `offset`, oldest first
    ///
    /// Lines that fail to parse are skipped with a warning.
    pub fn read(&self, limit: usize, offset: usize) -> Result<Vec<AuditEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let lock = FileLock::open(&self.path, OpenOptions::new().read(true), LockMode::Shared)?;
        let reader = BufReader::new(lock.file());

        let mut entries = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(
                    "Skipping unreadable audit line {} in {:?}: {}",
                    line_no + 1,
                    self.path,
                    e
                ),
            }
        }

        Ok(entries.into_iter().skip(offset).take(limit).collect())
    }

    /// Number of readable entries
    pub fn len(&self) -> Result<usize> {
        Ok(self.read(usize::MAX, 0)?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Truncate the journal, first copying it to
    /// `{backup_dir}/{name}.{ts}` when a directory is given
    pub fn rotate(&self, backup_dir: Option<&Path>) -> Result<Option<PathBuf>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let lock = FileLock::open(&self.path, &Self::append_options(), LockMode::Exclusive)?;

        let backup = match backup_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                let name = self
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "audit".to_string());
                let target = dir.join(format!("{}.{}", name, unix_millis()));
                fs::copy(&self.path, &target)?;
                Some(target)
            }
            None => None,
        };

        lock.file().set_len(0)?;
        if self.sync.is_durable() {
            lock.file().sync_all()?;
        }

        tracing::info!("Rotated audit journal {:?} (backup: {:?})", self.path, backup);
        Ok(backup)
    }

    /// Copy the journal into `dir`
    pub fn backup_to(&self, dir: &Path) -> Result<Option<PathBuf>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let _lock = FileLock::open(&self.path, OpenOptions::new().read(true), LockMode::Shared)?;
        copy_into(&self.path, dir)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append_options() -> OpenOptions {
        let mut options = OpenOptions::new();
        options.read(true).append(true).create(true);
        options
    }
}
