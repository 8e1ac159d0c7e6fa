//! Log Store
//!
//! Appends versions to a table's data file and reads them back.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::SyncStrategy;
use crate::error::{FlatError, Result};
use crate::fs::{copy_into, FileLock, LockMode};
use crate::metrics::MetricsSink;
use crate::record::RecordVersion;

use super::LogScanner;

/// Append-only version log for one table
///
/// Holds no open handle: every call opens, locks, works and closes, so any
/// number of processes can share the file.
pub struct LogStore {
    /// Table name (for logs and metrics)
    pub(super) table: String,
    /// Path of the data file
    pub(super) path: PathBuf,
    pub(super) sync: SyncStrategy,
    /// Keep `*.bak.<ts>` after a successful compaction
    pub(super) keep_backup: bool,
    pub(super) metrics: Arc<dyn MetricsSink>,
}

impl LogStore {
    /// Open or create the data file at `path`
    pub fn open(
        table: &str,
        path: &Path,
        sync: SyncStrategy,
        keep_backup: bool,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self> {
        OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            table: table.to_string(),
            path: path.to_path_buf(),
            sync,
            keep_backup,
            metrics,
        })
    }

    /// Append one version; returns the byte offset where it begins
    pub fn append(&self, version: &RecordVersion) -> Result<u64> {
        let mut offsets = self.append_batch(std::slice::from_ref(version))?;
        Ok(offsets.remove(0))
    }

    /// Append several versions under one lock hold
    ///
    /// Returns the starting offset of each version, in order. On a failed
    /// write the file is truncated back so no torn line is left behind.
    pub fn append_batch(&self, versions: &[RecordVersion]) -> Result<Vec<u64>> {
        let mut lines = Vec::with_capacity(versions.len());
        for version in versions {
            lines.push(version.encode()?);
        }

        let lock = FileLock::open(&self.path, &Self::append_options(), LockMode::Exclusive)?;
        let mut file = lock.file();

        let start = file.seek(SeekFrom::End(0))?;
        let mut offsets = Vec::with_capacity(lines.len());
        let mut buffer = Vec::with_capacity(lines.iter().map(Vec::len).sum());
        for line in &lines {
            offsets.push(start + buffer.len() as u64);
            buffer.extend_from_slice(line);
        }

        let written = file.write_all(&buffer).and_then(|_| file.flush()).and_then(|_| {
            if self.sync.is_durable() {
                lock.file().sync_data()
            } else {
                Ok(())
            }
        });

        if let Err(e) = written {
            tracing::error!("Append to {:?} failed at offset {}: {}", self.path, start, e);
            if let Err(trunc) = lock.file().set_len(start) {
                tracing::error!("Could not roll back torn append in {:?}: {}", self.path, trunc);
            }
            return Err(e.into());
        }

        for line in &lines {
            self.metrics.record_append(&self.table, line.len() as u64);
        }

        Ok(offsets)
    }

    /// Read the version starting at `offset`
    pub fn read_at(&self, offset: u64) -> Result<RecordVersion> {
        let lock = FileLock::open(&self.path, OpenOptions::new().read(true), LockMode::Shared)?;
        let mut file = lock.file();

        let len = file.metadata()?.len();
        if offset >= len {
            return Err(FlatError::Decode(format!(
                "offset {} beyond end of {:?} ({} bytes)",
                offset, self.path, len
            )));
        }

        file.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(file);
        let mut line = Vec::new();
        reader.read_until(b'\n', &mut line)?;

        if line.last() != Some(&b'\n') {
            return Err(FlatError::Decode(format!(
                "truncated entry at offset {} in {:?}",
                offset, self.path
            )));
        }

        self.metrics.record_read(&self.table);
        RecordVersion::decode(&line)
    }

    /// Lazy scan of every version present when the scan starts
    pub fn scan(&self) -> Result<LogScanner> {
        let lock = FileLock::open(&self.path, OpenOptions::new().read(true), LockMode::Shared)?;
        let end = lock.file().metadata()?.len();
        let file = lock.file().try_clone()?;
        drop(lock);

        // Bytes below `end` are immutable; the handle keeps the old file
        // alive even if compaction renames a new one into place.
        Ok(LogScanner::new(file, end))
    }

    /// Highest id carried by any version, live or tombstoned (0 if none)
    pub fn highest_id(&self) -> Result<u64> {
        let mut highest = 0;
        for item in self.scan()? {
            let (_, version) = item?;
            highest = highest.max(version.id().unwrap_or(0));
        }
        Ok(highest)
    }

    /// Current size of the data file in bytes
    pub fn size(&self) -> Result<u64> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Truncate the data file to zero bytes
    pub fn clear(&self) -> Result<()> {
        let lock = FileLock::open(&self.path, &Self::append_options(), LockMode::Exclusive)?;
        lock.file().set_len(0)?;
        if self.sync.is_durable() {
            lock.file().sync_all()?;
        }
        tracing::info!("Cleared data file {:?}", self.path);
        Ok(())
    }

    /// Copy the data file into `dir` (consistent: taken under a shared lock)
    pub fn backup_to(&self, dir: &Path) -> Result<Option<PathBuf>> {
        let _lock = FileLock::open(&self.path, OpenOptions::new().read(true), LockMode::Shared)?;
        copy_into(&self.path, dir)
    }

    /// Path of the data file
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(super) fn append_options() -> OpenOptions {
        let mut options = OpenOptions::new();
        options.read(true).append(true).create(true);
        options
    }
}
