//! Log Compaction
//!
//! Rewrites a data file keeping only the latest live version of each id.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use crate::error::{FlatError, Result};
use crate::fs::{unix_millis, with_suffix, FileLock, LockMode};
use crate::record::{Record, RecordVersion};

use super::{LogScanner, LogStore};

/// One record kept by compaction
#[derive(Debug, Clone)]
pub struct CompactedEntry {
    pub id: u64,
    /// Offset of the record in the rewritten file
    pub offset: u64,
    pub record: Record,
}

/// Result of rewriting a data file
#[derive(Debug, Clone)]
pub struct CompactionOutcome {
    /// Retained records, ordered by id
    pub entries: Vec<CompactedEntry>,
    /// Versions read from the old file
    pub versions_scanned: u64,
    /// Highest id seen in the old file, including dropped ones
    pub highest_id: u64,
    pub bytes_before: u64,
    pub bytes_after: u64,
    /// Backup left on disk (only when backups are kept)
    pub backup: Option<PathBuf>,
}

impl CompactionOutcome {
    /// New offset of every retained id
    pub fn offsets(&self) -> BTreeMap<u64, u64> {
        self.entries.iter().map(|e| (e.id, e.offset)).collect()
    }
}

impl LogStore {
    /// Compact the data file
    ///
    /// Holds the exclusive lock for the whole rewrite, so appenders wait and
    /// then land in the new file. Errors while reading the old file abort
    /// before anything is replaced.
    pub fn compact(&self) -> Result<CompactionOutcome> {
        let lock = FileLock::open(&self.path, &Self::append_options(), LockMode::Exclusive)?;
        let bytes_before = lock.file().metadata()?.len();

        // Step 1: Last version wins per id
        let mut latest: BTreeMap<u64, RecordVersion> = BTreeMap::new();
        let mut versions_scanned = 0u64;
        let mut highest_id = 0u64;
        for item in LogScanner::new(lock.file().try_clone()?, bytes_before) {
            let (_, version) = item?;
            versions_scanned += 1;
            if let Some(id) = version.id() {
                highest_id = highest_id.max(id);
                latest.insert(id, version);
            }
        }

        // Step 2: Write survivors to the temp file
        let tmp = with_suffix(&self.path, ".tmp");
        let entries = match self.write_compacted(&tmp, latest) {
            Ok(entries) => entries,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(e);
            }
        };
        let bytes_after = fs::metadata(&tmp)?.len();

        // Step 3: Snapshot the original
        let backup = with_suffix(&self.path, &format!(".bak.{}", unix_millis()));
        if let Err(e) = fs::copy(&self.path, &backup) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        // Step 4: Swap the rewritten file in
        if let Err(e) = fs::rename(&tmp, &self.path) {
            tracing::error!("Compaction rename failed for {:?}: {}", self.path, e);
            let _ = fs::remove_file(&tmp);
            return Err(self.restore_from_backup(&backup, e));
        }
        if let Some(parent) = self.path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }
        drop(lock);

        let backup = if self.keep_backup {
            Some(backup)
        } else {
            fs::remove_file(&backup)?;
            None
        };

        tracing::info!(
            "Compacted {}: {} versions → {} records, {} → {} bytes",
            self.table,
            versions_scanned,
            entries.len(),
            bytes_before,
            bytes_after
        );
        self.metrics.record_compaction(&self.table, bytes_before, bytes_after);

        Ok(CompactionOutcome {
            entries,
            versions_scanned,
            highest_id,
            bytes_before,
            bytes_after,
            backup,
        })
    }

    /// Write live survivors in id order, returning their new offsets
    fn write_compacted(
        &self,
        tmp: &std::path::Path,
        latest: BTreeMap<u64, RecordVersion>,
    ) -> Result<Vec<CompactedEntry>> {
        let mut writer = BufWriter::new(File::create(tmp)?);
        let mut entries = Vec::with_capacity(latest.len());
        let mut offset = 0u64;

        for (id, version) in latest {
            let record = match version.into_live() {
                Some(record) => record,
                None => continue,
            };

            let version = RecordVersion::Live(record);
            let line = version.encode()?;
            writer.write_all(&line)?;

            entries.push(CompactedEntry {
                id,
                offset,
                record: version.into_record(),
            });
            offset += line.len() as u64;
        }

        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| FlatError::Io(e.into_error()))?;
        file.sync_all()?;

        Ok(entries)
    }

    /// Put the original back after a failed swap
    fn restore_from_backup(&self, backup: &std::path::Path, cause: std::io::Error) -> FlatError {
        match fs::copy(backup, &self.path) {
            Ok(_) => {
                tracing::warn!("Restored {:?} from {:?} after failed compaction", self.path, backup);
                let _ = fs::remove_file(backup);
                FlatError::Io(cause)
            }
            Err(restore) => {
                tracing::error!(
                    "Could not restore {:?} from {:?}: {}; backup kept",
                    self.path,
                    backup,
                    restore
                );
                FlatError::DataLoss(format!(
                    "compaction of {:?} failed ({}) and restoring from {:?} failed ({})",
                    self.path, cause, backup, restore
                ))
            }
        }
    }
}
