//! Log Scanner
//!
//! Sequential iteration over the versions of a data file.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};

use crate::error::{FlatError, Result};
use crate::record::RecordVersion;

/// Forward-only iterator over `(offset, version)` pairs
///
/// Bounded by the file length observed when the scan was opened, so
/// concurrent appends are never half-read.
pub struct LogScanner {
    reader: BufReader<File>,
    /// Stop reading at this offset (snapshot length)
    end_offset: u64,
    /// Offset of the next line
    current_offset: u64,
    /// Set after an error; the iterator is fused from then on
    failed: bool,
}

impl LogScanner {
    /// Scan `file` from the start up to `end_offset`
    pub(crate) fn new(mut file: File, end_offset: u64) -> Self {
        let _ = file.seek(SeekFrom::Start(0));
        Self {
            reader: BufReader::new(file),
            end_offset,
            current_offset: 0,
            failed: false,
        }
    }

    /// Snapshot length the scan stops at
    pub fn end_offset(&self) -> u64 {
        self.end_offset
    }
}

impl Iterator for LogScanner {
    type Item = Result<(u64, RecordVersion)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.current_offset >= self.end_offset {
            return None;
        }

        let offset = self.current_offset;
        let mut line = Vec::new();
        match self.reader.read_until(b'\n', &mut line) {
            Ok(0) => return None,
            Ok(_) => {}
            Err(e) => {
                self.failed = true;
                return Some(Err(FlatError::Io(e)));
            }
        }
        self.current_offset += line.len() as u64;

        // A line cut short by the snapshot bound or by a crash mid-append
        if line.last() != Some(&b'\n') || self.current_offset > self.end_offset {
            tracing::warn!("Ignoring torn log entry at offset {}", offset);
            return None;
        }

        match RecordVersion::decode(&line) {
            Ok(version) => Some(Ok((offset, version))),
            Err(e) => {
                self.failed = true;
                Some(Err(FlatError::Decode(format!("offset {}: {}", offset, e))))
            }
        }
    }
}
