//! Filesystem Module
//!
//! Low-level file primitives shared by the log, index and audit stores.
//!
//! ## Responsibilities
//! - Cross-process advisory locks (`flock`) that survive file replacement
//! - Write-to-temp-then-rename persistence
//! - Timestamped backup and quarantine names
//!
//! Processes never share memory; every ordering guarantee between them is
//! made by these locks.

mod atomic;
mod lock;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub use atomic::{copy_into, quarantine, write_atomic};
pub use lock::{FileLock, LockMode};

/// Milliseconds since the unix epoch
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// `path` with `suffix` appended to its file name
///
/// `with_suffix("posts_data", ".tmp")` → `posts_data.tmp`
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Cheap identity of a file's on-disk state, used to notice that another
/// process replaced or rewrote it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    len: u64,
    modified: Option<SystemTime>,
    inode: u64,
}

impl Fingerprint {
    /// Fingerprint of `path`, or `None` if it does not exist
    pub fn of(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        #[cfg(unix)]
        let inode = std::os::unix::fs::MetadataExt::ino(&meta);
        #[cfg(not(unix))]
        let inode = 0;

        Some(Self {
            len: meta.len(),
            modified: meta.modified().ok(),
            inode,
        })
    }
}
