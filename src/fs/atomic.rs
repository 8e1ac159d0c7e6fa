//! Whole-file replacement helpers

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::SyncStrategy;
use crate::error::Result;

use super::{unix_millis, with_suffix};

/// Replace `path` with `bytes` via `<path>.tmp` and a rename
///
/// Readers see either the old or the new content, never a partial file.
/// Callers serialize writers to the same path with a lock.
pub fn write_atomic(path: &Path, bytes: &[u8], sync: SyncStrategy) -> Result<()> {
    let tmp = with_suffix(path, ".tmp");

    let written = (|| -> std::io::Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        if sync.is_durable() {
            file.sync_all()?;
        }
        Ok(())
    })();

    if let Err(e) = written.and_then(|_| fs::rename(&tmp, path)) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }

    if sync.is_durable() {
        sync_parent(path);
    }

    Ok(())
}

/// Move an unreadable file aside as `<path>.corrupt.<ts>`
pub fn quarantine(path: &Path) -> Result<PathBuf> {
    let target = with_suffix(path, &format!(".corrupt.{}", unix_millis()));
    fs::rename(path, &target)?;
    tracing::error!("Quarantined corrupt file {:?} as {:?}", path, target);
    Ok(target)
}

/// Copy `path` into `dir` under the same file name, if it exists
pub fn copy_into(path: &Path, dir: &Path) -> Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }

    let name = match path.file_name() {
        Some(name) => name,
        None => return Ok(None),
    };

    fs::create_dir_all(dir)?;
    let target = dir.join(name);
    fs::copy(path, &target)?;
    Ok(Some(target))
}

/// Persist the directory entry of a rename (best effort)
#[cfg(unix)]
fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) {}
