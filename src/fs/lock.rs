//! Advisory file locks
//!
//! `flock(2)` locks belong to an open file description, so two handles in
//! the same process exclude each other exactly like two processes do.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// Lock flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Many readers
    Shared,
    /// One writer, no readers
    Exclusive,
}

/// An open file holding an advisory lock; unlocked on drop
#[derive(Debug)]
pub struct FileLock {
    file: File,
}

impl FileLock {
    /// Give up after this many times finding the path replaced under us
    const MAX_REOPEN_ATTEMPTS: usize = 32;

    /// Open `path` and lock it, blocking until the lock is granted
    ///
    /// A writer may have swapped the file by rename while we waited
    /// (compaction does). After locking, the handle is checked against the
    /// path; a stale handle is dropped and the path opened again.
    pub fn open(path: &Path, options: &OpenOptions, mode: LockMode) -> io::Result<Self> {
        for _ in 0..Self::MAX_REOPEN_ATTEMPTS {
            let file = options.open(path)?;
            flock(&file, mode)?;

            if still_linked(&file, path)? {
                return Ok(Self { file });
            }

            tracing::debug!("{:?} replaced while waiting for lock, reopening", path);
        }

        Err(io::Error::new(
            io::ErrorKind::Other,
            format!("{:?} keeps being replaced; could not lock it", path),
        ))
    }

    /// Lock an already-open file
    pub fn acquire(file: File, mode: LockMode) -> io::Result<Self> {
        flock(&file, mode)?;
        Ok(Self { file })
    }

    pub fn file(&self) -> &File {
        &self.file
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        unlock(&self.file);
    }
}

// =============================================================================
// Platform Glue
// =============================================================================

#[cfg(unix)]
fn flock(file: &File, mode: LockMode) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let op = match mode {
        LockMode::Shared => libc::LOCK_SH,
        LockMode::Exclusive => libc::LOCK_EX,
    };

    loop {
        // SAFETY: the descriptor is owned by `file` and open for the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), op) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(unix)]
fn unlock(file: &File) {
    use std::os::unix::io::AsRawFd;

    // SAFETY: as above; closing the descriptor would release it anyway.
    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file.metadata()?;
    match std::fs::metadata(path) {
        Ok(current) => Ok(held.dev() == current.dev() && held.ino() == current.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(not(unix))]
fn flock(_file: &File, _mode: LockMode) -> io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn unlock(_file: &File) {}

#[cfg(not(unix))]
fn still_linked(_file: &File, path: &Path) -> io::Result<bool> {
    Ok(path.exists())
}
