//! Single-instance guard backed by an advisory, non-blocking file lock.
//!
//! The guard owns the open lock file. Dropping it unlocks the file and
//! removes it, so the next scheduled run starts from a clean slate.

use std::fs::{self, File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::utils::error::{Error, Result};

/// Logical lock name used by the collector binary.
pub const RUNNER_LOCK_NAME: &str = "cnode_runner";

/// Exclusive lock held for the lifetime of one run.
#[derive(Debug)]
pub struct SingletonLock {
    file: Option<File>,
    path: PathBuf,
}

impl SingletonLock {
    /// Acquire `name` in the system temporary directory.
    pub fn try_acquire(name: &str) -> Result<Self> {
        Self::try_acquire_in(&std::env::temp_dir(), name)
    }

    /// Acquire `name` inside `dir`. Fails immediately with [`Error::LockHeld`]
    /// if another holder exists; never waits.
    pub fn try_acquire_in(dir: &Path, name: &str) -> Result<Self> {
        let path = dir.join(format!("{}.flock", name));
        info!("acquiring collector node lock file: '{}'", path.display());

        let file = OpenOptions::new().write(true).create(true).truncate(false).open(&path)?;
        match file.try_lock() {
            | Ok(()) => {}
            | Err(TryLockError::WouldBlock) => {
                return Err(Error::LockHeld(path.display().to_string()));
            }
            | Err(TryLockError::Error(e)) => return Err(Error::IoError(e)),
        }

        // A previous holder may have unlinked the path between our open and our lock,
        // leaving us holding an orphaned inode. Only the file still at `path` counts.
        if !still_linked(&file, &path) {
            return Err(Error::LockHeld(path.display().to_string()));
        }

        Ok(Self { file: Some(file), path })
    }

    /// Location of the backing lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release explicitly. Equivalent to dropping the guard.
    pub fn release(self) {}
}

impl Drop for SingletonLock {
    fn drop(&mut self) {
        info!("releasing: '{}'", self.path.display());
        // Unlink while still locked so a waiting opener can never lock a stale inode.
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("could not remove lock file '{}': {}", self.path.display(), e);
        }
        if let Some(file) = self.file.take() {
            if let Err(e) = file.unlock() {
                debug!("unlock '{}' failed: {}", self.path.display(), e);
            }
        }
    }
}

#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (file.metadata(), fs::metadata(path)) {
        | (Ok(held), Ok(on_disk)) => held.ino() == on_disk.ino() && held.dev() == on_disk.dev(),
        | _ => false,
    }
}

#[cfg(not(unix))]
fn still_linked(_file: &File, path: &Path) -> bool {
    path.exists()
}
