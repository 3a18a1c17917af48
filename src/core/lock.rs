//! Exclusive run lock.
//!
//! Runs mutate checkouts, build trees and markers, so only one may be in
//! flight per engine home. The lock is advisory and released when the
//! guard is dropped (or the process dies).

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::ForgeError;

/// Held for the duration of a run
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Take the lock without waiting
    pub fn acquire(path: &Path) -> Result<Self, ForgeError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        file.try_lock_exclusive()
            .map_err(|_| ForgeError::AlreadyRunning {
                lock_path: path.to_path_buf(),
            })?;

        debug!(lock = %path.display(), "acquired run lock");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
