//! Cross-process guard for an embedded storage root.

use crate::error::{BridgeError, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the lock file inside the state directory.
pub const LOCK_FILE: &str = "LOCK";

/// Exclusive lock on `<state_dir>/LOCK`, held for the life of the process.
///
/// The embedded store has no cross-process row locks, so only one process may
/// serve a storage root at a time. The lock file records the holder's PID.
/// The OS releases the `flock` when the holder dies, so a stale file left by
/// a crash never blocks a restart.
#[derive(Debug)]
pub struct StorageLock {
    file: Option<File>,
    path: PathBuf,
}

impl StorageLock {
    /// Takes the lock in `state_dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns `StorageLocked` with the holder's PID if another process owns
    /// the lock.
    pub fn acquire(state_dir: impl AsRef<Path>) -> Result<Self> {
        let state_dir = state_dir.as_ref();
        fs::create_dir_all(state_dir)?;
        let path = state_dir.join(LOCK_FILE);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if file.try_lock_exclusive().is_err() {
            let mut content = String::new();
            let pid = file
                .read_to_string(&mut content)
                .ok()
                .and_then(|_| content.trim().parse::<u32>().ok())
                .unwrap_or(0);
            return Err(BridgeError::StorageLocked { path, pid });
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;
        debug!(path = %path.display(), "Acquired storage lock");

        Ok(Self {
            file: Some(file),
            path,
        })
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StorageLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            // Remove while still holding the lock so a waiting process never
            // sees our PID in a file it has just locked.
            let _ = fs::remove_file(&self.path);
            let _ = FileExt::unlock(&file);
        }
    }
}
