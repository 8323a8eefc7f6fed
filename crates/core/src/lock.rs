//! Instance Lock: at most one mutating keeper per data directory.
//!
//! The lock is a file created with `create_new`, which fails atomically when
//! the file already exists. It records the holder's pid and acquisition time.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::LockError;

pub const LOCK_FILE_NAME: &str = "keeper.lock";

/// Contents of the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub pid: u32,
    pub acquired_at: i64,
}

pub fn lock_path(dir: &Path) -> PathBuf {
    dir.join(LOCK_FILE_NAME)
}

/// Held lock. Released on [`release`](LockHandle::release) or drop.
#[derive(Debug)]
pub struct LockHandle {
    path: PathBuf,
    record: LockRecord,
    released: bool,
}

impl LockHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self) -> &LockRecord {
        &self.record
    }

    /// Remove the lock file. Removing an already-removed lock is not an error.
    pub fn release(&mut self) -> Result<(), LockError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Instance lock released");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(LockError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(error = %e, "Failed to release instance lock");
        }
    }
}

/// Acquire the lock in `dir`, creating the directory if needed.
pub fn acquire(dir: &Path) -> Result<LockHandle, LockError> {
    let path = lock_path(dir);
    let io_err = |source| LockError::Io {
        path: path.clone(),
        source,
    };

    fs::create_dir_all(dir).map_err(io_err)?;

    let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(LockError::AlreadyLocked {
                holder: describe_holder(&path),
                path: path.clone(),
            });
        }
        Err(e) => return Err(io_err(e)),
    };

    let record = LockRecord {
        pid: std::process::id(),
        acquired_at: chrono::Utc::now().timestamp(),
    };
    let body = serde_json::to_vec(&record).map_err(|e| io_err(e.into()))?;
    let mut handle = LockHandle {
        path: path.clone(),
        record,
        released: false,
    };
    if let Err(e) = file.write_all(&body).and_then(|_| file.sync_all()) {
        // Do not leave a half-written lock behind.
        let _ = handle.release();
        return Err(io_err(e));
    }

    info!(path = %path.display(), pid = handle.record.pid, "Instance lock acquired");
    Ok(handle)
}

/// Unconditionally remove the lock in `dir`. Returns whether a lock existed.
///
/// If the recorded holder is still alive, two keepers may now race.
pub fn force_clear(dir: &Path) -> Result<bool, LockError> {
    let path = lock_path(dir);
    let holder = describe_holder(&path);
    match fs::remove_file(&path) {
        Ok(()) => {
            warn!(
                path = %path.display(),
                holder = %holder,
                "Instance lock force-cleared; if that keeper is still running, two processes may now race"
            );
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "No instance lock to clear");
            Ok(false)
        }
        Err(source) => Err(LockError::Io { path, source }),
    }
}

fn describe_holder(path: &Path) -> String {
    match fs::read(path)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<LockRecord>(&bytes).ok())
    {
        Some(record) => {
            let since = chrono::DateTime::from_timestamp(record.acquired_at, 0)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| record.acquired_at.to_string());
            format!("pid {} since {since}", record.pid)
        }
        None => "unknown holder".to_string(),
    }
}
