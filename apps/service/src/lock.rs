use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another cycle holds {0}")]
    Busy(PathBuf),
    #[error("failed to create lock {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// Exclusive marker file keeping two cycles from touching the state store
/// at once. Removed on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Take the lock. A lock file older than `stale_after` is assumed to be
    /// left over from a crashed run and is replaced.
    pub fn acquire(path: impl Into<PathBuf>, stale_after: Duration) -> Result<Self, LockError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| LockError::Io { path: path.clone(), source })?;
        }

        match Self::create(&path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if !is_stale(&path, stale_after) {
                    return Err(LockError::Busy(path));
                }
                warn!("Breaking stale run lock {}", path.display());
                match break_stale(&path, stale_after) {
                    Ok(true) => {}
                    Ok(false) => return Err(LockError::Busy(path)),
                    Err(source) => return Err(LockError::Io { path, source }),
                }
                Self::create(&path).map_err(|e| match e.kind() {
                    io::ErrorKind::AlreadyExists => LockError::Busy(path.clone()),
                    _ => LockError::Io { path: path.clone(), source: e },
                })
            }
            Err(source) => Err(LockError::Io { path, source }),
        }
    }

    fn create(path: &Path) -> io::Result<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Self { path: path.to_path_buf() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to release run lock {}: {}", self.path.display(), e);
        }
    }
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age >= stale_after)
}

/// Move a stale lock aside and only delete it if it is still stale there, so
/// a lock another process took over in between is put back rather than lost.
/// Returns whether `path` is free to create.
fn break_stale(path: &Path, stale_after: Duration) -> io::Result<bool> {
    let aside = path.with_extension(format!("stale.{}", std::process::id()));
    match fs::rename(path, &aside) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e),
    }

    if is_stale(&aside, stale_after) {
        fs::remove_file(&aside)?;
        return Ok(true);
    }

    if let Err(e) = fs::hard_link(&aside, path) {
        warn!("Failed to restore run lock {}: {}", path.display(), e);
    }
    fs::remove_file(&aside)?;
    Ok(false)
}
