use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{CipherdeskError, Result};

/// Process-wide exclusive lock: only one application instance (and so one
/// worker and one port) exists at a time.
///
/// Uses a non-blocking flock(2) on a lock file. The lock is released when
/// the guard is dropped, or by the OS if the process dies.
#[derive(Debug)]
pub struct InstanceGuard {
    path: PathBuf,
    _file: fs::File,
}

impl InstanceGuard {
    /// Take the lock, or fail with `AlreadyRunning` if another instance holds it.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;

        if !try_lock_exclusive(&file)? {
            return Err(CipherdeskError::AlreadyRunning {
                path: path.to_path_buf(),
            });
        }

        // Holder pid, for diagnostics only.
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;

        tracing::debug!(path = %path.display(), "instance lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(self) {
        tracing::debug!(path = %self.path.display(), "instance lock released");
    }
}

#[cfg(unix)]
fn try_lock_exclusive(file: &fs::File) -> Result<bool> {
    use std::os::unix::io::AsRawFd;
    let fd = file.as_raw_fd();
    let ret = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
    if ret == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.kind() == std::io::ErrorKind::WouldBlock {
        Ok(false)
    } else {
        Err(CipherdeskError::Io(err))
    }
}

#[cfg(not(unix))]
fn try_lock_exclusive(_file: &fs::File) -> Result<bool> {
    // No advisory locking on non-Unix platforms
    Ok(true)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_acquire_fails_while_held() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("app.lock");

        let first = InstanceGuard::acquire(&path).unwrap();
        let err = InstanceGuard::acquire(&path).unwrap_err();
        assert!(matches!(err, CipherdeskError::AlreadyRunning { .. }));
        drop(first);
    }

    #[test]
    fn released_lock_can_be_retaken() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("app.lock");

        let first = InstanceGuard::acquire(&path).unwrap();
        first.release();
        let second = InstanceGuard::acquire(&path).unwrap();
        assert_eq!(second.path(), path.as_path());
    }

    #[test]
    fn lock_file_records_holder_pid() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("app.lock");
        let _guard = InstanceGuard::acquire(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
    }
}
