//! Cross-process advisory write lock.
//!
//! `FileLock` guards a lock file with an OS advisory lock (via `fs4`).
//! Acquisition is bounded by a timeout and fails with `LOCKED` if the
//! lock isn't free in time. The holder's token is recorded in the lock
//! file itself so a contending process can report who holds it.

use crate::error::{EngineError, Result};
use fs4::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct FileLock {
    path: PathBuf,
}

/// RAII guard: the lock is released when this is dropped, on every
/// exit path including panics unwinding through it.
pub struct FileLockGuard {
    file: File,
    path: PathBuf,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Blocks (polling) until the lock is acquired or `timeout`
    /// elapses, in which case it returns `LOCKED` carrying the current
    /// holder token if one is recorded.
    pub fn acquire(&self, holder: &str, timeout: Duration) -> Result<FileLockGuard> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).read(true).write(true).open(&self.path)?;

        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    let mut f = file;
                    f.set_len(0)?;
                    f.seek(SeekFrom::Start(0))?;
                    f.write_all(holder.as_bytes())?;
                    f.flush()?;
                    return Ok(FileLockGuard { file: f, path: self.path.clone() });
                }
                Err(_) => {
                    if Instant::now() >= deadline {
                        let holder = Self::read_holder(&self.path).unwrap_or_else(|| "unknown".to_string());
                        return Err(EngineError::locked(format!("lock held by '{holder}'")));
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
            }
        }
    }

    fn read_holder(path: &Path) -> Option<String> {
        let mut f = File::open(path).ok()?;
        let mut s = String::new();
        f.read_to_string(&mut s).ok()?;
        if s.is_empty() {
            None
        } else {
            Some(s)
        }
    }

    /// The token currently recorded in the lock file, if any —
    /// observable by peers without acquiring the lock themselves.
    pub fn current_holder(&self) -> Option<String> {
        Self::read_holder(&self.path)
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        let _ = std::fs::write(&self.path, b"");
    }
}
