//! Per-project single-writer lock with PID-based stale detection.
//!
//! The lock is a file (`<project>/.pipeline.lock`) whose only content is the
//! decimal PID of the holder. A lock whose PID is no longer running is stale
//! and any contender may reclaim it; a lock whose content is not a PID is
//! corrupt and treated the same way. There is no lease or TTL.
//!
//! Reading the file, probing the PID and writing the new record are separate
//! filesystem operations, so two contenders can both see a stale lock. The
//! write step links a fully written temp file into place, which fails if the
//! lock reappeared in the meantime; that narrows the window but is not a
//! linearizable lock.
//!
//! On filesystems without hard links the write falls back to an exclusive
//! create followed by the PID write. A contender reading in between sees an
//! empty file, treats it as corrupt and may remove it, so the window there
//! is wider.

use crate::errors::LockError;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Lock file name inside the project directory.
pub const LOCK_FILE_NAME: &str = ".pipeline.lock";

/// Reclaim attempts before a contended lock is reported as busy.
const MAX_ROUNDS: usize = 3;

/// Distinguishes temp files of threads sharing a PID.
static TEMP_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Path of the lock file for a project directory.
pub fn lock_path(project_dir: &Path) -> PathBuf {
    project_dir.join(LOCK_FILE_NAME)
}

/// Whether a process with this PID currently exists. Sends no signal.
pub fn is_process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    #[cfg(unix)]
    {
        // SAFETY: signal 0 performs the existence and permission checks
        // without delivering anything. pid is positive, so this never
        // addresses a process group.
        if unsafe { libc::kill(pid, 0) } == 0 {
            return true;
        }
        // EPERM: the process exists but belongs to someone else.
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

/// Lock file content. Bytes that are not UTF-8 come back replaced, so they
/// fail to parse as a PID and the lock counts as corrupt.
fn read_lock(path: &Path) -> std::io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// PID recorded in the lock file, if it holds a valid one.
pub fn read_holder(path: &Path) -> Option<u32> {
    read_lock(path).ok()?.trim().parse().ok()
}

enum Outcome {
    Acquired,
    Held(u32),
}

/// Try to take the lock at `path` for this process.
///
/// Returns `Ok(false)` when a live process holds it. That is an answer, not
/// an error; the caller decides what to do (normally exit without working).
pub fn acquire(path: &Path) -> Result<bool, LockError> {
    Ok(matches!(try_acquire(path)?, Outcome::Acquired))
}

/// Remove the lock file. Removing an absent lock is not an error.
pub fn release(path: &Path) -> Result<(), LockError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(LockError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn try_acquire(path: &Path) -> Result<Outcome, LockError> {
    let io_err = |source| LockError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut last_holder = 0;

    for _ in 0..MAX_ROUNDS {
        match read_lock(path) {
            Err(e) if e.kind() == ErrorKind::NotFound => {
                match write_exclusive(path, std::process::id()) {
                    Ok(()) => {
                        tracing::debug!(path = %path.display(), "lock acquired");
                        return Ok(Outcome::Acquired);
                    }
                    // Another contender got there first; look at what it wrote.
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                    Err(e) => return Err(io_err(e)),
                }
            }
            Err(e) => return Err(io_err(e)),
            Ok(content) => match content.trim().parse::<u32>() {
                Ok(pid) if is_process_alive(pid) => return Ok(Outcome::Held(pid)),
                Ok(pid) => {
                    tracing::warn!(pid, path = %path.display(), "removing stale lock (holder is dead)");
                    last_holder = pid;
                    release(path)?;
                }
                Err(_) => {
                    tracing::warn!(path = %path.display(), "removing corrupt lock file");
                    release(path)?;
                }
            },
        }
    }

    Ok(Outcome::Held(read_holder(path).unwrap_or(last_holder)))
}

/// Create `path` containing `pid`, failing with `AlreadyExists` if it exists.
fn write_exclusive(path: &Path, pid: u32) -> std::io::Result<()> {
    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let tmp = path.with_extension(format!("lock.{}.{}.tmp", pid, seq));
    fs::write(&tmp, pid.to_string())?;
    let linked = fs::hard_link(&tmp, path);
    let _ = fs::remove_file(&tmp);
    match linked {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(e),
        // Filesystems without hard links
        Err(_) => create_exclusive(path, pid),
    }
}

/// Exclusive create, then write. Briefly visible as an empty file.
fn create_exclusive(path: &Path, pid: u32) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(pid.to_string().as_bytes())
}

/// A held project lock, released when dropped.
///
/// Holding the guard for the whole run means the lock is released on every
/// exit path: normal return, `?` propagation, panic unwinding, or a
/// cancelled future.
#[derive(Debug)]
pub struct ProjectLock {
    path: PathBuf,
    released: bool,
}

impl ProjectLock {
    /// Acquire the lock file at `path`, or report the live holder.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, LockError> {
        let path = path.into();
        match try_acquire(&path)? {
            Outcome::Acquired => Ok(Self {
                path,
                released: false,
            }),
            Outcome::Held(pid) => Err(LockError::Busy { pid, path }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release now and surface any I/O error instead of logging it.
    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        release(&self.path)
    }
}

impl Drop for ProjectLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = release(&self.path) {
            tracing::warn!("failed to release lock: {}", e);
        } else {
            tracing::debug!(path = %self.path.display(), "lock released");
        }
    }
}
