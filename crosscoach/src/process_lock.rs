//! Process-level locks for coordinating concurrent crosscoach-analyze runs.
//!
//! Lock strategy:
//! - `crosscoach-user.lock.<user>` marks a user whose analysis is in flight.
//!   A second process reaching the same user skips it.
//! - `crosscoach-watch.lock` marks an active `--watch` scheduler. Only one
//!   scheduler may run per database.
//! - Locks are advisory OS file locks (flock) scoped by database path.
//! - Lock files stay on disk after release. Only the flock is the lock;
//!   unlinking a file another process has open would let a third process
//!   lock a fresh inode at the same path.

use anyhow::{Context, Result};
use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io::{self, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

const USER_LOCK_FILE: &str = "crosscoach-user.lock";
const WATCH_LOCK_FILE: &str = "crosscoach-watch.lock";

/// Held while one user's analysis runs. Released on drop.
pub struct UserLock {
    _lock: ProcessLock,
}

/// Held for the lifetime of a `--watch` scheduler.
pub struct WatchGuard {
    _lock: ProcessLock,
}

/// Try to claim `user_id` for analysis against the database at `db_path`.
///
/// Returns `Ok(None)` when another process already holds the user.
pub fn try_acquire_user_lock(db_path: &Path, user_id: &str) -> Result<Option<UserLock>> {
    let filename = format!("{}.{}", USER_LOCK_FILE, user_component(user_id));
    Ok(try_acquire_lock(&filename, db_path)?.map(|lock| UserLock { _lock: lock }))
}

/// Acquire the scheduler lock, failing if another watcher is running.
pub fn acquire_watch_guard(db_path: &Path) -> Result<WatchGuard> {
    let lock = acquire_lock(WATCH_LOCK_FILE, db_path).with_context(|| {
        "refusing to start watch mode: another crosscoach-analyze --watch is already running"
    })?;
    Ok(WatchGuard { _lock: lock })
}

struct ProcessLock {
    file: File,
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        let _ = unlock_file(&self.file);
    }
}

fn acquire_lock(filename: &str, db_path: &Path) -> Result<ProcessLock> {
    match try_acquire_lock(filename, db_path)? {
        Some(lock) => Ok(lock),
        None => anyhow::bail!("lock is already held: {}", filename),
    }
}

fn try_acquire_lock(filename: &str, db_path: &Path) -> Result<Option<ProcessLock>> {
    let dir = lock_dir();
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create runtime lock directory: {}", dir.display()))?;

    let path = dir.join(scoped_lock_filename(filename, db_path));
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .with_context(|| format!("failed to open lock file: {}", path.display()))?;

    match lock_file_nonblocking(&file) {
        Ok(()) => {
            // Owner info for debugging
            let _ = file.set_len(0);
            let _ = file.seek(SeekFrom::Start(0));
            let _ = writeln!(file, "pid={}", std::process::id());
            let _ = file.flush();

            Ok(Some(ProcessLock { file }))
        }
        Err(e) if is_lock_busy(&e) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to lock file: {}", path.display())),
    }
}

fn lock_dir() -> PathBuf {
    let mut dir = match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => std::env::temp_dir(),
    };
    dir.push("crosscoach");
    dir
}

fn scoped_lock_filename(base_filename: &str, db_path: &Path) -> String {
    let mut hasher = DefaultHasher::new();
    db_path.to_string_lossy().hash(&mut hasher);
    let digest = hasher.finish();
    format!("{base_filename}.{digest:016x}")
}

/// User ids are free-form; keep readable ones readable and hash the rest.
fn user_component(user_id: &str) -> String {
    let safe = !user_id.is_empty()
        && user_id.len() <= 64
        && user_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if safe {
        return user_id.to_string();
    }

    let mut hasher = DefaultHasher::new();
    user_id.hash(&mut hasher);
    format!("h{:016x}", hasher.finish())
}

fn is_lock_busy(error: &io::Error) -> bool {
    matches!(error.kind(), io::ErrorKind::WouldBlock)
        || matches!(error.raw_os_error(), Some(11) | Some(35))
}

#[cfg(unix)]
fn lock_file_nonblocking(file: &File) -> io::Result<()> {
    const LOCK_EX: i32 = 2;
    const LOCK_NB: i32 = 4;
    let fd = file.as_raw_fd();
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(fd, LOCK_EX | LOCK_NB) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
fn unlock_file(file: &File) -> io::Result<()> {
    const LOCK_UN: i32 = 8;
    let fd = file.as_raw_fd();
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(fd, LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
extern "C" {
    fn flock(fd: i32, operation: i32) -> i32;
}

#[cfg(not(unix))]
compile_error!("crosscoach process locks currently require Unix (macOS/Linux)");
