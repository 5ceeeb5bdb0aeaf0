//! Advisory cross-process locks keyed by a file path.
//!
//! The lock is an OS-level exclusive lock on a small lock file, so a crashed
//! holder releases it automatically when its file handle disappears. The lock
//! file additionally records the holder's PID and acquisition time; if the
//! file is old and the recorded process is gone, a waiter may steal the lock
//! (covers lock files orphaned on filesystems that drop the OS lock state).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt as _;
use stash_core::fs::now_millis;

use crate::error::{CacheError, Result};

/// A lock file untouched for this long whose owner is dead may be stolen.
const STALE_AFTER_MILLIS: u64 = 30_000;

/// Delay between acquisition attempts.
const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// An exclusive lock held for the lifetime of the value.
///
/// Released on drop; the OS releases it on any abnormal exit as well.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Acquires an exclusive lock on `path`, blocking up to `timeout`.
    ///
    /// The lock file (and its parent directory) are created if needed.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let deadline = Instant::now() + timeout;
        loop {
            let mut file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .open(path)?;

            match file.try_lock_exclusive() {
                Ok(()) => {
                    write_owner_info(&mut file);
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(err) => return Err(err.into()),
            }
            drop(file);

            steal_if_stale(path);

            if Instant::now() >= deadline {
                return Err(CacheError::LockTimeout {
                    path: path.to_path_buf(),
                });
            }
            std::thread::sleep(RETRY_INTERVAL);
        }
    }

    /// Acquires the lock only if the lock file already exists.
    ///
    /// Never creates or writes anything, so it is safe in read-only mode.
    /// `Ok(None)` means no lock file exists, which also means no writer has
    /// ever started mutating the guarded state: a writer creates the lock
    /// file before its first mutation.
    pub fn acquire_existing(path: &Path, timeout: Duration) -> Result<Option<Self>> {
        let deadline = Instant::now() + timeout;
        loop {
            let file = match OpenOptions::new().read(true).write(true).open(path) {
                Ok(file) => file,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(err) => return Err(err.into()),
            };

            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(Some(Self {
                        file,
                        path: path.to_path_buf(),
                    }))
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(err) => return Err(err.into()),
            }

            if Instant::now() >= deadline {
                return Err(CacheError::LockTimeout {
                    path: path.to_path_buf(),
                });
            }
            std::thread::sleep(RETRY_INTERVAL);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn write_owner_info(file: &mut File) {
    // Best effort: the OS lock is authoritative, the recorded owner only
    // feeds stale-lock recovery.
    let info = format!("{}\n{}\n", std::process::id(), now_millis());
    let _ = file.set_len(0);
    let _ = file.seek(SeekFrom::Start(0));
    let _ = file.write_all(info.as_bytes());
    let _ = file.sync_all();
}

/// Removes the lock file if it is old and its recorded owner is not alive.
fn steal_if_stale(path: &Path) {
    let Some((owner_pid, acquired_at)) = read_owner_info(path) else {
        return;
    };
    let age = now_millis().saturating_sub(acquired_at);
    if age < STALE_AFTER_MILLIS {
        return;
    }
    if pid_is_alive(owner_pid) {
        return;
    }

    tracing::warn!(
        target = "stash.lock",
        path = %path.display(),
        owner_pid,
        age_millis = age,
        "removing stale lock file from dead process"
    );
    let _ = std::fs::remove_file(path);
}

fn read_owner_info(path: &Path) -> Option<(u32, u64)> {
    let mut content = String::new();
    File::open(path).ok()?.read_to_string(&mut content).ok()?;
    let mut lines = content.lines();
    let pid = lines.next()?.trim().parse().ok()?;
    let acquired_at = lines.next()?.trim().parse().ok()?;
    Some((pid, acquired_at))
}

#[cfg(unix)]
fn pid_is_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        // The process exists but belongs to another user.
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn pid_is_alive(_pid: u32) -> bool {
    // No portable liveness check; never steal, rely on the OS lock release.
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");

        let lock = FileLock::acquire(&path, Duration::from_secs(1)).unwrap();
        assert_eq!(lock.path(), path);
        drop(lock);

        // Re-acquirable after release.
        FileLock::acquire(&path, Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn contended_lock_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");

        let _held = FileLock::acquire(&path, Duration::from_secs(1)).unwrap();
        let err = FileLock::acquire(&path, Duration::from_millis(120)).unwrap_err();
        assert!(matches!(err, CacheError::LockTimeout { .. }));
    }

    #[test]
    fn lock_records_owner_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");

        let _held = FileLock::acquire(&path, Duration::from_secs(1)).unwrap();
        let (pid, acquired_at) = read_owner_info(&path).unwrap();
        assert_eq!(pid, std::process::id());
        assert!(acquired_at > 0);
    }

    #[test]
    fn released_lock_can_be_taken_from_another_thread() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");

        let lock = FileLock::acquire(&path, Duration::from_secs(1)).unwrap();
        let handle = {
            let path = path.clone();
            std::thread::spawn(move || FileLock::acquire(&path, Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(100));
        drop(lock);
        handle.join().unwrap().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn stale_lock_from_dead_process_is_stolen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");

        // Fabricate a lock file owned by a PID that cannot exist, acquired
        // long ago. There is no OS lock on it, but `acquire` still goes
        // through the stale check before succeeding, so exercise that
        // directly.
        let stale_at = now_millis() - STALE_AFTER_MILLIS - 1_000;
        std::fs::write(&path, format!("{}\n{}\n", u32::MAX - 1, stale_at)).unwrap();

        steal_if_stale(&path);
        assert!(!path.exists(), "stale lock file should have been removed");

        FileLock::acquire(&path, Duration::from_secs(1)).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn fresh_lock_file_is_not_stolen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");
        std::fs::write(&path, format!("{}\n{}\n", u32::MAX - 1, now_millis())).unwrap();

        steal_if_stale(&path);
        assert!(path.exists());
    }

    #[test]
    fn own_pid_is_alive() {
        assert!(pid_is_alive(std::process::id()));
    }
}
