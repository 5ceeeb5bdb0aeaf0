//! Filesystem primitives shared by the cache stores.
//!
//! Everything that publishes bytes into a shared directory goes through the
//! write-to-temp-then-rename discipline so concurrent readers never observe a
//! partial file. Deletion helpers never follow symlinks out of the tree they
//! were asked to remove.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Process-wide sequence for staged file and directory names. Combined with
/// the PID this makes every staged name unique across concurrent processes
/// sharing a cache root.
static STAGE_SEQ: AtomicU64 = AtomicU64::new(0);

fn next_stage_seq() -> u64 {
    STAGE_SEQ.fetch_add(1, Ordering::Relaxed)
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Size and modification time of a file, as used for program-id keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub size: u64,
    pub mtime_millis: u64,
}

pub fn file_info(path: &Path) -> io::Result<FileInfo> {
    let meta = fs::metadata(path)?;
    let mtime_millis = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    Ok(FileInfo {
        size: meta.len(),
        mtime_millis,
    })
}

/// Writes `bytes` to `path` atomically: staging file, fsync, rename.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    atomic_write_with(path, |file| file.write_all(bytes))
}

/// Atomic write where the caller streams content into a staging file.
///
/// The destination's parent directory is created if needed. On any failure
/// the staging file is removed; the destination is either untouched or fully
/// replaced.
pub fn atomic_write_with(
    path: &Path,
    write: impl FnOnce(&mut fs::File) -> io::Result<()>,
) -> io::Result<()> {
    let parent = non_empty_parent(path)?;
    fs::create_dir_all(parent)?;

    let (stage, mut file) = open_stage_file(parent)?;
    let written = write(&mut file).and_then(|()| file.sync_all());
    drop(file);

    let published = written.and_then(|()| rename_replace(&stage, path));
    if published.is_err() {
        let _ = fs::remove_file(&stage);
    }
    published
}

/// Staged publishes that lose a rename race to a concurrent writer retry at
/// most this often before giving up.
const PUBLISH_ATTEMPTS: usize = 64;

/// Renames `from` over `to`, replacing an existing destination.
pub fn rename_replace(from: &Path, to: &Path) -> io::Result<()> {
    if !cfg!(windows) {
        return fs::rename(from, to);
    }

    // Windows refuses to rename onto an existing path. Clearing the
    // destination first leaves a window where another writer recreates it,
    // so the remove + rename pair runs a bounded number of times.
    let mut denied = None;
    for _ in 0..PUBLISH_ATTEMPTS {
        match fs::remove_file(to) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        match fs::rename(from, to) {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists || to.exists() => {
                denied = Some(err);
            }
            Err(err) => return Err(err),
        }
    }
    Err(denied.unwrap_or_else(|| io::Error::other("lost every publish race")))
}

/// Opens a fresh staging file in `parent`.
///
/// The name does not reference any destination: a rename only needs the two
/// paths to share a directory, and an anonymous dotfile name keeps crashed
/// leftovers recognizable for housekeeping.
fn open_stage_file(parent: &Path) -> io::Result<(PathBuf, fs::File)> {
    let pid = std::process::id();
    loop {
        let stage = parent.join(format!(".stash-wip.{pid}.{}", next_stage_seq()));
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&stage)
        {
            Ok(file) => return Ok((stage, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
}

/// Hard-links `src` to `dst`, falling back to a copy when linking is not
/// possible (cross-device targets, unsupported filesystems).
pub fn link_or_copy(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::hard_link(src, dst) {
        Ok(()) => Ok(()),
        Err(err) => {
            tracing::debug!(
                target = "stash.fs",
                src = %src.display(),
                dst = %dst.display(),
                error = %err,
                "hard link failed; copying instead"
            );
            fs::copy(src, dst).map(|_| ())
        }
    }
}

/// Creates a uniquely named directory inside `parent`, using the same
/// staged-name sequence as [`atomic_write_with`]'s staging files.
pub fn create_unique_tmp_dir(parent: &Path, prefix: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(parent)?;
    let pid = std::process::id();
    loop {
        let candidate = parent.join(format!("{prefix}.wip.{pid}.{}", next_stage_seq()));
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
}

/// Picks a fresh sibling path for quarantine renames and staged links.
///
/// PID plus the staged-name sequence make the name unique without probing
/// the filesystem.
pub fn unique_sibling_path(parent: &Path, name: &str, suffix: &str) -> PathBuf {
    parent.join(format!(
        "{name}.{suffix}.{}.{}",
        std::process::id(),
        next_stage_seq()
    ))
}

/// Removes a file, logging instead of failing. Returns whether it was removed.
pub fn remove_file_best_effort(path: &Path, stage: &'static str) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(err) if err.kind() == io::ErrorKind::NotFound => false,
        Err(err) => {
            tracing::debug!(
                target = "stash.fs",
                path = %path.display(),
                stage,
                error = %err,
                "failed to remove file"
            );
            false
        }
    }
}

/// Best-effort total size of the files under `root`, never following symlinks.
pub fn dir_size_bytes_nofollow(root: &Path) -> u64 {
    let mut total = 0_u64;
    for entry in walkdir::WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                // Entries can race with concurrent deletion; only log the rest.
                let not_found = err
                    .io_error()
                    .map(|io_err| io_err.kind() == io::ErrorKind::NotFound)
                    .unwrap_or(false);
                if !not_found {
                    tracing::debug!(
                        target = "stash.fs",
                        root = %root.display(),
                        error = %err,
                        "failed to walk directory while computing size"
                    );
                }
                continue;
            }
        };
        let ty = entry.file_type();
        if !(ty.is_file() || ty.is_symlink()) {
            continue;
        }
        let len = match fs::symlink_metadata(entry.path()) {
            Ok(meta) => meta.len(),
            Err(_) => continue,
        };
        total = total.saturating_add(len);
    }
    total
}

/// Recursively deletes `path` without following symlinks.
///
/// A symlink at any level is removed itself; its target is never touched.
pub fn remove_dir_all_nofollow(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if !meta.is_dir() || meta.file_type().is_symlink() {
        return remove_file_or_link(path);
    }

    for entry in walkdir::WalkDir::new(path)
        .follow_links(false)
        .contents_first(true)
    {
        let entry = entry.map_err(io::Error::other)?;
        if entry.file_type().is_dir() {
            fs::remove_dir(entry.path())?;
        } else {
            remove_file_or_link(entry.path())?;
        }
    }
    Ok(())
}

fn remove_file_or_link(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::IsADirectory => fs::remove_dir(path),
        Err(err) => Err(err),
    }
}

fn non_empty_parent(path: &Path) -> io::Result<&Path> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::other("path has no parent"))?;
    Ok(if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    })
}
