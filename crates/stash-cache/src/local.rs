//! The local content-addressed cache store.
//!
//! Entries live under `<root>/<xx>/<fingerprint>/` where `xx` is the first
//! hex byte of the fingerprint. Each bucket has a `.lock` file; only the lock
//! holder may mutate the bucket. Commits build the entry in a temp directory
//! inside the bucket and publish it with a single rename, so readers observe
//! either a complete entry or none. Eviction is serialized by a root-level
//! housekeeping lock and removes least-recently-used entries via a quarantine
//! rename followed by deletion.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use stash_core::fs::{
    atomic_write, atomic_write_with, create_unique_tmp_dir, dir_size_bytes_nofollow, file_info,
    now_millis, remove_dir_all_nofollow, rename_replace, unique_sibling_path,
};
use stash_core::Config;

use crate::direct::DirectRecord;
use crate::entry::{
    BlobDescriptor, CacheEntry, CompressionMode, EntryManifest, ExpectedFiles, MANIFEST_FILENAME,
    MANIFEST_SCHEMA_VERSION,
};
use crate::error::{CacheError, Result};
use crate::fingerprint::Fingerprint;
use crate::lock::FileLock;
use crate::pack;

const BUCKET_LOCK_FILENAME: &str = ".lock";
const HOUSEKEEPING_LOCK_FILENAME: &str = ".housekeeping.lock";
const STAMP_FILENAME: &str = ".last_used";
const DM_SUBDIR: &str = "dm";
const PRGID_SUBDIR: &str = "prgid";
const TRASH_SUBDIR: &str = "trash";

/// Blob compression level; per-compilation payloads favor speed.
const BLOB_ZSTD_LEVEL: i32 = 3;

/// Eviction drains the store to this fraction of the size bound so every
/// commit does not immediately re-trigger a sweep.
const EVICTION_TARGET_NUMERATOR: u64 = 9;
const EVICTION_TARGET_DENOMINATOR: u64 = 10;

/// How a hit materializes files at their target paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlacementOptions {
    /// Prefer hard links from the cache to the target when possible.
    pub hard_links: bool,
    /// Create missing parent directories of target paths.
    pub create_dirs: bool,
}

/// The captured process outputs replayed on a hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedOutputs {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Outcome of a cache probe.
#[derive(Debug)]
pub enum Lookup {
    Hit(CachedOutputs),
    Miss,
}

impl Lookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }
}

/// Summary of a housekeeping sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HousekeepingReport {
    /// Committed entries evicted by the LRU pass.
    pub evicted_entries: usize,
    /// Partial or corrupt directories removed.
    pub removed_leftovers: usize,
    pub freed_bytes: u64,
    /// Total size of committed entries after the sweep.
    pub total_bytes: u64,
}

enum Materialized {
    Done(CachedOutputs),
    /// The manifest lacks a required file id; a plain miss.
    Incomplete,
    /// Malformed manifest or missing blob; the entry should be quarantined.
    Corrupt(String),
}

/// The local on-disk cache store.
#[derive(Debug, Clone)]
pub struct LocalCache {
    root: PathBuf,
    max_size: u64,
    lock_timeout: Duration,
    read_only: bool,
}

impl LocalCache {
    pub fn new(config: &Config) -> Self {
        Self {
            root: config.cache_dir.clone(),
            max_size: config.max_cache_size,
            lock_timeout: Duration::from_millis(config.lock_timeout_millis),
            read_only: config.read_only,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of the program-id data store under this cache root.
    pub fn program_id_store_dir(&self) -> PathBuf {
        self.root.join(PRGID_SUBDIR)
    }

    /// Commits a cache entry under `pf`.
    ///
    /// Blobs are captured from the expected files' target paths. If another
    /// process committed the same fingerprint first, the commit is silently
    /// dropped. After a successful commit the size bound is enforced.
    pub fn add(
        &self,
        pf: &Fingerprint,
        entry: &CacheEntry,
        expected: &ExpectedFiles,
        allow_hard_links: bool,
    ) -> Result<()> {
        if self.read_only {
            return Err(CacheError::ReadOnly);
        }

        let bucket = self.bucket_dir(pf);
        let entry_dir = self.entry_dir(pf);
        {
            let _lock = self.lock_bucket(&bucket)?;
            if entry_dir.exists() {
                tracing::debug!(
                    target = "stash.cache",
                    fingerprint = %pf,
                    "entry already committed by another process"
                );
                return Ok(());
            }

            let tmp = create_unique_tmp_dir(&bucket, "commit")?;
            match self.populate_commit_dir(&tmp, entry, expected, allow_hard_links) {
                Ok(()) => {}
                Err(err) => {
                    let _ = remove_dir_all_nofollow(&tmp);
                    return Err(err);
                }
            }

            match std::fs::rename(&tmp, &entry_dir) {
                Ok(()) => {}
                Err(_) if entry_dir.exists() => {
                    let _ = remove_dir_all_nofollow(&tmp);
                }
                Err(err) => {
                    let _ = remove_dir_all_nofollow(&tmp);
                    return Err(err.into());
                }
            }
        }

        self.maybe_evict();
        Ok(())
    }

    /// Probes for `pf` and, on a hit, places the expected files and returns
    /// the captured outputs. Corrupt entries are quarantined and read as
    /// misses.
    pub fn lookup(
        &self,
        pf: &Fingerprint,
        expected: &ExpectedFiles,
        options: &PlacementOptions,
    ) -> Result<Lookup> {
        let bucket = self.bucket_dir(pf);
        let entry_dir = self.entry_dir(pf);

        let _lock = self.lock_bucket_for_read(&bucket)?;
        if !entry_dir.join(MANIFEST_FILENAME).exists() {
            return Ok(Lookup::Miss);
        }

        match materialize_entry(&entry_dir, expected, options)? {
            Materialized::Done(outputs) => {
                self.touch(&entry_dir);
                Ok(Lookup::Hit(outputs))
            }
            Materialized::Incomplete => Ok(Lookup::Miss),
            Materialized::Corrupt(reason) => {
                tracing::warn!(
                    target = "stash.cache",
                    fingerprint = %pf,
                    reason,
                    "quarantining corrupt cache entry"
                );
                if !self.read_only {
                    self.quarantine(&entry_dir, pf.as_str());
                }
                Ok(Lookup::Miss)
            }
        }
    }

    /// Resolves a direct fingerprint to its preprocessor fingerprint and
    /// delegates to [`Self::lookup`]. The record must still pin the current
    /// contents of every implicit input; otherwise it is stale and ignored.
    pub fn lookup_direct(
        &self,
        df: &Fingerprint,
        expected: &ExpectedFiles,
        options: &PlacementOptions,
    ) -> Result<Lookup> {
        let Some(record) = self.read_direct_record(df) else {
            return Ok(Lookup::Miss);
        };
        if !record.still_valid() {
            tracing::debug!(
                target = "stash.cache",
                fingerprint = %df,
                "direct-mode record is stale"
            );
            return Ok(Lookup::Miss);
        }
        self.lookup(&record.result, expected, options)
    }

    /// Stores (or replaces) the direct-mode record `df → pf`.
    ///
    /// The record pins the current contents of `implicit_inputs`; if any of
    /// them cannot be read the record is not written.
    pub fn add_direct(
        &self,
        df: &Fingerprint,
        pf: &Fingerprint,
        implicit_inputs: &[PathBuf],
    ) -> Result<()> {
        if self.read_only {
            return Err(CacheError::ReadOnly);
        }
        let Some(record) = DirectRecord::capture(pf.clone(), implicit_inputs) else {
            tracing::debug!(
                target = "stash.cache",
                fingerprint = %df,
                "skipping direct-mode record: implicit input unreadable"
            );
            return Ok(());
        };

        let dir = self.direct_bucket_dir(df);
        let _lock = FileLock::acquire(&dir.join(BUCKET_LOCK_FILENAME), self.lock_timeout)?;
        atomic_write(&self.direct_record_path(df), &serde_json::to_vec(&record)?)?;
        Ok(())
    }

    /// Removes crash leftovers and enforces the size bound.
    ///
    /// Holds the housekeeping lock for the duration and each bucket's lock
    /// only while mutating that bucket; bucket locks are never nested.
    pub fn housekeeping(&self) -> Result<HousekeepingReport> {
        if self.read_only {
            return Err(CacheError::ReadOnly);
        }

        let _hk = FileLock::acquire(
            &self.root.join(HOUSEKEEPING_LOCK_FILENAME),
            self.lock_timeout,
        )?;

        let mut report = HousekeepingReport::default();
        self.empty_trash();

        let prgid = crate::data_store::DataStore::new(
            self.program_id_store_dir(),
            self.lock_timeout,
            self.read_only,
        );
        match prgid.sweep() {
            Ok(removed) if removed > 0 => {
                tracing::debug!(
                    target = "stash.cache",
                    removed,
                    "expired program-id items removed"
                );
            }
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(
                    target = "stash.cache",
                    error = %err,
                    "program-id store sweep failed"
                );
            }
        }

        let mut entries = Vec::new();
        for bucket in self.bucket_dirs()? {
            let _lock = self.lock_bucket(&bucket)?;
            self.scan_bucket(&bucket, &mut entries, &mut report);
        }

        let mut total: u64 = entries.iter().map(|e| e.size).sum();
        let target = self
            .max_size
            .saturating_mul(EVICTION_TARGET_NUMERATOR)
            .checked_div(EVICTION_TARGET_DENOMINATOR)
            .unwrap_or(self.max_size);

        if total > self.max_size {
            entries.sort_by(|a, b| {
                a.last_used
                    .cmp(&b.last_used)
                    .then_with(|| a.path.cmp(&b.path))
            });
            for victim in entries.iter() {
                if total <= target {
                    break;
                }
                let bucket = victim
                    .path
                    .parent()
                    .unwrap_or(&self.root)
                    .to_path_buf();
                {
                    let _lock = self.lock_bucket(&bucket)?;
                    if !victim.path.exists() {
                        continue;
                    }
                    self.quarantine(&victim.path, &victim.name);
                }
                total = total.saturating_sub(victim.size);
                report.evicted_entries += 1;
                report.freed_bytes = report.freed_bytes.saturating_add(victim.size);
            }
            self.empty_trash();
        }

        report.total_bytes = total;
        Ok(report)
    }

    /// Packs the committed entry for `pf` for remote transfer.
    pub fn export_archive(&self, pf: &Fingerprint) -> Result<Option<Vec<u8>>> {
        let bucket = self.bucket_dir(pf);
        let entry_dir = self.entry_dir(pf);

        let _lock = self.lock_bucket_for_read(&bucket)?;
        if !entry_dir.join(MANIFEST_FILENAME).exists() {
            return Ok(None);
        }
        pack::pack_dir(&entry_dir).map(Some)
    }

    /// Installs a packed entry fetched from a remote tier.
    ///
    /// Returns `false` (without installing) when the archive does not contain
    /// a usable manifest. An already-present entry wins over the archive.
    pub fn install_archive(&self, pf: &Fingerprint, archive: &[u8]) -> Result<bool> {
        if self.read_only {
            return Err(CacheError::ReadOnly);
        }

        let bucket = self.bucket_dir(pf);
        let entry_dir = self.entry_dir(pf);

        let _lock = self.lock_bucket(&bucket)?;
        if entry_dir.join(MANIFEST_FILENAME).exists() {
            return Ok(true);
        }

        let tmp = create_unique_tmp_dir(&bucket, "install")?;
        let installed = (|| -> Result<bool> {
            pack::unpack_into(archive, &tmp)?;
            match read_manifest(&tmp) {
                Ok(manifest) if manifest.is_compatible() => {}
                _ => return Ok(false),
            }
            match std::fs::rename(&tmp, &entry_dir) {
                Ok(()) => Ok(true),
                Err(_) if entry_dir.exists() => {
                    let _ = remove_dir_all_nofollow(&tmp);
                    Ok(true)
                }
                Err(err) => Err(err.into()),
            }
        })();

        if tmp.exists() {
            let _ = remove_dir_all_nofollow(&tmp);
        }
        installed
    }

    /// Materializes an entry directory that lives outside the cache root
    /// (read-only mode serving a remote hit from scratch space).
    pub(crate) fn materialize_external(
        &self,
        entry_dir: &Path,
        expected: &ExpectedFiles,
        options: &PlacementOptions,
    ) -> Result<Lookup> {
        match materialize_entry(entry_dir, expected, options)? {
            Materialized::Done(outputs) => Ok(Lookup::Hit(outputs)),
            Materialized::Incomplete | Materialized::Corrupt(_) => Ok(Lookup::Miss),
        }
    }

    fn populate_commit_dir(
        &self,
        tmp: &Path,
        entry: &CacheEntry,
        expected: &ExpectedFiles,
        allow_hard_links: bool,
    ) -> Result<()> {
        let mut files = BTreeMap::new();
        for (index, file_id) in entry.file_ids.iter().enumerate() {
            let expected_file = expected.get(file_id).ok_or_else(|| {
                CacheError::Io(std::io::Error::other(format!(
                    "file id {file_id:?} is not among the expected files"
                )))
            })?;
            let source = &expected_file.path;
            if !source.exists() {
                if expected_file.required {
                    return Err(CacheError::MissingSourceFile {
                        path: source.clone(),
                    });
                }
                continue;
            }

            let blob = format!("blob-{index:04}");
            let size = file_info(source)?.size;
            let compressed = entry.compression == CompressionMode::All;
            let dest = tmp.join(&blob);
            if compressed {
                let mut out = File::create(&dest)?;
                zstd::stream::copy_encode(File::open(source)?, &mut out, BLOB_ZSTD_LEVEL)?;
            } else if allow_hard_links {
                stash_core::fs::link_or_copy(source, &dest)?;
            } else {
                std::fs::copy(source, &dest)?;
            }

            files.insert(
                file_id.clone(),
                BlobDescriptor {
                    blob,
                    compressed,
                    size,
                },
            );
        }

        let manifest = EntryManifest {
            schema_version: MANIFEST_SCHEMA_VERSION,
            exit_code: entry.exit_code,
            stdout: entry.stdout.clone(),
            stderr: entry.stderr.clone(),
            files,
        };
        atomic_write(&tmp.join(MANIFEST_FILENAME), &serde_json::to_vec(&manifest)?)?;
        atomic_write(&tmp.join(STAMP_FILENAME), now_millis().to_string().as_bytes())?;
        Ok(())
    }

    fn maybe_evict(&self) {
        let total = dir_size_bytes_nofollow(&self.root);
        if total <= self.max_size {
            return;
        }
        if let Err(err) = self.housekeeping() {
            tracing::warn!(
                target = "stash.cache",
                root = %self.root.display(),
                error = %err,
                "eviction sweep failed"
            );
        }
    }

    fn scan_bucket(
        &self,
        bucket: &Path,
        entries: &mut Vec<ScannedEntry>,
        report: &mut HousekeepingReport,
    ) {
        let Ok(children) = std::fs::read_dir(bucket) else {
            return;
        };
        for child in children.flatten() {
            let path = child.path();
            let name = child.file_name().to_string_lossy().to_string();
            if name == BUCKET_LOCK_FILENAME {
                continue;
            }
            if !path.is_dir() {
                // Staging files orphaned by a crashed writer.
                if name.starts_with(".stash-wip.") {
                    stash_core::fs::remove_file_best_effort(&path, "bucket.stage_leftover");
                }
                continue;
            }

            if matches!(read_manifest(&path), Ok(m) if m.is_compatible()) {
                let size = dir_size_bytes_nofollow(&path);
                entries.push(ScannedEntry {
                    last_used: read_stamp(&path),
                    size,
                    name,
                    path,
                });
            } else {
                // Crashed commits, corrupt entries, and entries written by an
                // incompatible schema. In-flight commits are impossible here:
                // their temp dirs only exist while the committer holds the
                // bucket lock we are holding now.
                let size = dir_size_bytes_nofollow(&path);
                tracing::debug!(
                    target = "stash.cache",
                    path = %path.display(),
                    "removing partial, corrupt or incompatible cache directory"
                );
                if remove_dir_all_nofollow(&path).is_ok() {
                    report.removed_leftovers += 1;
                    report.freed_bytes = report.freed_bytes.saturating_add(size);
                }
            }
        }
    }

    fn bucket_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut buckets = Vec::new();
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(buckets),
            Err(err) => return Err(err.into()),
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let is_bucket =
                name.len() == 2 && name.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase());
            if is_bucket && entry.path().is_dir() {
                buckets.push(entry.path());
            }
        }
        buckets.sort();
        Ok(buckets)
    }

    fn touch(&self, entry_dir: &Path) {
        if self.read_only {
            return;
        }
        if let Err(err) = atomic_write(
            &entry_dir.join(STAMP_FILENAME),
            now_millis().to_string().as_bytes(),
        ) {
            tracing::debug!(
                target = "stash.cache",
                path = %entry_dir.display(),
                error = %err,
                "failed to update recency stamp"
            );
        }
    }

    /// Renames the entry into `trash/` and then deletes it, so concurrent
    /// readers never observe a half-deleted entry.
    fn quarantine(&self, entry_dir: &Path, name: &str) {
        let trash = self.root.join(TRASH_SUBDIR);
        if std::fs::create_dir_all(&trash).is_err() {
            return;
        }
        let grave = unique_sibling_path(&trash, name, "evict");
        match std::fs::rename(entry_dir, &grave) {
            Ok(()) => {
                let _ = remove_dir_all_nofollow(&grave);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(_) => {
                // Rename failed (e.g. open handles on Windows); degrade to
                // in-place removal.
                let _ = remove_dir_all_nofollow(entry_dir);
            }
        }
    }

    fn empty_trash(&self) {
        let trash = self.root.join(TRASH_SUBDIR);
        let Ok(children) = std::fs::read_dir(&trash) else {
            return;
        };
        for child in children.flatten() {
            let _ = remove_dir_all_nofollow(&child.path());
        }
    }

    fn read_direct_record(&self, df: &Fingerprint) -> Option<DirectRecord> {
        let path = self.direct_record_path(df);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                tracing::debug!(
                    target = "stash.cache",
                    path = %path.display(),
                    error = %err,
                    "failed to read direct-mode record"
                );
                return None;
            }
        };
        match serde_json::from_slice::<DirectRecord>(&bytes) {
            Ok(record) if record.is_compatible() => Some(record),
            _ => {
                if !self.read_only {
                    if let Ok(_lock) = FileLock::acquire(
                        &self.direct_bucket_dir(df).join(BUCKET_LOCK_FILENAME),
                        self.lock_timeout,
                    ) {
                        stash_core::fs::remove_file_best_effort(&path, "direct.corrupt");
                    }
                }
                None
            }
        }
    }

    /// Lock for mutating a bucket. Creates the lock file if needed.
    fn lock_bucket(&self, bucket: &Path) -> Result<FileLock> {
        FileLock::acquire(&bucket.join(BUCKET_LOCK_FILENAME), self.lock_timeout)
    }

    /// Lock for reading a bucket.
    ///
    /// In read-only mode nothing may be created under the cache root, so the
    /// lock is taken only when its file already exists. A missing lock file
    /// means no writer has ever touched the bucket, making the lock-free read
    /// equivalent to a miss-or-consistent view.
    fn lock_bucket_for_read(&self, bucket: &Path) -> Result<Option<FileLock>> {
        if self.read_only {
            FileLock::acquire_existing(&bucket.join(BUCKET_LOCK_FILENAME), self.lock_timeout)
        } else {
            self.lock_bucket(bucket).map(Some)
        }
    }

    fn bucket_dir(&self, fp: &Fingerprint) -> PathBuf {
        self.root.join(fp.bucket())
    }

    fn entry_dir(&self, fp: &Fingerprint) -> PathBuf {
        self.bucket_dir(fp).join(fp.as_str())
    }

    fn direct_bucket_dir(&self, df: &Fingerprint) -> PathBuf {
        self.root.join(DM_SUBDIR).join(df.bucket())
    }

    fn direct_record_path(&self, df: &Fingerprint) -> PathBuf {
        self.direct_bucket_dir(df).join(format!("{df}.json"))
    }
}

#[derive(Debug)]
struct ScannedEntry {
    last_used: u64,
    size: u64,
    name: String,
    path: PathBuf,
}

fn read_manifest(entry_dir: &Path) -> Result<EntryManifest> {
    let bytes = std::fs::read(entry_dir.join(MANIFEST_FILENAME))?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn read_stamp(entry_dir: &Path) -> u64 {
    let path = entry_dir.join(STAMP_FILENAME);
    if let Some(millis) = std::fs::read_to_string(&path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
    {
        return millis;
    }
    file_info(entry_dir).map(|info| info.mtime_millis).unwrap_or(0)
}

fn materialize_entry(
    entry_dir: &Path,
    expected: &ExpectedFiles,
    options: &PlacementOptions,
) -> Result<Materialized> {
    let manifest = match read_manifest(entry_dir) {
        Ok(manifest) => manifest,
        Err(err) => return Ok(Materialized::Corrupt(err.to_string())),
    };
    if !manifest.is_compatible() {
        // Owned by a different schema; not ours to quarantine.
        return Ok(Materialized::Incomplete);
    }

    for (file_id, expected_file) in expected {
        if expected_file.required && !manifest.files.contains_key(file_id) {
            return Ok(Materialized::Incomplete);
        }
    }

    for (file_id, expected_file) in expected {
        let Some(descriptor) = manifest.files.get(file_id) else {
            continue;
        };
        let blob = entry_dir.join(&descriptor.blob);
        if !blob.exists() {
            return Ok(Materialized::Corrupt(format!(
                "blob {} for file id {file_id:?} is missing",
                descriptor.blob
            )));
        }

        let target = &expected_file.path;
        if options.create_dirs {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        place_blob(&blob, target, descriptor.compressed, options.hard_links)?;
    }

    Ok(Materialized::Done(CachedOutputs {
        exit_code: manifest.exit_code,
        stdout: manifest.stdout,
        stderr: manifest.stderr,
    }))
}

/// Places a blob at its target path without exposing a partial file.
fn place_blob(blob: &Path, target: &Path, compressed: bool, hard_links: bool) -> Result<()> {
    if compressed {
        atomic_write_with(target, |out| {
            zstd::stream::copy_decode(File::open(blob)?, out)
        })?;
        return Ok(());
    }

    if hard_links {
        let parent = target.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(parent) = parent {
            let staged = unique_sibling_path(
                parent,
                &target
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "target".to_string()),
                "place",
            );
            if std::fs::hard_link(blob, &staged).is_ok() {
                if let Err(err) = rename_replace(&staged, target) {
                    let _ = std::fs::remove_file(&staged);
                    return Err(err.into());
                }
                return Ok(());
            }
            // Cross-device or unsupported; fall through to a copy.
        }
    }

    atomic_write_with(target, |out| {
        std::io::copy(&mut File::open(blob)?, out).map(|_| ())
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_parse_falls_back_to_mtime() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(STAMP_FILENAME), "not a number").unwrap();
        assert!(read_stamp(dir.path()) > 0);
    }

    #[test]
    fn stamp_reads_recorded_millis() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(STAMP_FILENAME), "12345").unwrap();
        assert_eq!(read_stamp(dir.path()), 12345);
    }

    #[test]
    fn place_blob_plain_copy() {
        let dir = tempfile::tempdir().unwrap();
        let blob = dir.path().join("blob");
        let target = dir.path().join("out").join("foo.o");
        std::fs::write(&blob, b"object").unwrap();
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();

        place_blob(&blob, &target, false, false).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"object");
    }

    #[test]
    fn place_blob_decompresses() {
        let dir = tempfile::tempdir().unwrap();
        let blob = dir.path().join("blob");
        let target = dir.path().join("foo.o");

        let mut out = File::create(&blob).unwrap();
        zstd::stream::copy_encode(&b"object bytes"[..], &mut out, BLOB_ZSTD_LEVEL).unwrap();
        drop(out);

        place_blob(&blob, &target, true, false).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"object bytes");
    }

    #[test]
    fn place_blob_hard_link_replaces_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let blob = dir.path().join("blob");
        let target = dir.path().join("foo.o");
        std::fs::write(&blob, b"new").unwrap();
        std::fs::write(&target, b"old").unwrap();

        place_blob(&blob, &target, false, true).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"new");
    }
}
