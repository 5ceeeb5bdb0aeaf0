//! Packing a committed entry directory into a single `tar.zst` payload for
//! remote transfer, and unpacking such a payload back into a directory.
//!
//! Archives are flat: regular files only, no subdirectories, no absolute or
//! parent-relative names. Anything else is rejected on unpack.

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};

use tar::EntryType;

use crate::error::{CacheError, Result};

/// Compression level for entry archives; favors speed over ratio since the
/// payloads are per-compilation.
const ARCHIVE_ZSTD_LEVEL: i32 = 3;

/// Upper bound on the unpacked size of a fetched archive, so a corrupt or
/// hostile remote cannot fill the disk.
pub const MAX_UNPACKED_BYTES: u64 = 1024 * 1024 * 1024;

/// Archives the regular files directly under `dir`.
pub fn pack_dir(dir: &Path) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    {
        let encoder = zstd::Encoder::new(&mut out, ARCHIVE_ZSTD_LEVEL)?;
        let mut builder = tar::Builder::new(encoder);

        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name());
            }
        }
        // Deterministic archive bytes for identical entries.
        names.sort();

        for name in names {
            let path = dir.join(&name);
            let mut file = File::open(&path)?;
            let mut header = tar::Header::new_gnu();
            header.set_size(file.metadata()?.len());
            header.set_entry_type(EntryType::Regular);
            header.set_mode(0o644);
            header.set_mtime(0);
            header.set_cksum();
            builder.append_data(&mut header, Path::new(&name), &mut file)?;
        }

        builder.into_inner()?.finish()?;
    }
    Ok(out)
}

/// Unpacks an archive produced by [`pack_dir`] into `dest`.
pub fn unpack_into(bytes: &[u8], dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;

    let decoder = zstd::Decoder::new(Cursor::new(bytes))?;
    let mut archive = tar::Archive::new(decoder);

    let mut remaining = MAX_UNPACKED_BYTES;
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type() != EntryType::Regular {
            return Err(CacheError::InvalidArchivePath {
                path: entry.path()?.into_owned(),
            });
        }

        let name = sanitize_entry_name(&entry.path()?)?;

        let size = entry.header().size()?;
        if size > remaining {
            return Err(CacheError::Io(std::io::Error::other(
                "archive exceeds unpacked size limit",
            )));
        }
        remaining -= size;

        let mut contents = Vec::with_capacity(size.min(16 * 1024 * 1024) as usize);
        entry
            .by_ref()
            .take(size)
            .read_to_end(&mut contents)
            .map_err(CacheError::Io)?;
        stash_core::fs::atomic_write(&dest.join(name), &contents)?;
    }
    Ok(())
}

/// Accepts only a bare file name: a single normal path component.
fn sanitize_entry_name(path: &Path) -> Result<PathBuf> {
    let mut components = path.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) => Ok(PathBuf::from(name)),
        _ => Err(CacheError::InvalidArchivePath {
            path: path.to_path_buf(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_roundtrip() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("manifest.json"), b"{}").unwrap();
        std::fs::write(src.path().join("blob-0000"), vec![7u8; 4096]).unwrap();

        let bytes = pack_dir(src.path()).unwrap();

        let dst = tempfile::tempdir().unwrap();
        unpack_into(&bytes, dst.path()).unwrap();
        assert_eq!(std::fs::read(dst.path().join("manifest.json")).unwrap(), b"{}");
        assert_eq!(
            std::fs::read(dst.path().join("blob-0000")).unwrap(),
            vec![7u8; 4096]
        );
    }

    #[test]
    fn pack_skips_subdirectories() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("manifest.json"), b"{}").unwrap();
        std::fs::create_dir(src.path().join("sub")).unwrap();
        std::fs::write(src.path().join("sub").join("inner"), b"x").unwrap();

        let bytes = pack_dir(src.path()).unwrap();
        let dst = tempfile::tempdir().unwrap();
        unpack_into(&bytes, dst.path()).unwrap();
        assert!(dst.path().join("manifest.json").exists());
        assert!(!dst.path().join("sub").exists());
    }

    #[test]
    fn identical_dirs_pack_identically() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        for dir in [a.path(), b.path()] {
            std::fs::write(dir.join("manifest.json"), b"{}").unwrap();
            std::fs::write(dir.join("blob-0000"), b"payload").unwrap();
        }
        assert_eq!(pack_dir(a.path()).unwrap(), pack_dir(b.path()).unwrap());
    }

    #[test]
    fn unpack_rejects_path_traversal() {
        let mut out = Vec::new();
        {
            let encoder = zstd::Encoder::new(&mut out, 3).unwrap();
            let mut builder = tar::Builder::new(encoder);
            let mut header = tar::Header::new_gnu();
            let payload = b"evil";
            let name = b"../escape";
            header.as_gnu_mut().unwrap().name[..name.len()].copy_from_slice(name);
            header.set_size(payload.len() as u64);
            header.set_entry_type(EntryType::Regular);
            header.set_cksum();
            builder.append(&header, &payload[..]).unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        let dst = tempfile::tempdir().unwrap();
        let err = unpack_into(&out, dst.path()).unwrap_err();
        assert!(matches!(err, CacheError::InvalidArchivePath { .. }));
    }

    #[test]
    fn unpack_garbage_fails() {
        let dst = tempfile::tempdir().unwrap();
        assert!(unpack_into(b"definitely not zstd", dst.path()).is_err());
    }
}
