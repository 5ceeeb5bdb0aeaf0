//! Remote cache tiers.
//!
//! A remote tier stores packed cache entries (the `tar.zst` payload produced
//! by the local store's export) keyed by fingerprint. Two transports are
//! provided: `file://` for shared filesystems and `http(s)://` for a plain
//! object-store-style endpoint (GET on lookup, PUT on commit).

use std::io::Read;
use std::path::PathBuf;

use stash_core::fs::atomic_write;

use crate::error::{CacheError, Result};
use crate::fingerprint::Fingerprint;

/// Cap on a fetched archive so a misbehaving remote cannot exhaust memory.
const MAX_FETCH_BYTES: u64 = 256 * 1024 * 1024;

/// A secondary store holding packed cache entries.
pub trait RemoteCache {
    /// The endpoint, for diagnostics.
    fn url(&self) -> &str;

    /// Fetches the packed entry for `pf`; `None` on a miss.
    fn fetch(&self, pf: &Fingerprint) -> Result<Option<Vec<u8>>>;

    /// Uploads the packed entry for `pf`.
    fn store(&self, pf: &Fingerprint, archive: &[u8]) -> Result<()>;
}

/// Builds the remote tier for an endpoint URL.
pub fn remote_for_url(url: &str) -> Result<Box<dyn RemoteCache>> {
    if let Some(root) = url.strip_prefix("file://") {
        return Ok(Box::new(FileRemote::new(root, url.to_string())));
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        return Ok(Box::new(HttpRemote::new(url.to_string())));
    }
    Err(CacheError::UnsupportedRemote {
        url: url.to_string(),
    })
}

/// A remote tier on a shared filesystem.
///
/// Layout mirrors the local store's sharding: `<root>/<xx>/<pf>.tar.zst`.
#[derive(Debug)]
pub struct FileRemote {
    root: PathBuf,
    url: String,
}

impl FileRemote {
    pub fn new(root: impl Into<PathBuf>, url: String) -> Self {
        Self {
            root: root.into(),
            url,
        }
    }

    fn archive_path(&self, pf: &Fingerprint) -> PathBuf {
        self.root.join(pf.bucket()).join(format!("{pf}.tar.zst"))
    }
}

impl RemoteCache for FileRemote {
    fn url(&self) -> &str {
        &self.url
    }

    fn fetch(&self, pf: &Fingerprint) -> Result<Option<Vec<u8>>> {
        let path = self.archive_path(pf);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn store(&self, pf: &Fingerprint, archive: &[u8]) -> Result<()> {
        atomic_write(&self.archive_path(pf), archive)?;
        Ok(())
    }
}

/// A remote tier over HTTP: `GET <base>/<xx>/<pf>` and `PUT <base>/<xx>/<pf>`.
#[derive(Debug)]
pub struct HttpRemote {
    base: String,
}

impl HttpRemote {
    pub fn new(base: String) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    fn entry_url(&self, pf: &Fingerprint) -> String {
        format!("{}/{}/{pf}", self.base, pf.bucket())
    }
}

impl RemoteCache for HttpRemote {
    fn url(&self) -> &str {
        &self.base
    }

    fn fetch(&self, pf: &Fingerprint) -> Result<Option<Vec<u8>>> {
        let url = self.entry_url(pf);
        let response = match ureq::get(&url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(404, _)) => return Ok(None),
            Err(err) => {
                return Err(CacheError::Http {
                    message: err.to_string(),
                })
            }
        };

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_FETCH_BYTES + 1)
            .read_to_end(&mut bytes)
            .map_err(|err| CacheError::Http {
                message: err.to_string(),
            })?;
        if bytes.len() as u64 > MAX_FETCH_BYTES {
            return Err(CacheError::Http {
                message: format!("response for {url} exceeds the fetch size limit"),
            });
        }
        Ok(Some(bytes))
    }

    fn store(&self, pf: &Fingerprint, archive: &[u8]) -> Result<()> {
        ureq::put(&self.entry_url(pf))
            .send_bytes(archive)
            .map_err(|err| CacheError::Http {
                message: err.to_string(),
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pf() -> Fingerprint {
        Fingerprint::from_hex("ab112233445566778899aabbccddeeff").unwrap()
    }

    #[test]
    fn file_remote_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let remote = FileRemote::new(dir.path(), "file://test".to_string());

        assert!(remote.fetch(&pf()).unwrap().is_none());
        remote.store(&pf(), b"packed entry").unwrap();
        assert_eq!(remote.fetch(&pf()).unwrap().as_deref(), Some(&b"packed entry"[..]));
    }

    #[test]
    fn file_remote_shards_by_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let remote = FileRemote::new(dir.path(), "file://test".to_string());
        remote.store(&pf(), b"x").unwrap();
        assert!(dir
            .path()
            .join("ab")
            .join(format!("{}.tar.zst", pf()))
            .exists());
    }

    #[test]
    fn url_scheme_dispatch() {
        assert!(remote_for_url("file:///srv/cache").is_ok());
        assert!(remote_for_url("http://cache.example/bucket").is_ok());
        assert!(remote_for_url("https://cache.example/bucket").is_ok());
        assert!(matches!(
            remote_for_url("ftp://nope"),
            Err(CacheError::UnsupportedRemote { .. })
        ));
    }

    #[test]
    fn http_urls_are_sharded_and_slash_normalized() {
        let remote = HttpRemote::new("http://cache.example/base/".to_string());
        assert_eq!(
            remote.entry_url(&pf()),
            format!("http://cache.example/base/ab/{}", pf())
        );
    }
}
