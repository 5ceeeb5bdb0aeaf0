use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors produced by cache stores and persistence.
///
/// Most read paths are fail-safe: corruption degrades to a cache miss rather
/// than surfacing one of these. The variants exist for the write paths and for
/// callers that need to distinguish degraded modes (lock timeouts, read-only).
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("timed out waiting for lock {path}")]
    LockTimeout { path: PathBuf },

    #[error("not a valid fingerprint: {value:?}")]
    InvalidFingerprint { value: String },

    #[error("cache is read-only")]
    ReadOnly,

    #[error("required build file {path} was not produced")]
    MissingSourceFile { path: PathBuf },

    #[error("invalid archive entry path {path:?}")]
    InvalidArchivePath { path: PathBuf },

    #[error("unsupported remote endpoint {url}")]
    UnsupportedRemote { url: String },

    #[error("http error: {message}")]
    Http { message: String },
}
