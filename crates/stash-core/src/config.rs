//! The immutable configuration snapshot.
//!
//! Precedence, lowest to highest: built-in defaults, `<cache_dir>/config.json`,
//! `STASH_*` environment variables. The snapshot is built once in `main` and
//! passed by reference; nothing reads the environment after that.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Default cache size bound: 5 GiB.
const DEFAULT_MAX_CACHE_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Default program-id memoization TTL: five minutes.
const DEFAULT_PROGRAM_ID_TTL_SECS: u64 = 300;

/// Default lock acquisition timeout.
const DEFAULT_LOCK_TIMEOUT_MILLIS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory of the on-disk cache.
    pub cache_dir: PathBuf,
    /// Total size bound for the local cache, in bytes.
    pub max_cache_size: u64,
    /// Compress stored blobs.
    pub compress: bool,
    /// Permit hard links between the cache and build targets.
    pub hard_links: bool,
    /// Permit direct-mode (preprocessor-free) lookups.
    pub direct_mode: bool,
    /// Permit creating missing parent directories of build targets on a hit.
    pub create_target_dirs: bool,
    /// Forbid all writes to the cache.
    pub read_only: bool,
    /// Exit with an error instead of running the program on a miss.
    pub terminate_on_miss: bool,
    /// Extra files whose contents are mixed into every fingerprint.
    pub hash_extra_files: Vec<PathBuf>,
    /// Remote tier endpoints, probed in order after the local cache.
    pub remotes: Vec<String>,
    /// Never write to remote tiers.
    pub remote_read_only: bool,
    /// Debug log destination; stderr when unset.
    pub log_file: Option<PathBuf>,
    /// Debug log level filter (`error`, `warn`, `info`, `debug`, `trace`).
    pub log_level: Option<String>,
    pub program_id_ttl_secs: u64,
    pub lock_timeout_millis: u64,
}

/// On-disk `config.json`. Every field is optional and unknown fields are
/// tolerated so old binaries can read configs written for newer ones.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    max_cache_size: Option<u64>,
    compress: Option<bool>,
    hard_links: Option<bool>,
    direct_mode: Option<bool>,
    create_target_dirs: Option<bool>,
    read_only: Option<bool>,
    terminate_on_miss: Option<bool>,
    hash_extra_files: Option<Vec<PathBuf>>,
    remotes: Option<Vec<String>>,
    remote_read_only: Option<bool>,
    log_file: Option<PathBuf>,
    log_level: Option<String>,
    program_id_ttl_secs: Option<u64>,
    lock_timeout_millis: Option<u64>,
}

impl Config {
    /// Builds the snapshot from defaults, the config file and the environment.
    pub fn from_env() -> Self {
        let cache_dir = env_var("STASH_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_cache_dir);

        let mut config = Self::defaults(cache_dir);
        let file = config.cache_dir.join("config.json");
        if let Some(overrides) = load_config_file(&file) {
            config.apply_file(overrides);
        }
        config.apply_env();
        config
    }

    /// A snapshot with built-in defaults and the given cache root. Callers
    /// that want file/env overrides use [`Config::from_env`].
    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self::defaults(cache_dir.into())
    }

    fn defaults(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            compress: true,
            hard_links: false,
            direct_mode: false,
            create_target_dirs: false,
            read_only: false,
            terminate_on_miss: false,
            hash_extra_files: Vec::new(),
            remotes: Vec::new(),
            remote_read_only: false,
            log_file: None,
            log_level: None,
            program_id_ttl_secs: DEFAULT_PROGRAM_ID_TTL_SECS,
            lock_timeout_millis: DEFAULT_LOCK_TIMEOUT_MILLIS,
        }
    }

    fn apply_file(&mut self, file: ConfigFile) {
        let ConfigFile {
            max_cache_size,
            compress,
            hard_links,
            direct_mode,
            create_target_dirs,
            read_only,
            terminate_on_miss,
            hash_extra_files,
            remotes,
            remote_read_only,
            log_file,
            log_level,
            program_id_ttl_secs,
            lock_timeout_millis,
        } = file;

        merge(&mut self.max_cache_size, max_cache_size);
        merge(&mut self.compress, compress);
        merge(&mut self.hard_links, hard_links);
        merge(&mut self.direct_mode, direct_mode);
        merge(&mut self.create_target_dirs, create_target_dirs);
        merge(&mut self.read_only, read_only);
        merge(&mut self.terminate_on_miss, terminate_on_miss);
        merge(&mut self.hash_extra_files, hash_extra_files);
        merge(&mut self.remotes, remotes);
        merge(&mut self.remote_read_only, remote_read_only);
        if log_file.is_some() {
            self.log_file = log_file;
        }
        if log_level.is_some() {
            self.log_level = log_level;
        }
        merge(&mut self.program_id_ttl_secs, program_id_ttl_secs);
        merge(&mut self.lock_timeout_millis, lock_timeout_millis);
    }

    fn apply_env(&mut self) {
        if let Some(value) = env_var("STASH_MAX_CACHE_SIZE").and_then(|v| parse_size(&v)) {
            self.max_cache_size = value;
        }
        if let Some(value) = env_var("STASH_COMPRESS").map(|v| parse_bool(&v)) {
            self.compress = value;
        }
        if let Some(value) = env_var("STASH_HARD_LINKS").map(|v| parse_bool(&v)) {
            self.hard_links = value;
        }
        if let Some(value) = env_var("STASH_DIRECT_MODE").map(|v| parse_bool(&v)) {
            self.direct_mode = value;
        }
        if let Some(value) = env_var("STASH_CREATE_TARGET_DIRS").map(|v| parse_bool(&v)) {
            self.create_target_dirs = value;
        }
        if let Some(value) = env_var("STASH_READ_ONLY").map(|v| parse_bool(&v)) {
            self.read_only = value;
        }
        if let Some(value) = env_var("STASH_TERMINATE_ON_MISS").map(|v| parse_bool(&v)) {
            self.terminate_on_miss = value;
        }
        if let Some(value) = env_var("STASH_HASH_EXTRA_FILES") {
            self.hash_extra_files = split_path_list(&value);
        }
        if let Some(value) = env_var("STASH_REMOTES") {
            self.remotes = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(value) = env_var("STASH_REMOTE_READ_ONLY").map(|v| parse_bool(&v)) {
            self.remote_read_only = value;
        }
        if let Some(value) = env_var("STASH_LOG_FILE") {
            self.log_file = Some(PathBuf::from(value));
        }
        if let Some(value) = env_var("STASH_LOG_LEVEL") {
            self.log_level = Some(value);
        }
        if let Some(value) = env_var("STASH_PRGID_TTL").and_then(|v| v.parse().ok()) {
            self.program_id_ttl_secs = value;
        }
        if let Some(value) = env_var("STASH_LOCK_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.lock_timeout_millis = value;
        }
    }
}

fn merge<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn default_cache_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".stash"))
        .unwrap_or_else(|| PathBuf::from(".stash"))
}

fn load_config_file(path: &Path) -> Option<ConfigFile> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
        Err(err) => {
            tracing::debug!(
                target = "stash.config",
                path = %path.display(),
                error = %err,
                "failed to read config file"
            );
            return None;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(file) => Some(file),
        Err(err) => {
            tracing::debug!(
                target = "stash.config",
                path = %path.display(),
                error = %err,
                "failed to parse config file; ignoring it"
            );
            None
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Parses a byte size with an optional `k`/`m`/`g`/`t` suffix.
fn parse_size(value: &str) -> Option<u64> {
    let value = value.trim().to_ascii_lowercase();
    let (digits, multiplier) = match value.strip_suffix(['k', 'm', 'g', 't']) {
        Some(digits) => {
            let multiplier = match value.as_bytes()[value.len() - 1] {
                b'k' => 1024u64,
                b'm' => 1024 * 1024,
                b'g' => 1024 * 1024 * 1024,
                _ => 1024u64 * 1024 * 1024 * 1024,
            };
            (digits, multiplier)
        }
        None => (value.as_str(), 1),
    };
    digits
        .trim()
        .parse::<u64>()
        .ok()
        .map(|n| n.saturating_mul(multiplier))
}

fn split_path_list(value: &str) -> Vec<PathBuf> {
    let separator = if cfg!(windows) { ';' } else { ':' };
    value
        .split(separator)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}
