//! On-disk cache stores for the stash compiler cache:
//! - content-addressed local store with bucket locking and LRU eviction
//! - TTL key/value data store for program-id memoization
//! - remote tiers (`file://`, `http(s)://`) carrying packed cache entries
//! - the facade that orders tiers and back-populates misses
//!
//! All mutation of shared state goes through advisory file locks and
//! write-to-temp-then-rename publication, so concurrent processes sharing a
//! cache root either observe a fully committed entry or none at all.

mod data_store;
mod direct;
mod entry;
mod error;
mod facade;
mod fingerprint;
mod local;
mod lock;
mod pack;
mod remote;

pub use data_store::DataStore;
pub use direct::{DirectRecord, PinnedInput};
pub use entry::{
    BlobDescriptor, CacheEntry, CompressionMode, EntryManifest, ExpectedFile, ExpectedFiles,
    MANIFEST_FILENAME, MANIFEST_SCHEMA_VERSION,
};
pub use error::{CacheError, Result};
pub use facade::CacheFacade;
pub use fingerprint::Fingerprint;
pub use local::{CachedOutputs, HousekeepingReport, LocalCache, Lookup, PlacementOptions};
pub use lock::FileLock;
pub use remote::{remote_for_url, FileRemote, HttpRemote, RemoteCache};
