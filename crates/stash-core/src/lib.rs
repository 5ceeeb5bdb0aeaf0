//! Shared building blocks for the stash compiler cache:
//! - streaming 128-bit content hashing with domain separation
//! - filesystem primitives (atomic writes, link-or-copy, no-follow deletion)
//! - the immutable configuration snapshot read once at startup

pub mod config;
pub mod fs;
pub mod hash;

pub use config::Config;
pub use fs::{atomic_write, atomic_write_with, now_millis, FileInfo};
pub use hash::{Digest, Hasher};

/// Crate version recorded in on-disk schema checks.
pub const STASH_VERSION: &str = env!("CARGO_PKG_VERSION");
