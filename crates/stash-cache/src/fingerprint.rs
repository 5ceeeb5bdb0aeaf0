use std::fmt;

use serde::{Deserialize, Serialize};
use stash_core::hash::Digest;

use crate::error::CacheError;

/// A cache key: the lowercase-hex rendering of a 128-bit content digest.
///
/// Both fingerprint kinds (preprocessor and direct) share this representation;
/// the kinds are kept apart by a domain separator mixed into the hash stream,
/// not by the rendered string.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_digest(digest: Digest) -> Self {
        Self(digest.to_hex())
    }

    /// Parses a fingerprint from its hex form, normalizing case.
    pub fn from_hex(value: &str) -> Result<Self, CacheError> {
        if value.len() != 32 || !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CacheError::InvalidFingerprint {
                value: value.to_string(),
            });
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first-byte shard this fingerprint belongs to (two hex chars).
    pub fn bucket(&self) -> &str {
        &self.0[..2]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
