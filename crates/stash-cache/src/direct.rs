//! Direct-mode records: the index from a direct fingerprint to the
//! preprocessor fingerprint it resolved to, plus the implicit inputs whose
//! contents the shortcut depends on.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stash_core::Hasher;

use crate::fingerprint::Fingerprint;

pub const DIRECT_RECORD_SCHEMA_VERSION: u32 = 1;

/// One implicit input pinned by a direct-mode record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinnedInput {
    pub path: PathBuf,
    /// Content digest of the file at record time, lowercase hex.
    pub digest: String,
}

/// A direct fingerprint's stored resolution.
///
/// The record is usable only while every pinned input still exists with its
/// recorded content; any change (or deletion) makes it stale and it is
/// ignored until a later commit replaces it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectRecord {
    pub schema_version: u32,
    /// The preprocessor fingerprint this shortcut resolves to.
    pub result: Fingerprint,
    pub inputs: Vec<PinnedInput>,
}

impl DirectRecord {
    /// Builds a record by hashing the implicit inputs now.
    ///
    /// Returns `None` if any input cannot be read; a record that cannot pin
    /// all of its inputs would never validate.
    pub fn capture(result: Fingerprint, implicit_inputs: &[PathBuf]) -> Option<Self> {
        let mut inputs = Vec::with_capacity(implicit_inputs.len());
        for path in implicit_inputs {
            let digest = hash_file(path)?;
            inputs.push(PinnedInput {
                path: path.clone(),
                digest,
            });
        }
        Some(Self {
            schema_version: DIRECT_RECORD_SCHEMA_VERSION,
            result,
            inputs,
        })
    }

    pub fn is_compatible(&self) -> bool {
        self.schema_version == DIRECT_RECORD_SCHEMA_VERSION
    }

    /// Re-hashes every pinned input and checks it against the record.
    pub fn still_valid(&self) -> bool {
        self.inputs
            .iter()
            .all(|input| hash_file(&input.path).as_deref() == Some(input.digest.as_str()))
    }
}

fn hash_file(path: &Path) -> Option<String> {
    let mut hasher = Hasher::new();
    hasher.update_from_file(path).ok()?;
    Some(hasher.finalize().to_hex())
}
