//! The cache entry model and its on-disk manifest.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Current manifest schema. Bump on incompatible layout changes; readers
/// treat entries with a newer schema as misses.
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// Manifest filename inside a fingerprint directory. An entry directory
/// without this file is not a committed entry.
pub const MANIFEST_FILENAME: &str = "manifest.json";

/// Per-entry compression mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionMode {
    None,
    All,
}

/// A build product the wrapped program is expected to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedFile {
    /// Where the program writes the file, and where a hit must place it.
    pub path: PathBuf,
    /// Required files must exist in a hit; optional ones are placed if stored.
    pub required: bool,
}

impl ExpectedFile {
    pub fn required(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            required: true,
        }
    }

    pub fn optional(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            required: false,
        }
    }
}

/// File-id → expected file, ordered for deterministic iteration.
pub type ExpectedFiles = BTreeMap<String, ExpectedFile>;

/// A cache entry as captured from a program run, before it is persisted.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// File ids to capture, in commit order. Ids of optional files that were
    /// not produced are excluded by the caller.
    pub file_ids: Vec<String>,
    pub compression: CompressionMode,
}

/// The versioned manifest describing a committed entry.
///
/// Unknown fields written by newer versions are tolerated; missing required
/// fields fail deserialization and the entry reads as corrupt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryManifest {
    pub schema_version: u32,
    pub exit_code: i32,
    #[serde(with = "base64_bytes")]
    pub stdout: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub stderr: Vec<u8>,
    /// File-id → blob descriptor for every captured build product.
    pub files: BTreeMap<String, BlobDescriptor>,
}

/// Describes one stored blob within an entry directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobDescriptor {
    /// Blob filename relative to the fingerprint directory.
    pub blob: String,
    pub compressed: bool,
    /// Uncompressed payload size in bytes.
    pub size: u64,
}

impl EntryManifest {
    pub fn is_compatible(&self) -> bool {
        self.schema_version == MANIFEST_SCHEMA_VERSION
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_manifest() -> EntryManifest {
        let mut files = BTreeMap::new();
        files.insert(
            "object".to_string(),
            BlobDescriptor {
                blob: "blob-0000".to_string(),
                compressed: true,
                size: 2048,
            },
        );
        EntryManifest {
            schema_version: MANIFEST_SCHEMA_VERSION,
            exit_code: 0,
            stdout: b"compiled ok\n".to_vec(),
            stderr: Vec::new(),
            files,
        }
    }

    #[test]
    fn manifest_roundtrip() {
        let manifest = sample_manifest();
        let json = serde_json::to_string(&manifest).unwrap();
        let back: EntryManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.exit_code, 0);
        assert_eq!(back.stdout, b"compiled ok\n");
        assert_eq!(back.files["object"].blob, "blob-0000");
        assert!(back.files["object"].compressed);
    }

    #[test]
    fn stdout_bytes_survive_non_utf8() {
        let mut manifest = sample_manifest();
        manifest.stderr = vec![0x00, 0xff, 0xfe, 0x7f];
        let json = serde_json::to_string(&manifest).unwrap();
        let back: EntryManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.stderr, vec![0x00, 0xff, 0xfe, 0x7f]);
    }

    #[test]
    fn unknown_optional_fields_are_tolerated() {
        let json = r#"{
            "schema_version": 1,
            "exit_code": 0,
            "stdout": "",
            "stderr": "",
            "files": {},
            "some_future_field": {"nested": true}
        }"#;
        let manifest: EntryManifest = serde_json::from_str(json).unwrap();
        assert!(manifest.is_compatible());
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let json = r#"{"schema_version": 1, "exit_code": 0}"#;
        assert!(serde_json::from_str::<EntryManifest>(json).is_err());
    }

    #[test]
    fn newer_schema_is_incompatible() {
        let mut manifest = sample_manifest();
        manifest.schema_version = MANIFEST_SCHEMA_VERSION + 1;
        assert!(!manifest.is_compatible());
    }

    #[test]
    fn compression_mode_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&CompressionMode::All).unwrap(), "\"all\"");
        assert_eq!(
            serde_json::to_string(&CompressionMode::None).unwrap(),
            "\"none\""
        );
    }
}
