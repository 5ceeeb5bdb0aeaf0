//! Streaming content hashing for cache keys.
//!
//! Cache fingerprints are 128-bit XXH3 digests computed over a sequence of
//! logical fields (program id, filtered arguments, environment variables,
//! source bytes). The hasher is order-sensitive and supports explicit
//! separators so that adjacent fields cannot alias each other.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::Xxh3;

/// Mixed between logical fields: `H(A) ∥ H(B)` must differ from `H(A ∥ B)`.
const FIELD_SEPARATOR: [u8; 8] = [0x9e, 0x37, 0x79, 0xb9, 0x7f, 0x4a, 0x7c, 0x15];

/// Chunk size for hashing file contents without reading them fully into memory.
const FILE_CHUNK_SIZE: usize = 64 * 1024;

/// A 128-bit content digest with a canonical byte order.
///
/// The digest bytes are the little-endian encoding of the XXH3-128 value on
/// every platform, so fingerprints computed on one machine are valid cache
/// keys on another.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest([u8; 16]);

impl Digest {
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Renders the digest as 32 lowercase hex characters.
    pub fn to_hex(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// Streaming hasher over bytes, files and field separators.
#[derive(Clone)]
pub struct Hasher {
    state: Xxh3,
}

impl Hasher {
    pub fn new() -> Self {
        Self { state: Xxh3::new() }
    }

    /// Feeds raw bytes into the hash. Order-sensitive.
    pub fn update(&mut self, bytes: impl AsRef<[u8]>) {
        self.state.update(bytes.as_ref());
    }

    /// Feeds a file's contents into the hash, streamed in fixed-size chunks.
    pub fn update_from_file(&mut self, path: &Path) -> std::io::Result<()> {
        let mut file = File::open(path)?;
        let mut buf = [0u8; FILE_CHUNK_SIZE];
        loop {
            let read = file.read(&mut buf)?;
            if read == 0 {
                return Ok(());
            }
            self.state.update(&buf[..read]);
        }
    }

    /// Mixes the field separator into the hash.
    pub fn inject_separator(&mut self) {
        self.state.update(&FIELD_SEPARATOR);
    }

    /// Consumes the hasher and returns the canonical digest.
    pub fn finalize(self) -> Digest {
        Digest(self.state.digest128().to_le_bytes())
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest_of(parts: &[&[u8]]) -> Digest {
        let mut hasher = Hasher::new();
        for part in parts {
            hasher.update(part);
        }
        hasher.finalize()
    }

    #[test]
    fn deterministic() {
        assert_eq!(digest_of(&[b"hello world"]), digest_of(&[b"hello world"]));
    }

    #[test]
    fn different_inputs_differ() {
        assert_ne!(digest_of(&[b"hello"]), digest_of(&[b"world"]));
    }

    #[test]
    fn chunking_is_invisible() {
        assert_eq!(digest_of(&[b"ab", b"cd"]), digest_of(&[b"abcd"]));
    }

    #[test]
    fn separator_distinguishes_field_boundaries() {
        let mut a = Hasher::new();
        a.update(b"ab");
        a.inject_separator();
        a.update(b"cd");

        let mut b = Hasher::new();
        b.update(b"abcd");
        b.inject_separator();

        assert_ne!(a.finalize(), b.finalize());
    }

    #[test]
    fn clone_forks_the_state() {
        let mut base = Hasher::new();
        base.update(b"common prefix");

        let mut left = base.clone();
        left.update(b"left");
        let mut right = base;
        right.update(b"right");

        assert_ne!(left.finalize(), right.finalize());
    }

    #[test]
    fn file_hash_matches_byte_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.c");
        std::fs::write(&path, b"int main() { return 0; }").unwrap();

        let mut from_file = Hasher::new();
        from_file.update_from_file(&path).unwrap();

        assert_eq!(
            from_file.finalize(),
            digest_of(&[b"int main() { return 0; }"])
        );
    }

    #[test]
    fn file_hash_missing_file_errors() {
        let mut hasher = Hasher::new();
        assert!(hasher
            .update_from_file(Path::new("/nonexistent/input.c"))
            .is_err());
    }

    #[test]
    fn hex_format() {
        let hex = digest_of(&[b"test"]).to_hex();
        assert_eq!(hex.len(), 32);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hex, hex.to_lowercase());
    }
}
