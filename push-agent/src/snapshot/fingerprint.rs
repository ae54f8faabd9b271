//! Content fingerprints: SHA-256 over raw file bytes.
//!
//! Files are hashed as opaque binary. There is no text mode, no encoding
//! detection and no line-ending translation, so a PNG and a `.js` file are
//! treated identically.

use crate::utils::errors::{PushError, Result};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Read buffer for streaming file hashes (64KB)
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// A 256-bit content hash. Serialized as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64 character hex digest.
    pub fn from_hex(s: &str) -> Result<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| PushError::CorruptManifest(format!("bad content hash '{}': {}", s, e)))?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "ContentHash({})", &hex[..12])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(de::Error::custom)
    }
}

/// Fingerprint a byte buffer.
pub fn fingerprint(bytes: &[u8]) -> ContentHash {
    ContentHash(Sha256::digest(bytes).into())
}

/// Fingerprint everything a reader yields, returning the hash and byte count.
pub fn fingerprint_reader<R: Read>(mut reader: R) -> io::Result<(ContentHash, u64)> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..read]);
        total += read as u64;
    }

    Ok((ContentHash(hasher.finalize().into()), total))
}

/// Fingerprint a file on disk.
///
/// Fails with [`PushError::Read`] carrying the path when the file is
/// unreadable or vanished mid-scan.
pub fn fingerprint_file(path: &Path) -> Result<(ContentHash, u64)> {
    let read_error = |source| PushError::Read {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(read_error)?;
    fingerprint_reader(file).map_err(read_error)
}

/// A `sha256:`-prefixed digest, used for document-level identifiers.
pub fn tagged_digest(bytes: &[u8]) -> String {
    format!("sha256:{}", fingerprint(bytes).to_hex())
}
