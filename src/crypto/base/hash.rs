use crate::util::ser::Binary;
use serde_derive::{Deserialize, Serialize};
use std::ops::Deref;

/// A cryptographic hash. By defining this as an enum, we allow expansion of
/// hash algorithms in the future.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hash {
    /// Blake3 256bit hash
    Blake3(Binary<32>),
}

impl Hash {
    /// Create a new blake3 hash from a message
    pub fn new_blake3(message: &[u8]) -> Self {
        Self::new_blake3_parts(&[message])
    }

    /// Hash the concatenation of several byte strings without allocating the
    /// concatenated buffer.
    pub fn new_blake3_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part);
        }
        Self::Blake3(Binary::new(*hasher.finalize().as_bytes()))
    }

    /// Return the byte slice representing this hash.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Blake3(bin) => bin.deref(),
        }
    }

    /// Hex-encode the first `len` bytes of the hash. Pseudonyms and fingerprints
    /// are both 16-byte truncations.
    pub fn truncated_hex(&self, len: usize) -> String {
        let bytes = self.as_bytes();
        hex::encode(&bytes[..len.min(bytes.len())])
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.as_bytes()))
    }
}
