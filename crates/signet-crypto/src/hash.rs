//! Hash types and hashing utilities.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sha3::Sha3_256;

use crate::{CryptoError, CryptoResult};

/// Size of a hash digest in bytes
pub const HASH_SIZE: usize = 32;

/// Supported hash algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlgorithm {
    /// SHA-256 (block and transaction identity)
    Sha256,
    /// SHA3-256 (address derivation)
    Sha3_256,
    /// BLAKE3 (state roots)
    Blake3,
}

/// A 32-byte hash digest
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash([u8; HASH_SIZE]);

impl Hash {
    /// Creates a hash from raw bytes
    pub fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Hash(bytes)
    }

    /// Creates a hash from a byte slice, failing if the length is wrong
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != HASH_SIZE {
            return Err(CryptoError::InvalidHash {
                expected: HASH_SIZE,
                actual: bytes.len(),
            });
        }
        let mut hash = [0u8; HASH_SIZE];
        hash.copy_from_slice(bytes);
        Ok(Hash(hash))
    }

    /// Returns the hash as a byte slice
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the hash as a byte array
    pub fn to_bytes(&self) -> [u8; HASH_SIZE] {
        self.0
    }

    /// The all-zero hash, used for genesis parents and empty roots
    pub fn zero() -> Self {
        Hash([0u8; HASH_SIZE])
    }

    /// Returns true if this is the all-zero hash
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_SIZE]
    }

    /// Hex representation of the hash
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a hash from a hex string, with or without a `0x` prefix
    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)
            .map_err(|e| CryptoError::SerializationError(format!("invalid hex: {}", e)))?;
        Self::from_slice(&bytes)
    }
}

impl Default for Hash {
    fn default() -> Self {
        Hash::zero()
    }
}

impl std::fmt::Debug for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Hash({}...{})",
            hex::encode(&self.0[..4]),
            hex::encode(&self.0[HASH_SIZE - 4..])
        )
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Types that can be hashed into a digest
pub trait Hashable {
    /// Hashes with the default algorithm (SHA-256)
    fn hash(&self) -> Hash {
        self.hash_with(HashAlgorithm::Sha256)
    }

    /// Hashes with a specific algorithm
    fn hash_with(&self, algorithm: HashAlgorithm) -> Hash;
}

impl Hashable for [u8] {
    fn hash_with(&self, algorithm: HashAlgorithm) -> Hash {
        let digest: [u8; HASH_SIZE] = match algorithm {
            HashAlgorithm::Sha256 => Sha256::digest(self).into(),
            HashAlgorithm::Sha3_256 => Sha3_256::digest(self).into(),
            HashAlgorithm::Blake3 => *blake3::hash(self).as_bytes(),
        };
        Hash(digest)
    }
}

impl Hashable for Vec<u8> {
    fn hash_with(&self, algorithm: HashAlgorithm) -> Hash {
        self.as_slice().hash_with(algorithm)
    }
}

impl Hashable for &str {
    fn hash_with(&self, algorithm: HashAlgorithm) -> Hash {
        self.as_bytes().hash_with(algorithm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_basic() {
        let data = b"hello world";
        let hash1 = data.as_slice().hash();
        let hash2 = data.as_slice().hash();
        assert_eq!(hash1, hash2);

        let other = b"hello world!".as_slice().hash();
        assert_ne!(hash1, other);
    }

    #[test]
    fn test_hash_algorithms() {
        let data = b"signet".as_slice();
        let sha256 = data.hash_with(HashAlgorithm::Sha256);
        let sha3 = data.hash_with(HashAlgorithm::Sha3_256);
        let blake3 = data.hash_with(HashAlgorithm::Blake3);

        assert_ne!(sha256, sha3);
        assert_ne!(sha256, blake3);
        assert_ne!(sha3, blake3);
    }

    #[test]
    fn test_hash_hex_roundtrip() {
        let hash = b"roundtrip".as_slice().hash();
        let hex = hash.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(Hash::from_hex(&hex).unwrap(), hash);
        assert_eq!(Hash::from_hex(&format!("0x{}", hex)).unwrap(), hash);
    }

    #[test]
    fn test_hash_from_slice_rejects_bad_length() {
        assert!(Hash::from_slice(&[0u8; 31]).is_err());
        assert!(Hash::from_slice(&[0u8; 33]).is_err());
        assert!(Hash::from_slice(&[0u8; 32]).is_ok());
    }

    #[test]
    fn test_zero_hash() {
        assert!(Hash::zero().is_zero());
        assert!(!b"x".as_slice().hash().is_zero());
        assert_eq!(Hash::default(), Hash::zero());
    }
}
