//! Cryptographic primitives for the Signet blockchain.
//!
//! This crate provides:
//! - Hashing (SHA-256, SHA3-256, BLAKE3)
//! - Digital signatures (Ed25519, secp256k1)
//! - Key pair generation and management
//! - Account and contract addresses
//! - Merkle tree roots for transaction sets

pub mod address;
pub mod hash;
pub mod keypair;
pub mod merkle;
pub mod signature;

pub use address::Address;
pub use hash::{Hash, HashAlgorithm, Hashable, HASH_SIZE};
pub use keypair::{KeyPair, PublicKey, SecretKey};
pub use merkle::merkle_root;
pub use signature::{Signature, SignatureScheme};

/// Result type for cryptographic operations
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur during cryptographic operations
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid secret key")]
    InvalidSecretKey,

    #[error("Invalid hash: expected {expected} bytes, got {actual}")]
    InvalidHash { expected: usize, actual: usize },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_exports() {
        let hash = Hash::zero();
        assert_eq!(hash.as_bytes().len(), HASH_SIZE);

        let keypair = KeyPair::generate(SignatureScheme::Ed25519).unwrap();
        assert_eq!(keypair.scheme(), SignatureScheme::Ed25519);
    }
}
