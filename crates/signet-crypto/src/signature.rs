//! Digital signature types supporting multiple schemes.

use ed25519_dalek::{Signature as Ed25519Signature, Verifier, VerifyingKey};
use secp256k1::ecdsa::Signature as Secp256k1Signature;
use secp256k1::{Message, Secp256k1};
use serde::{Deserialize, Serialize};

use crate::hash::Hashable;
use crate::keypair::PublicKey;
use crate::{CryptoError, CryptoResult};

/// Supported signature schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureScheme {
    /// Ed25519 (fast, deterministic)
    Ed25519,
    /// secp256k1 ECDSA (Ethereum-compatible)
    Secp256k1,
}

/// A digital signature over a message
#[derive(Clone, Serialize, Deserialize)]
pub struct Signature {
    scheme: SignatureScheme,
    bytes: Vec<u8>,
}

impl Signature {
    pub fn new(scheme: SignatureScheme, bytes: Vec<u8>) -> Self {
        Signature { scheme, bytes }
    }

    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    pub fn from_hex(scheme: SignatureScheme, s: &str) -> CryptoResult<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| CryptoError::SerializationError(format!("invalid hex: {}", e)))?;
        Ok(Signature { scheme, bytes })
    }

    /// Verifies this signature over a message with the given public key.
    ///
    /// Returns `Ok(false)` for a well-formed but non-matching signature,
    /// including a scheme mismatch between signature and key.
    pub fn verify(&self, message: &[u8], public_key: &PublicKey) -> CryptoResult<bool> {
        if self.scheme != public_key.scheme() {
            return Ok(false);
        }
        match self.scheme {
            SignatureScheme::Ed25519 => self.verify_ed25519(message, public_key),
            SignatureScheme::Secp256k1 => self.verify_secp256k1(message, public_key),
        }
    }

    fn verify_ed25519(&self, message: &[u8], public_key: &PublicKey) -> CryptoResult<bool> {
        let signature = Ed25519Signature::from_slice(&self.bytes)
            .map_err(|_| CryptoError::InvalidSignature)?;

        let key_bytes: &[u8; 32] = public_key
            .as_bytes()
            .try_into()
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        let verifying_key =
            VerifyingKey::from_bytes(key_bytes).map_err(|_| CryptoError::InvalidPublicKey)?;

        Ok(verifying_key.verify(message, &signature).is_ok())
    }

    fn verify_secp256k1(&self, message: &[u8], public_key: &PublicKey) -> CryptoResult<bool> {
        let secp = Secp256k1::verification_only();

        let signature = Secp256k1Signature::from_compact(&self.bytes)
            .map_err(|_| CryptoError::InvalidSignature)?;
        let pk = secp256k1::PublicKey::from_slice(public_key.as_bytes())
            .map_err(|_| CryptoError::InvalidPublicKey)?;

        // secp256k1 signs a 32-byte digest, not the raw message
        let digest = message.hash();
        let msg = Message::from_digest_slice(digest.as_bytes())
            .map_err(|_| CryptoError::InvalidSignature)?;

        Ok(secp.verify_ecdsa(&msg, &signature, &pk).is_ok())
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let preview = if self.bytes.len() >= 8 {
            hex::encode(&self.bytes[..8])
        } else {
            hex::encode(&self.bytes)
        };
        write!(f, "Signature({:?}, {}...)", self.scheme, preview)
    }
}

impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        self.scheme == other.scheme && self.bytes == other.bytes
    }
}

impl Eq for Signature {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypair::KeyPair;

    #[test]
    fn test_sign_and_verify_ed25519() {
        let keypair = KeyPair::generate(SignatureScheme::Ed25519).unwrap();
        let message = b"authorize block 42";

        let signature = keypair.sign(message).unwrap();
        assert!(signature.verify(message, keypair.public_key()).unwrap());
        assert!(!signature.verify(b"different message", keypair.public_key()).unwrap());
    }

    #[test]
    fn test_sign_and_verify_secp256k1() {
        let keypair = KeyPair::generate(SignatureScheme::Secp256k1).unwrap();
        let message = b"authorize block 42";

        let signature = keypair.sign(message).unwrap();
        assert!(signature.verify(message, keypair.public_key()).unwrap());
        assert!(!signature.verify(b"different message", keypair.public_key()).unwrap());
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let signer = KeyPair::generate(SignatureScheme::Ed25519).unwrap();
        let other = KeyPair::generate(SignatureScheme::Ed25519).unwrap();
        let message = b"payload";

        let signature = signer.sign(message).unwrap();
        assert!(!signature.verify(message, other.public_key()).unwrap());
    }

    #[test]
    fn test_scheme_mismatch_is_not_valid() {
        let ed = KeyPair::generate(SignatureScheme::Ed25519).unwrap();
        let secp = KeyPair::generate(SignatureScheme::Secp256k1).unwrap();
        let message = b"payload";

        let signature = ed.sign(message).unwrap();
        assert!(!signature.verify(message, secp.public_key()).unwrap());
    }

    #[test]
    fn test_signature_hex_roundtrip() {
        let keypair = KeyPair::generate(SignatureScheme::Ed25519).unwrap();
        let signature = keypair.sign(b"data").unwrap();

        let hex = signature.to_hex();
        let restored = Signature::from_hex(SignatureScheme::Ed25519, &hex).unwrap();
        assert_eq!(signature, restored);
    }
}
