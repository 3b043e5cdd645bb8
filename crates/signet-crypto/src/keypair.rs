//! Key pair generation, signing, and public key handling.

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use secp256k1::{Message, Secp256k1, SecretKey as Secp256k1SecretKey};
use serde::{Deserialize, Serialize};

use crate::hash::Hashable;
use crate::signature::{Signature, SignatureScheme};
use crate::{CryptoError, CryptoResult};

/// A public key under one of the supported schemes
#[derive(Clone, Serialize, Deserialize)]
pub struct PublicKey {
    scheme: SignatureScheme,
    bytes: Vec<u8>,
}

impl PublicKey {
    pub fn new(scheme: SignatureScheme, bytes: Vec<u8>) -> Self {
        PublicKey { scheme, bytes }
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
        Ok(PublicKey { scheme, bytes })
    }

    /// Verifies a signature over a message with this key
    pub fn verify(&self, message: &[u8], signature: &Signature) -> CryptoResult<bool> {
        signature.verify(message, self)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let preview = if self.bytes.len() >= 8 {
            hex::encode(&self.bytes[..8])
        } else {
            hex::encode(&self.bytes)
        };
        write!(f, "PublicKey({:?}, {}...)", self.scheme, preview)
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.scheme == other.scheme && self.bytes == other.bytes
    }
}

impl Eq for PublicKey {}

/// A secret key. Zeroed on drop, never printed.
#[derive(Clone, Serialize, Deserialize)]
pub struct SecretKey {
    scheme: SignatureScheme,
    bytes: Vec<u8>,
}

impl SecretKey {
    pub fn new(scheme: SignatureScheme, bytes: Vec<u8>) -> Self {
        SecretKey { scheme, bytes }
    }

    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    pub fn from_hex(scheme: SignatureScheme, s: &str) -> CryptoResult<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| CryptoError::SerializationError(format!("invalid hex: {}", e)))?;
        Ok(SecretKey { scheme, bytes })
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        for b in self.bytes.iter_mut() {
            *b = 0;
        }
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey({:?}, [REDACTED])", self.scheme)
    }
}

/// A signing key pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPair {
    scheme: SignatureScheme,
    public_key: PublicKey,
    secret_key: SecretKey,
}

impl KeyPair {
    /// Generates a fresh key pair for the given scheme
    pub fn generate(scheme: SignatureScheme) -> CryptoResult<Self> {
        match scheme {
            SignatureScheme::Ed25519 => Self::generate_ed25519(),
            SignatureScheme::Secp256k1 => Self::generate_secp256k1(),
        }
    }

    fn generate_ed25519() -> CryptoResult<Self> {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key: VerifyingKey = (&signing_key).into();

        Ok(KeyPair {
            scheme: SignatureScheme::Ed25519,
            public_key: PublicKey::new(
                SignatureScheme::Ed25519,
                verifying_key.to_bytes().to_vec(),
            ),
            secret_key: SecretKey::new(SignatureScheme::Ed25519, signing_key.to_bytes().to_vec()),
        })
    }

    fn generate_secp256k1() -> CryptoResult<Self> {
        let secp = Secp256k1::new();
        let mut rng = OsRng;
        let secret_key = Secp256k1SecretKey::new(&mut rng);
        let public_key = secp256k1::PublicKey::from_secret_key(&secp, &secret_key);

        Ok(KeyPair {
            scheme: SignatureScheme::Secp256k1,
            public_key: PublicKey::new(
                SignatureScheme::Secp256k1,
                public_key.serialize().to_vec(),
            ),
            secret_key: SecretKey::new(
                SignatureScheme::Secp256k1,
                secret_key.secret_bytes().to_vec(),
            ),
        })
    }

    /// Restores a key pair from an existing secret key
    pub fn from_secret_key(secret_key: SecretKey) -> CryptoResult<Self> {
        match secret_key.scheme() {
            SignatureScheme::Ed25519 => {
                let key_bytes: &[u8; 32] = secret_key
                    .as_bytes()
                    .try_into()
                    .map_err(|_| CryptoError::InvalidSecretKey)?;
                let signing_key = SigningKey::from_bytes(key_bytes);
                let verifying_key: VerifyingKey = (&signing_key).into();
                Ok(KeyPair {
                    scheme: SignatureScheme::Ed25519,
                    public_key: PublicKey::new(
                        SignatureScheme::Ed25519,
                        verifying_key.to_bytes().to_vec(),
                    ),
                    secret_key,
                })
            }
            SignatureScheme::Secp256k1 => {
                let secp = Secp256k1::new();
                let sk = Secp256k1SecretKey::from_slice(secret_key.as_bytes())
                    .map_err(|_| CryptoError::InvalidSecretKey)?;
                let pk = secp256k1::PublicKey::from_secret_key(&secp, &sk);
                Ok(KeyPair {
                    scheme: SignatureScheme::Secp256k1,
                    public_key: PublicKey::new(
                        SignatureScheme::Secp256k1,
                        pk.serialize().to_vec(),
                    ),
                    secret_key,
                })
            }
        }
    }

    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }

    /// The account address derived from this key pair's public key
    pub fn address(&self) -> crate::Address {
        crate::Address::from_public_key(&self.public_key)
    }

    /// Signs a message with this key pair
    pub fn sign(&self, message: &[u8]) -> CryptoResult<Signature> {
        match self.scheme {
            SignatureScheme::Ed25519 => self.sign_ed25519(message),
            SignatureScheme::Secp256k1 => self.sign_secp256k1(message),
        }
    }

    fn sign_ed25519(&self, message: &[u8]) -> CryptoResult<Signature> {
        let key_bytes: &[u8; 32] = self
            .secret_key
            .as_bytes()
            .try_into()
            .map_err(|_| CryptoError::InvalidSecretKey)?;
        let signing_key = SigningKey::from_bytes(key_bytes);
        let signature = signing_key.sign(message);

        Ok(Signature::new(
            SignatureScheme::Ed25519,
            signature.to_bytes().to_vec(),
        ))
    }

    fn sign_secp256k1(&self, message: &[u8]) -> CryptoResult<Signature> {
        let secp = Secp256k1::new();
        let secret_key = Secp256k1SecretKey::from_slice(self.secret_key.as_bytes())
            .map_err(|_| CryptoError::InvalidSecretKey)?;

        // secp256k1 signs a 32-byte digest, not the raw message
        let digest = message.hash();
        let msg = Message::from_digest_slice(digest.as_bytes())
            .map_err(|_| CryptoError::InvalidSignature)?;

        let signature = secp.sign_ecdsa(&msg, &secret_key);
        Ok(Signature::new(
            SignatureScheme::Secp256k1,
            signature.serialize_compact().to_vec(),
        ))
    }
}
