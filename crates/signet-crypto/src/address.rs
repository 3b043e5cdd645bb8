//! Account and contract addresses.
//!
//! An address is the trailing 20 bytes of a hash. Account addresses are
//! derived from public keys, contract addresses from the creating account,
//! its nonce, and the hash of the deployed code.

use serde::{Deserialize, Serialize};

use crate::hash::{Hash, HashAlgorithm, Hashable};
use crate::keypair::PublicKey;
use crate::{CryptoError, CryptoResult};

/// Size of an address in bytes
pub const ADDRESS_SIZE: usize = 20;

/// A 20-byte account or contract address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address([u8; ADDRESS_SIZE]);

impl Address {
    pub fn new(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Address(bytes)
    }

    /// Derives the address of an account from its public key
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let digest = public_key.as_bytes().hash_with(HashAlgorithm::Sha3_256);
        let mut bytes = [0u8; ADDRESS_SIZE];
        bytes.copy_from_slice(&digest.as_bytes()[12..32]);
        Address(bytes)
    }

    /// Derives the address a contract will live at.
    ///
    /// The derivation commits to the creator, the creator's nonce at
    /// deployment, and the code hash, so the address is known before the
    /// deployment transaction is confirmed.
    pub fn for_contract(creator: &Address, nonce: u64, code_hash: &Hash) -> Self {
        let mut preimage = Vec::with_capacity(ADDRESS_SIZE + 8 + 32);
        preimage.extend_from_slice(creator.as_bytes());
        preimage.extend_from_slice(&nonce.to_be_bytes());
        preimage.extend_from_slice(code_hash.as_bytes());

        let digest = preimage.hash_with(HashAlgorithm::Sha3_256);
        let mut bytes = [0u8; ADDRESS_SIZE];
        bytes.copy_from_slice(&digest.as_bytes()[12..32]);
        Address(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_bytes(&self) -> [u8; ADDRESS_SIZE] {
        self.0
    }

    /// The all-zero address, used as the genesis producer
    pub fn zero() -> Self {
        Address([0u8; ADDRESS_SIZE])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ADDRESS_SIZE]
    }

    /// Hex representation with a `0x` prefix
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Parses an address from hex, with or without a `0x` prefix
    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)
            .map_err(|e| CryptoError::InvalidAddress(format!("invalid hex: {}", e)))?;
        if bytes.len() != ADDRESS_SIZE {
            return Err(CryptoError::InvalidAddress(format!(
                "expected {} bytes, got {}",
                ADDRESS_SIZE,
                bytes.len()
            )));
        }
        let mut addr = [0u8; ADDRESS_SIZE];
        addr.copy_from_slice(&bytes);
        Ok(Address(addr))
    }
}

impl Default for Address {
    fn default() -> Self {
        Address::zero()
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
