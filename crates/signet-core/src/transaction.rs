//! Transactions, receipts, and execution logs.

use serde::{Deserialize, Serialize};
use signet_crypto::{Address, Hash, Hashable, KeyPair, PublicKey, Signature};

use crate::types::{Amount, Gas, GasPrice, Height, Nonce, TimestampMs};
use crate::{now_millis, ChainError, ChainResult};

/// What a transaction does
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxKind {
    /// Moves tokens between accounts
    Transfer { to: Address, amount: Amount },
    /// Calls a deployed contract
    ContractCall {
        contract: Address,
        input: Vec<u8>,
        value: Amount,
    },
    /// Deploys a new contract
    ContractCreate {
        code: Vec<u8>,
        init_input: Vec<u8>,
        value: Amount,
    },
    /// Admits a validator to the active set
    AddValidator {
        validator: Address,
        public_key: PublicKey,
    },
    /// Retires a validator from the active set
    RemoveValidator { validator: Address },
}

impl TxKind {
    /// Short name used in logs and API responses
    pub fn name(&self) -> &'static str {
        match self {
            TxKind::Transfer { .. } => "transfer",
            TxKind::ContractCall { .. } => "contract_call",
            TxKind::ContractCreate { .. } => "contract_create",
            TxKind::AddValidator { .. } => "add_validator",
            TxKind::RemoveValidator { .. } => "remove_validator",
        }
    }
}

/// A signed transaction.
///
/// Carries the sender's public key so signature verification needs no
/// external lookup; the sender address must match the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub from: Address,
    pub public_key: PublicKey,
    pub nonce: Nonce,
    pub kind: TxKind,
    pub gas_limit: Gas,
    pub gas_price: GasPrice,
    pub timestamp: TimestampMs,
    pub signature: Option<Signature>,
}

impl Transaction {
    /// Creates an unsigned transaction stamped with the current time
    pub fn new(
        from: Address,
        public_key: PublicKey,
        nonce: Nonce,
        kind: TxKind,
        gas_limit: Gas,
        gas_price: GasPrice,
    ) -> Self {
        Transaction {
            from,
            public_key,
            nonce,
            kind,
            gas_limit,
            gas_price,
            timestamp: now_millis(),
            signature: None,
        }
    }

    /// The canonical bytes covered by the signature (everything except
    /// the signature itself)
    fn signing_bytes(&self) -> Vec<u8> {
        let mut unsigned = self.clone();
        unsigned.signature = None;
        bincode::serialize(&unsigned).unwrap()
    }

    /// Hash of the signing preimage
    pub fn hash_for_signing(&self) -> Hash {
        self.signing_bytes().hash()
    }

    /// Transaction identity: hash over the full signed encoding
    pub fn hash(&self) -> Hash {
        bincode::serialize(self).unwrap().hash()
    }

    /// Signs the transaction in place
    pub fn sign(&mut self, keypair: &KeyPair) -> ChainResult<()> {
        let signature = keypair.sign(&self.signing_bytes())?;
        self.signature = Some(signature);
        Ok(())
    }

    /// Verifies the signature against the embedded public key.
    ///
    /// Returns `Ok(false)` when the signature does not match, when it is
    /// missing, or when the sender address was not derived from the key.
    pub fn verify_signature(&self) -> ChainResult<bool> {
        let signature = match &self.signature {
            Some(sig) => sig,
            None => return Ok(false),
        };
        if Address::from_public_key(&self.public_key) != self.from {
            return Ok(false);
        }
        Ok(signature.verify(&self.signing_bytes(), &self.public_key)?)
    }

    /// Structural validity, independent of any state
    pub fn validate_basic(&self) -> ChainResult<()> {
        if self.signature.is_none() {
            return Err(ChainError::InvalidTransaction("missing signature".into()));
        }
        if self.gas_limit == 0 {
            return Err(ChainError::InvalidTransaction("gas limit is zero".into()));
        }
        if self.gas_price == 0 {
            return Err(ChainError::InvalidTransaction("gas price is zero".into()));
        }
        match &self.kind {
            TxKind::Transfer { to, .. } => {
                if to.is_zero() {
                    return Err(ChainError::InvalidTransaction(
                        "transfer to the zero address".into(),
                    ));
                }
            }
            TxKind::ContractCall { contract, .. } => {
                if contract.is_zero() {
                    return Err(ChainError::InvalidTransaction(
                        "call to the zero address".into(),
                    ));
                }
            }
            TxKind::ContractCreate { code, .. } => {
                if code.is_empty() {
                    return Err(ChainError::InvalidTransaction("empty contract code".into()));
                }
            }
            TxKind::AddValidator { validator, .. } | TxKind::RemoveValidator { validator } => {
                if validator.is_zero() {
                    return Err(ChainError::InvalidTransaction(
                        "zero validator address".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// The account receiving value, if any
    pub fn recipient(&self) -> Option<Address> {
        match &self.kind {
            TxKind::Transfer { to, .. } => Some(*to),
            TxKind::ContractCall { contract, .. } => Some(*contract),
            TxKind::ContractCreate { .. } => None,
            TxKind::AddValidator { .. } | TxKind::RemoveValidator { .. } => None,
        }
    }

    /// The value moved by this transaction
    pub fn value(&self) -> Amount {
        match &self.kind {
            TxKind::Transfer { amount, .. } => amount.clone(),
            TxKind::ContractCall { value, .. } => value.clone(),
            TxKind::ContractCreate { value, .. } => value.clone(),
            TxKind::AddValidator { .. } | TxKind::RemoveValidator { .. } => Amount::zero(),
        }
    }

    /// The largest fee this transaction can incur
    pub fn max_fee(&self) -> Amount {
        Amount::from_u128(self.gas_limit as u128 * self.gas_price as u128)
    }

    /// Value plus maximum fee, what the sender must be able to cover
    pub fn max_cost(&self) -> Amount {
        // BigUint addition cannot overflow
        self.value().checked_add(&self.max_fee()).unwrap_or_default()
    }
}

/// Outcome class of an executed transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecStatus {
    /// All effects applied
    Success,
    /// Execution failed, only gas and nonce were charged
    Failed,
    /// Contract asked to revert, only gas and nonce were charged
    Reverted,
}

impl ExecStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecStatus::Success)
    }
}

/// A log entry emitted during contract execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<Hash>,
    pub data: Vec<u8>,
}

/// The result of executing one transaction in a committed block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: Hash,
    pub block_hash: Hash,
    pub block_height: Height,
    pub from: Address,
    pub to: Option<Address>,
    pub status: ExecStatus,
    pub gas_used: Gas,
    pub output: Vec<u8>,
    pub logs: Vec<LogEntry>,
    pub contract_address: Option<Address>,
    pub error: Option<String>,
}
