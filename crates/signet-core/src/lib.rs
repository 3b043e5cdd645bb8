//! Core chain types for the Signet blockchain.
//!
//! This crate defines the data model shared by every other component:
//! transactions, blocks, receipts, the account state store, the mempool,
//! and the event bus that fans out commit notifications.

pub mod block;
pub mod events;
pub mod mempool;
pub mod state;
pub mod transaction;
pub mod types;

pub use block::{Block, BlockHeader};
pub use events::{ChainEvent, EventBus, EventFilter, EventStream};
pub use mempool::{Mempool, MempoolConfig, RejectReason};
pub use state::{AccountState, ChainState, StateSnapshot, StateStore, ValidatorRecord};
pub use transaction::{ExecStatus, LogEntry, Receipt, Transaction, TxKind};
pub use types::{Amount, Gas, GasPrice, Height, Nonce, Round, StateVersion, TimestampMs};

use signet_crypto::{CryptoError, Hash};

/// Result type for core chain operations
pub type ChainResult<T> = Result<T, ChainError>;

/// Errors raised by core chain types
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Transaction rejected: {0}")]
    Rejected(#[from] RejectReason),

    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("Balance overflow")]
    BalanceOverflow,

    #[error("Snapshot is stale: based on version {base}, committed version is {head}")]
    StaleSnapshot { base: StateVersion, head: StateVersion },

    #[error("Block not found: {0}")]
    BlockNotFound(Hash),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(Hash),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> types::TimestampMs {
    chrono::Utc::now().timestamp_millis() as types::TimestampMs
}
