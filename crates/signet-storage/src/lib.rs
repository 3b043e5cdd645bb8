//! Persistent chain storage on sled.
//!
//! Committed blocks, receipts, and contract metadata live in one
//! embedded database with a named tree per record family. The head
//! pointer is written after the block data, so a crash mid-commit
//! leaves the store at the previous head with at worst some orphaned
//! records that the next commit overwrites.

pub mod store;

pub use store::{ChainStore, StoreConfig, Tree};

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),

    #[error("encoding error: {0}")]
    Codec(String),

    #[error("corruption detected: {0}")]
    Corrupt(String),
}
