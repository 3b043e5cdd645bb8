//! Proof-of-authority consensus for the Signet blockchain.
//!
//! Validators take turns producing blocks in round-robin order. The
//! [`ConsensusEngine`] validates and commits proposed blocks serially,
//! re-executing every transaction against its own snapshot before
//! accepting a state root. The [`BlockProducer`] drives the local
//! validator's turn.

pub mod engine;
pub mod gossip;
pub mod producer;
pub mod validator;

pub use engine::{BlockSink, CommitOutcome, ConsensusConfig, ConsensusEngine, HeadInfo, SinkError};
pub use gossip::{GossipSink, NullGossip};
pub use producer::{BlockProducer, ProducerConfig, ProducerPhase};
pub use validator::{ProductionStats, ValidatorEntry, ValidatorSet};

use signet_core::types::{Height, Round, TimestampMs};
use signet_core::ChainError;
use signet_crypto::{Address, Hash};
use signet_execution::ExecutionError;

/// Result type for consensus operations
pub type ConsensusResult<T> = Result<T, ConsensusError>;

/// Why a block was rejected or a consensus operation failed
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    #[error("producer {0} is not in the active validator set")]
    UnknownValidator(Address),

    #[error("wrong producer for height {height} round {round}: expected {expected}, got {got}")]
    WrongProducer {
        height: Height,
        round: Round,
        expected: Address,
        got: Address,
    },

    #[error("producer signature does not verify")]
    InvalidBlockSignature,

    #[error("parent mismatch: block references {got}, head is {head}")]
    ParentMismatch { got: Hash, head: Hash },

    #[error("stale block at height {height}, head is already {head}")]
    StaleHeight { height: Height, head: Height },

    #[error("block at height {height} skips ahead of head {head}")]
    FutureHeight { height: Height, head: Height },

    #[error("block timestamp {timestamp} is too far in the future (now {now})")]
    TimestampInFuture { timestamp: TimestampMs, now: TimestampMs },

    #[error("block timestamp {timestamp} violates the minimum interval after {parent}")]
    IntervalViolation {
        timestamp: TimestampMs,
        parent: TimestampMs,
    },

    #[error("state root mismatch: header declares {declared}, re-execution got {computed}")]
    StateRootMismatch { declared: Hash, computed: Hash },

    #[error("gas total mismatch: header declares {declared}, re-execution got {computed}")]
    GasMismatch { declared: u64, computed: u64 },

    #[error("duplicate nonce {nonce} for {sender} within one block")]
    DuplicateNonce { sender: Address, nonce: u64 },

    #[error("invalid transaction in block: {0}")]
    InvalidTransaction(String),

    #[error("competing block lost fork resolution to {winner}")]
    ForkLost { winner: Hash },

    #[error("no active validators at height {0}")]
    EmptyValidatorSet(Height),

    #[error("consensus is halted")]
    Halted,

    #[error("storage failure during commit: {0}")]
    Storage(String),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}
