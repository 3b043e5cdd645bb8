//! Transaction execution for the Signet blockchain.
//!
//! The [`ExecutionEngine`] applies transactions to a state snapshot and
//! produces receipts. Contract code runs in a pluggable
//! [`ContractRuntime`]; the built-in [`StackRuntime`] interprets a small
//! straight-line stack bytecode. Source compilation is delegated to an
//! external [`ContractCompiler`].

pub mod compiler;
pub mod engine;
pub mod gas;
pub mod registry;
pub mod runtime;

pub use compiler::{
    CommandCompiler, CompileError, CompiledContract, ContractCompiler, DisabledCompiler,
};
pub use engine::{BlockEnv, ExecutionEngine};
pub use gas::{GasMeter, GasSchedule, OutOfGas};
pub use registry::ContractMeta;
pub use runtime::{ContractRuntime, ExecContext, RuntimeError, StackRuntime};

use signet_core::types::{Gas, Nonce};

/// Result type for execution operations
pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Errors that make a transaction inapplicable.
///
/// These are distinct from failed execution: a transaction that runs and
/// fails still gets a receipt, while a transaction hitting one of these
/// cannot be included in a block at all.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("nonce mismatch: transaction has {got}, account is at {expected}")]
    NonceMismatch { got: Nonce, expected: Nonce },

    #[error("sender cannot cover the maximum fee: balance {balance}, needs {max_fee}")]
    CannotPayGas { balance: String, max_fee: String },

    #[error("intrinsic gas {required} exceeds the transaction gas limit {limit}")]
    IntrinsicGasTooHigh { required: Gas, limit: Gas },

    #[error("state error: {0}")]
    State(#[from] signet_core::ChainError),
}
