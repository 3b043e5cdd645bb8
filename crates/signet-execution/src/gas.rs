//! Gas schedule and metering.

use serde::{Deserialize, Serialize};
use signet_core::transaction::TxKind;
use signet_core::types::Gas;

/// Cost table for transaction execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasSchedule {
    /// Flat cost of any transaction
    pub tx_base: Gas,
    /// Per zero byte of transaction payload
    pub data_zero_byte: Gas,
    /// Per non-zero byte of transaction payload
    pub data_byte: Gas,
    /// Flat surcharge for deploying a contract
    pub create_base: Gas,
    /// Per byte of deployed code
    pub code_byte: Gas,
    /// Per interpreted instruction
    pub step: Gas,
    /// Reading one storage word
    pub sload: Gas,
    /// Writing a fresh storage word
    pub sstore_set: Gas,
    /// Overwriting an existing storage word
    pub sstore_update: Gas,
    /// Emitting a log entry
    pub log_base: Gas,
    /// Per log topic
    pub log_topic: Gas,
    /// Per byte of log data
    pub log_data_byte: Gas,
    /// Flat cost of a validator set change
    pub validator_op: Gas,
}

impl Default for GasSchedule {
    fn default() -> Self {
        GasSchedule {
            tx_base: 21_000,
            data_zero_byte: 4,
            data_byte: 68,
            create_base: 32_000,
            code_byte: 200,
            step: 3,
            sload: 800,
            sstore_set: 20_000,
            sstore_update: 5_000,
            log_base: 375,
            log_topic: 375,
            log_data_byte: 8,
            validator_op: 50_000,
        }
    }
}

impl GasSchedule {
    /// Gas charged before any execution happens: the base cost plus
    /// payload bytes, plus flat surcharges per transaction kind
    pub fn intrinsic_gas(&self, kind: &TxKind) -> Gas {
        let mut gas = self.tx_base;
        match kind {
            TxKind::Transfer { .. } => {}
            TxKind::ContractCall { input, .. } => {
                gas = gas.saturating_add(self.payload_gas(input));
            }
            TxKind::ContractCreate { code, init_input, .. } => {
                gas = gas
                    .saturating_add(self.create_base)
                    .saturating_add(self.payload_gas(code))
                    .saturating_add(self.payload_gas(init_input))
                    .saturating_add(self.code_byte.saturating_mul(code.len() as Gas));
            }
            TxKind::AddValidator { .. } | TxKind::RemoveValidator { .. } => {
                gas = gas.saturating_add(self.validator_op);
            }
        }
        gas
    }

    /// Byte-granular payload cost, zero bytes cheaper than non-zero
    pub fn payload_gas(&self, data: &[u8]) -> Gas {
        let zero = data.iter().filter(|b| **b == 0).count() as Gas;
        let non_zero = data.len() as Gas - zero;
        self.data_zero_byte
            .saturating_mul(zero)
            .saturating_add(self.data_byte.saturating_mul(non_zero))
    }

    /// Cost of one log emission
    pub fn log_gas(&self, topic_count: usize, data_len: usize) -> Gas {
        self.log_base
            .saturating_add(self.log_topic.saturating_mul(topic_count as Gas))
            .saturating_add(self.log_data_byte.saturating_mul(data_len as Gas))
    }
}

/// Raised when a meter cannot cover a charge
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("out of gas: needed {needed}, remaining {remaining}")]
pub struct OutOfGas {
    pub needed: Gas,
    pub remaining: Gas,
}

/// Tracks gas consumption against a limit
#[derive(Debug, Clone)]
pub struct GasMeter {
    limit: Gas,
    used: Gas,
}

impl GasMeter {
    pub fn new(limit: Gas) -> Self {
        GasMeter { limit, used: 0 }
    }

    /// Charges `amount`, failing without charging if it would exceed
    /// the limit
    pub fn consume(&mut self, amount: Gas) -> Result<(), OutOfGas> {
        let after = self.used.saturating_add(amount);
        if after > self.limit {
            return Err(OutOfGas {
                needed: amount,
                remaining: self.limit - self.used,
            });
        }
        self.used = after;
        Ok(())
    }

    pub fn used(&self) -> Gas {
        self.used
    }

    pub fn remaining(&self) -> Gas {
        self.limit - self.used
    }

    pub fn limit(&self) -> Gas {
        self.limit
    }
}
