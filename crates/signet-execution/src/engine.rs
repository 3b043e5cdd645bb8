//! The execution engine: applies transactions to state snapshots.
//!
//! Execution is deterministic. Given the same snapshot, transaction, and
//! block environment, `apply` produces the same receipt and the same
//! state writes, which is what lets consensus re-execute a proposed
//! block and compare roots.
//!
//! A transaction that runs and fails still yields a receipt: the gas
//! charge and the nonce increment stay, everything else is rolled back.
//! Only transactions that cannot be charged at all (wrong nonce, fee not
//! coverable, intrinsic gas above the limit) are inapplicable and leave
//! the snapshot untouched.

use std::sync::Arc;

use signet_core::state::{StateSnapshot, ValidatorRecord};
use signet_core::transaction::{ExecStatus, LogEntry, Receipt, Transaction, TxKind};
use signet_core::types::{Amount, Gas, Height, TimestampMs};
use signet_core::ChainError;
use signet_crypto::{Address, Hash, Hashable, PublicKey};
use tracing::trace;

use crate::gas::{GasMeter, GasSchedule};
use crate::runtime::{ContractRuntime, ExecContext, RuntimeError, StackRuntime};
use crate::{ExecutionError, ExecutionResult};

/// The block being built or re-executed
#[derive(Debug, Clone)]
pub struct BlockEnv {
    pub height: Height,
    pub timestamp: TimestampMs,
    /// Receives the gas fees; the zero address burns them
    pub producer: Address,
}

/// How a transaction's effect phase ended
enum EffectOutcome {
    Ok {
        output: Vec<u8>,
        logs: Vec<LogEntry>,
        contract_address: Option<Address>,
    },
    Failed {
        reason: String,
        contract_address: Option<Address>,
    },
    Reverted {
        reason: String,
        contract_address: Option<Address>,
    },
    OutOfGas {
        contract_address: Option<Address>,
    },
}

/// Applies transactions and produces receipts
#[derive(Clone)]
pub struct ExecutionEngine {
    schedule: GasSchedule,
    runtime: Arc<dyn ContractRuntime>,
    /// Heights between a validator change commit and its activation
    validator_delay: Height,
}

impl ExecutionEngine {
    pub fn new(
        schedule: GasSchedule,
        runtime: Arc<dyn ContractRuntime>,
        validator_delay: Height,
    ) -> Self {
        ExecutionEngine {
            schedule,
            runtime,
            validator_delay,
        }
    }

    /// Engine with the default schedule and the built-in stack runtime
    pub fn with_defaults(validator_delay: Height) -> Self {
        let schedule = GasSchedule::default();
        let runtime = Arc::new(StackRuntime::new(schedule.clone()));
        ExecutionEngine::new(schedule, runtime, validator_delay)
    }

    pub fn schedule(&self) -> &GasSchedule {
        &self.schedule
    }

    /// Applies one transaction to the snapshot and returns its receipt.
    ///
    /// The receipt's `block_hash` is left zeroed; the committer stamps
    /// it once the block identity is known.
    pub fn apply(
        &self,
        snapshot: &mut StateSnapshot,
        tx: &Transaction,
        env: &BlockEnv,
    ) -> ExecutionResult<Receipt> {
        let sender = tx.from;
        let account = snapshot.account(&sender);

        if tx.nonce != account.nonce {
            return Err(ExecutionError::NonceMismatch {
                got: tx.nonce,
                expected: account.nonce,
            });
        }

        let intrinsic = self.schedule.intrinsic_gas(&tx.kind);
        if intrinsic > tx.gas_limit {
            return Err(ExecutionError::IntrinsicGasTooHigh {
                required: intrinsic,
                limit: tx.gas_limit,
            });
        }

        let max_fee = tx.max_fee();
        if account.balance < max_fee {
            return Err(ExecutionError::CannotPayGas {
                balance: account.balance.to_decimal_string(),
                max_fee: max_fee.to_decimal_string(),
            });
        }

        // From here on the transaction is in the block: nonce and gas
        // charges stick regardless of how execution goes.
        snapshot.bump_nonce(&sender);
        snapshot.debit(&sender, &max_fee)?;

        let mut meter = GasMeter::new(tx.gas_limit);
        if meter.consume(intrinsic).is_err() {
            // guarded above
            return Err(ExecutionError::IntrinsicGasTooHigh {
                required: intrinsic,
                limit: tx.gas_limit,
            });
        }

        snapshot.checkpoint();
        let outcome = self.execute_kind(snapshot, tx, env, &mut meter);

        let (status, output, logs, contract_address, error, gas_used) = match outcome {
            EffectOutcome::Ok {
                output,
                logs,
                contract_address,
            } => {
                snapshot.commit_checkpoint();
                (ExecStatus::Success, output, logs, contract_address, None, meter.used())
            }
            EffectOutcome::Failed {
                reason,
                contract_address,
            } => {
                snapshot.revert_to_checkpoint();
                (
                    ExecStatus::Failed,
                    Vec::new(),
                    Vec::new(),
                    contract_address,
                    Some(reason),
                    meter.used(),
                )
            }
            EffectOutcome::Reverted {
                reason,
                contract_address,
            } => {
                snapshot.revert_to_checkpoint();
                (
                    ExecStatus::Reverted,
                    Vec::new(),
                    Vec::new(),
                    contract_address,
                    Some(reason),
                    meter.used(),
                )
            }
            EffectOutcome::OutOfGas { contract_address } => {
                snapshot.revert_to_checkpoint();
                (
                    ExecStatus::Failed,
                    Vec::new(),
                    Vec::new(),
                    contract_address,
                    Some("out of gas".to_string()),
                    tx.gas_limit,
                )
            }
        };

        // refund the unused portion of the upfront fee, pay the rest to
        // the producer
        let refund = Amount::from_u128((tx.gas_limit - gas_used) as u128 * tx.gas_price as u128);
        snapshot.credit(&sender, &refund)?;
        let fee = Amount::from_u128(gas_used as u128 * tx.gas_price as u128);
        if !env.producer.is_zero() {
            snapshot.credit(&env.producer, &fee)?;
        }

        trace!(tx = %tx.hash(), ?status, gas_used, "transaction applied");

        Ok(Receipt {
            tx_hash: tx.hash(),
            block_hash: Hash::zero(),
            block_height: env.height,
            from: sender,
            to: tx.recipient(),
            status,
            gas_used,
            output,
            logs,
            contract_address,
            error,
        })
    }

    /// Dry-runs a transaction on a throwaway snapshot and returns the
    /// gas it would consume, padded by ten percent
    pub fn estimate(
        &self,
        mut snapshot: StateSnapshot,
        tx: &Transaction,
        env: &BlockEnv,
    ) -> ExecutionResult<Gas> {
        let receipt = self.apply(&mut snapshot, tx, env)?;
        let padded = receipt.gas_used.saturating_add(receipt.gas_used / 10);
        Ok(padded.max(self.schedule.tx_base))
    }

    fn execute_kind(
        &self,
        snapshot: &mut StateSnapshot,
        tx: &Transaction,
        env: &BlockEnv,
        meter: &mut GasMeter,
    ) -> EffectOutcome {
        match &tx.kind {
            TxKind::Transfer { to, amount } => match self.move_value(snapshot, &tx.from, to, amount) {
                Ok(()) => EffectOutcome::Ok {
                    output: Vec::new(),
                    logs: Vec::new(),
                    contract_address: None,
                },
                Err(reason) => EffectOutcome::Failed {
                    reason,
                    contract_address: None,
                },
            },
            TxKind::ContractCall {
                contract,
                input,
                value,
            } => self.execute_call(snapshot, tx, env, meter, *contract, input, value),
            TxKind::ContractCreate {
                code,
                init_input,
                value,
            } => self.execute_create(snapshot, tx, env, meter, code, init_input, value),
            TxKind::AddValidator {
                validator,
                public_key,
            } => self.add_validator(snapshot, tx, env, validator, public_key),
            TxKind::RemoveValidator { validator } => {
                self.remove_validator(snapshot, tx, env, validator)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn execute_call(
        &self,
        snapshot: &mut StateSnapshot,
        tx: &Transaction,
        env: &BlockEnv,
        meter: &mut GasMeter,
        contract: Address,
        input: &[u8],
        value: &Amount,
    ) -> EffectOutcome {
        let code = match snapshot.contract_code(&contract) {
            Some(code) => code,
            None => {
                return EffectOutcome::Failed {
                    reason: format!("no contract at {}", contract),
                    contract_address: None,
                }
            }
        };

        if let Err(reason) = self.move_value(snapshot, &tx.from, &contract, value) {
            return EffectOutcome::Failed {
                reason,
                contract_address: None,
            };
        }

        let mut ctx = ExecContext::new(
            snapshot,
            contract,
            tx.from,
            value.clone(),
            env.height,
            env.timestamp,
        );
        match self.runtime.execute(&mut ctx, &code, input, meter) {
            Ok(output) => {
                let logs = ctx.take_logs();
                EffectOutcome::Ok {
                    output,
                    logs,
                    contract_address: None,
                }
            }
            Err(err) => runtime_failure(err, None),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn execute_create(
        &self,
        snapshot: &mut StateSnapshot,
        tx: &Transaction,
        env: &BlockEnv,
        meter: &mut GasMeter,
        code: &[u8],
        init_input: &[u8],
        value: &Amount,
    ) -> EffectOutcome {
        let code_hash = code.hash();
        let address = Address::for_contract(&tx.from, tx.nonce, &code_hash);

        if snapshot.contract_code(&address).is_some() {
            return EffectOutcome::Failed {
                reason: format!("address {} is already a contract", address),
                contract_address: Some(address),
            };
        }

        snapshot.deploy_code(address, code.to_vec());
        if let Err(reason) = self.move_value(snapshot, &tx.from, &address, value) {
            return EffectOutcome::Failed {
                reason,
                contract_address: Some(address),
            };
        }

        // the constructor runs once over the init input; its output is
        // discarded
        let mut ctx = ExecContext::new(
            snapshot,
            address,
            tx.from,
            value.clone(),
            env.height,
            env.timestamp,
        );
        match self.runtime.execute(&mut ctx, code, init_input, meter) {
            Ok(_) => {
                let logs = ctx.take_logs();
                EffectOutcome::Ok {
                    output: address.as_bytes().to_vec(),
                    logs,
                    contract_address: Some(address),
                }
            }
            Err(err) => runtime_failure(err, Some(address)),
        }
    }

    fn add_validator(
        &self,
        snapshot: &mut StateSnapshot,
        tx: &Transaction,
        env: &BlockEnv,
        validator: &Address,
        public_key: &PublicKey,
    ) -> EffectOutcome {
        if let Some(reason) = self.check_validator_sender(snapshot, &tx.from, env.height) {
            return EffectOutcome::Failed {
                reason,
                contract_address: None,
            };
        }
        if Address::from_public_key(public_key) != *validator {
            return EffectOutcome::Failed {
                reason: "public key does not match the validator address".to_string(),
                contract_address: None,
            };
        }
        if let Some(record) = snapshot.validator(validator) {
            if record.retired_at.is_none() {
                return EffectOutcome::Failed {
                    reason: format!("{} is already a validator", validator),
                    contract_address: None,
                };
            }
        }

        snapshot.set_validator(
            *validator,
            ValidatorRecord {
                public_key: public_key.clone(),
                joined_at: env.height + self.validator_delay,
                retired_at: None,
            },
        );
        EffectOutcome::Ok {
            output: Vec::new(),
            logs: Vec::new(),
            contract_address: None,
        }
    }

    fn remove_validator(
        &self,
        snapshot: &mut StateSnapshot,
        tx: &Transaction,
        env: &BlockEnv,
        validator: &Address,
    ) -> EffectOutcome {
        if let Some(reason) = self.check_validator_sender(snapshot, &tx.from, env.height) {
            return EffectOutcome::Failed {
                reason,
                contract_address: None,
            };
        }
        let mut record = match snapshot.validator(validator) {
            Some(record) => record,
            None => {
                return EffectOutcome::Failed {
                    reason: format!("{} is not a validator", validator),
                    contract_address: None,
                }
            }
        };
        if record.retired_at.is_some() {
            return EffectOutcome::Failed {
                reason: format!("{} is already retired", validator),
                contract_address: None,
            };
        }

        // never retire the only validator that keeps the chain alive
        let others_active = snapshot
            .validators()
            .filter(|(addr, rec)| *addr != validator && rec.is_active_at(env.height))
            .count();
        if others_active == 0 {
            return EffectOutcome::Failed {
                reason: "cannot retire the last active validator".to_string(),
                contract_address: None,
            };
        }

        record.retired_at = Some(env.height + self.validator_delay);
        snapshot.set_validator(*validator, record);
        EffectOutcome::Ok {
            output: Vec::new(),
            logs: Vec::new(),
            contract_address: None,
        }
    }

    /// Validator set changes must come from an account that is itself an
    /// active validator
    fn check_validator_sender(
        &self,
        snapshot: &StateSnapshot,
        sender: &Address,
        height: Height,
    ) -> Option<String> {
        let is_validator = snapshot
            .validator(sender)
            .map_or(false, |record| record.is_active_at(height));
        if is_validator {
            None
        } else {
            Some(format!("sender {} is not an active validator", sender))
        }
    }

    fn move_value(
        &self,
        snapshot: &mut StateSnapshot,
        from: &Address,
        to: &Address,
        amount: &Amount,
    ) -> Result<(), String> {
        if amount.is_zero() {
            return Ok(());
        }
        match snapshot.debit(from, amount) {
            Ok(()) => {}
            Err(ChainError::InsufficientBalance) => {
                return Err("insufficient balance for value transfer".to_string())
            }
            Err(err) => return Err(err.to_string()),
        }
        snapshot
            .credit(to, amount)
            .map_err(|err| err.to_string())
    }
}

fn runtime_failure(err: RuntimeError, contract_address: Option<Address>) -> EffectOutcome {
    match err {
        RuntimeError::Reverted(reason) => EffectOutcome::Reverted {
            reason,
            contract_address,
        },
        RuntimeError::OutOfGas(_) => EffectOutcome::OutOfGas { contract_address },
        other => EffectOutcome::Failed {
            reason: other.to_string(),
            contract_address,
        },
    }
}
