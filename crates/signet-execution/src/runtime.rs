//! Contract runtime.
//!
//! Contracts are bytecode for a small stack machine operating on 32-byte
//! big-endian words. The instruction set is straight-line (no jumps), so
//! every program terminates; gas still bounds the work per instruction
//! and per storage access. Arithmetic is checked: overflow aborts the
//! call instead of wrapping.

use signet_core::state::{StateSnapshot, StorageKey, StorageWord};
use signet_core::transaction::LogEntry;
use signet_core::types::{Amount, Height, TimestampMs};
use signet_crypto::{Address, Hash};

use crate::gas::{GasMeter, GasSchedule, OutOfGas};

/// One 32-byte machine word
pub type Word = [u8; 32];

/// Maximum operand stack depth
pub const STACK_LIMIT: usize = 64;

/// Opcode bytes
pub mod op {
    pub const STOP: u8 = 0x00;
    pub const PUSH32: u8 = 0x01;
    pub const PUSH1: u8 = 0x02;
    pub const POP: u8 = 0x03;
    pub const DUP: u8 = 0x04;
    pub const SWAP: u8 = 0x05;
    pub const ADD: u8 = 0x10;
    pub const SUB: u8 = 0x11;
    pub const CALLER: u8 = 0x20;
    pub const ADDRESS: u8 = 0x21;
    pub const VALUE: u8 = 0x22;
    pub const HEIGHT: u8 = 0x23;
    pub const TIMESTAMP: u8 = 0x24;
    pub const INPUT: u8 = 0x30;
    pub const INPUTSIZE: u8 = 0x31;
    pub const SLOAD: u8 = 0x40;
    pub const SSTORE: u8 = 0x41;
    pub const LOG: u8 = 0x50;
    pub const RETURN: u8 = 0x60;
    pub const REVERT: u8 = 0x61;
}

/// Failures during a contract call.
///
/// `Reverted` is an intentional abort requested by the contract; the
/// rest are faults. Either way the caller discards the call's state
/// changes and keeps the gas charge.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("execution reverted: {0}")]
    Reverted(String),

    #[error(transparent)]
    OutOfGas(#[from] OutOfGas),

    #[error("invalid opcode 0x{opcode:02x} at offset {offset}")]
    InvalidOpcode { opcode: u8, offset: usize },

    #[error("truncated instruction at offset {0}")]
    TruncatedCode(usize),

    #[error("stack underflow at offset {0}")]
    StackUnderflow(usize),

    #[error("stack overflow at offset {0}")]
    StackOverflow(usize),

    #[error("arithmetic overflow")]
    Overflow,

    #[error("arithmetic underflow")]
    Underflow,

    #[error("call value does not fit in a word")]
    ValueTooLarge,
}

impl RuntimeError {
    pub fn is_revert(&self) -> bool {
        matches!(self, RuntimeError::Reverted(_))
    }
}

/// Everything a contract call can see and touch
pub struct ExecContext<'a> {
    pub contract: Address,
    pub caller: Address,
    pub value: Amount,
    pub block_height: Height,
    pub block_timestamp: TimestampMs,
    snapshot: &'a mut StateSnapshot,
    logs: Vec<LogEntry>,
}

impl<'a> ExecContext<'a> {
    pub fn new(
        snapshot: &'a mut StateSnapshot,
        contract: Address,
        caller: Address,
        value: Amount,
        block_height: Height,
        block_timestamp: TimestampMs,
    ) -> Self {
        ExecContext {
            contract,
            caller,
            value,
            block_height,
            block_timestamp,
            snapshot,
            logs: Vec::new(),
        }
    }

    pub fn storage_get(&self, key: &StorageKey) -> Option<StorageWord> {
        self.snapshot.storage_get(&self.contract, key)
    }

    pub fn storage_set(&mut self, key: StorageKey, value: StorageWord) {
        self.snapshot.storage_set(self.contract, key, value);
    }

    pub fn emit_log(&mut self, topics: Vec<Hash>, data: Vec<u8>) {
        self.logs.push(LogEntry {
            address: self.contract,
            topics,
            data,
        });
    }

    /// Drains the logs emitted so far
    pub fn take_logs(&mut self) -> Vec<LogEntry> {
        std::mem::take(&mut self.logs)
    }
}

/// Executes contract code against a call context
pub trait ContractRuntime: Send + Sync {
    fn execute(
        &self,
        ctx: &mut ExecContext<'_>,
        code: &[u8],
        input: &[u8],
        meter: &mut GasMeter,
    ) -> Result<Vec<u8>, RuntimeError>;
}

/// The built-in stack machine interpreter
#[derive(Debug, Clone)]
pub struct StackRuntime {
    schedule: GasSchedule,
}

impl StackRuntime {
    pub fn new(schedule: GasSchedule) -> Self {
        StackRuntime { schedule }
    }
}

impl Default for StackRuntime {
    fn default() -> Self {
        StackRuntime::new(GasSchedule::default())
    }
}

impl ContractRuntime for StackRuntime {
    fn execute(
        &self,
        ctx: &mut ExecContext<'_>,
        code: &[u8],
        input: &[u8],
        meter: &mut GasMeter,
    ) -> Result<Vec<u8>, RuntimeError> {
        let mut stack: Vec<Word> = Vec::new();
        let mut pc = 0usize;

        macro_rules! pop {
            () => {
                stack.pop().ok_or(RuntimeError::StackUnderflow(pc))?
            };
        }

        while pc < code.len() {
            let opcode = code[pc];
            meter.consume(self.schedule.step)?;

            match opcode {
                op::STOP => return Ok(Vec::new()),
                op::PUSH32 => {
                    let end = pc + 1 + 32;
                    if end > code.len() {
                        return Err(RuntimeError::TruncatedCode(pc));
                    }
                    let mut word = [0u8; 32];
                    word.copy_from_slice(&code[pc + 1..end]);
                    push(&mut stack, word, pc)?;
                    pc = end;
                    continue;
                }
                op::PUSH1 => {
                    if pc + 1 >= code.len() {
                        return Err(RuntimeError::TruncatedCode(pc));
                    }
                    let mut word = [0u8; 32];
                    word[31] = code[pc + 1];
                    push(&mut stack, word, pc)?;
                    pc += 2;
                    continue;
                }
                op::POP => {
                    pop!();
                }
                op::DUP => {
                    let top = *stack.last().ok_or(RuntimeError::StackUnderflow(pc))?;
                    push(&mut stack, top, pc)?;
                }
                op::SWAP => {
                    let len = stack.len();
                    if len < 2 {
                        return Err(RuntimeError::StackUnderflow(pc));
                    }
                    stack.swap(len - 1, len - 2);
                }
                op::ADD => {
                    let a = pop!();
                    let b = pop!();
                    push(&mut stack, word_add(&b, &a)?, pc)?;
                }
                op::SUB => {
                    let a = pop!();
                    let b = pop!();
                    push(&mut stack, word_sub(&b, &a)?, pc)?;
                }
                op::CALLER => {
                    push(&mut stack, word_from_address(&ctx.caller), pc)?;
                }
                op::ADDRESS => {
                    push(&mut stack, word_from_address(&ctx.contract), pc)?;
                }
                op::VALUE => {
                    push(&mut stack, word_from_amount(&ctx.value)?, pc)?;
                }
                op::HEIGHT => {
                    push(&mut stack, word_from_u64(ctx.block_height), pc)?;
                }
                op::TIMESTAMP => {
                    push(&mut stack, word_from_u64(ctx.block_timestamp), pc)?;
                }
                op::INPUT => {
                    let index = pop!();
                    let word = match word_to_u64(&index) {
                        Some(i) => input_word(input, i as usize),
                        None => [0u8; 32],
                    };
                    push(&mut stack, word, pc)?;
                }
                op::INPUTSIZE => {
                    push(&mut stack, word_from_u64(input.len() as u64), pc)?;
                }
                op::SLOAD => {
                    meter.consume(self.schedule.sload)?;
                    let key = pop!();
                    let value = ctx.storage_get(&key).unwrap_or([0u8; 32]);
                    push(&mut stack, value, pc)?;
                }
                op::SSTORE => {
                    let key = pop!();
                    let value = pop!();
                    let cost = if ctx.storage_get(&key).is_some() {
                        self.schedule.sstore_update
                    } else {
                        self.schedule.sstore_set
                    };
                    meter.consume(cost)?;
                    ctx.storage_set(key, value);
                }
                op::LOG => {
                    let topic = pop!();
                    let data = pop!();
                    meter.consume(self.schedule.log_gas(1, data.len()))?;
                    ctx.emit_log(vec![Hash::new(topic)], data.to_vec());
                }
                op::RETURN => {
                    let word = pop!();
                    return Ok(word.to_vec());
                }
                op::REVERT => {
                    let word = pop!();
                    return Err(RuntimeError::Reverted(word_message(&word)));
                }
                other => {
                    return Err(RuntimeError::InvalidOpcode {
                        opcode: other,
                        offset: pc,
                    })
                }
            }
            pc += 1;
        }

        Ok(Vec::new())
    }
}

fn push(stack: &mut Vec<Word>, word: Word, pc: usize) -> Result<(), RuntimeError> {
    if stack.len() >= STACK_LIMIT {
        return Err(RuntimeError::StackOverflow(pc));
    }
    stack.push(word);
    Ok(())
}

/// Big-endian checked addition over words
fn word_add(left: &Word, right: &Word) -> Result<Word, RuntimeError> {
    let mut out = [0u8; 32];
    let mut carry = 0u16;
    for i in (0..32).rev() {
        let sum = left[i] as u16 + right[i] as u16 + carry;
        out[i] = (sum & 0xff) as u8;
        carry = sum >> 8;
    }
    if carry != 0 {
        return Err(RuntimeError::Overflow);
    }
    Ok(out)
}

/// Big-endian checked subtraction over words
fn word_sub(left: &Word, right: &Word) -> Result<Word, RuntimeError> {
    let mut out = [0u8; 32];
    let mut borrow = 0i16;
    for i in (0..32).rev() {
        let diff = left[i] as i16 - right[i] as i16 - borrow;
        if diff < 0 {
            out[i] = (diff + 256) as u8;
            borrow = 1;
        } else {
            out[i] = diff as u8;
            borrow = 0;
        }
    }
    if borrow != 0 {
        return Err(RuntimeError::Underflow);
    }
    Ok(out)
}

/// The word at `input[index * 32 ..]`, zero-padded past the end
fn input_word(input: &[u8], index: usize) -> Word {
    let mut word = [0u8; 32];
    let start = index.saturating_mul(32);
    if start < input.len() {
        let end = (start + 32).min(input.len());
        word[..end - start].copy_from_slice(&input[start..end]);
    }
    word
}

pub fn word_from_u64(value: u64) -> Word {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

/// The low 8 bytes as a u64, `None` if the high bytes are set
pub fn word_to_u64(word: &Word) -> Option<u64> {
    if word[..24].iter().any(|b| *b != 0) {
        return None;
    }
    Some(u64::from_be_bytes(word[24..].try_into().unwrap()))
}

pub fn word_from_address(address: &Address) -> Word {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_bytes());
    word
}

fn word_from_amount(amount: &Amount) -> Result<Word, RuntimeError> {
    let bytes = amount.inner().to_bytes_be();
    if bytes.len() > 32 {
        return Err(RuntimeError::ValueTooLarge);
    }
    let mut word = [0u8; 32];
    word[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(word)
}

/// Interprets a word's trailing bytes as a revert message
fn word_message(word: &Word) -> String {
    let start = word.iter().position(|b| *b != 0).unwrap_or(32);
    let text: String = word[start..]
        .iter()
        .map(|b| {
            if b.is_ascii_graphic() || *b == b' ' {
                *b as char
            } else {
                '?'
            }
        })
        .collect();
    if text.is_empty() {
        "reverted".to_string()
    } else {
        text
    }
}
