//! Pending transaction pool.
//!
//! Admission is strict: a transaction enters the pool only if its
//! signature checks out, its nonce is exactly the sender's account nonce
//! plus the sender's pending count, and the sender can cover value plus
//! maximum fee. Because of the nonce rule, arrival order within one
//! sender is also nonce order, so the FIFO drain hands block producers a
//! valid sequence without reordering.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;
use signet_crypto::{Address, Hash};
use tracing::{debug, warn};

use crate::transaction::Transaction;
use crate::types::{Amount, GasPrice, Nonce, TimestampMs};
use crate::now_millis;

/// Why a submission was turned away
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("nonce too low: transaction has {got}, account is at {current}")]
    NonceTooLow { got: Nonce, current: Nonce },

    #[error("nonce gap: transaction has {got}, expected {expected}")]
    NonceGap { got: Nonce, expected: Nonce },

    #[error("insufficient balance: need {required}, have {available}")]
    InsufficientBalance { required: String, available: String },

    #[error("duplicate transaction")]
    Duplicate,

    #[error("gas price {got} below pool minimum {min}")]
    GasPriceTooLow { got: GasPrice, min: GasPrice },

    #[error("transaction pool is full")]
    PoolFull,

    #[error("sender has reached the pending transaction limit")]
    SenderLimit,

    #[error("malformed transaction: {0}")]
    Malformed(String),
}

/// Pool limits and admission thresholds
#[derive(Debug, Clone)]
pub struct MempoolConfig {
    /// Maximum transactions held across all senders
    pub max_size: usize,
    /// Maximum pending transactions per sender
    pub max_per_sender: usize,
    /// Minimum gas price accepted into the pool
    pub min_gas_price: GasPrice,
    /// Seconds a transaction may wait before the sweep drops it
    pub ttl_secs: u64,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        MempoolConfig {
            max_size: 10_000,
            max_per_sender: 100,
            min_gas_price: 1,
            ttl_secs: 3_600,
        }
    }
}

/// Counters exposed for diagnostics
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolMetrics {
    pub total_accepted: u64,
    pub total_rejected: u64,
    pub total_expired: u64,
    pub total_evicted: u64,
}

#[derive(Debug, Clone)]
struct PoolEntry {
    transaction: Transaction,
    hash: Hash,
    added_at: TimestampMs,
}

/// FIFO transaction pool with nonce-contiguous admission
#[derive(Debug)]
pub struct Mempool {
    config: MempoolConfig,
    entries: VecDeque<PoolEntry>,
    by_hash: HashSet<Hash>,
    by_sender_nonce: HashSet<(Address, Nonce)>,
    per_sender: HashMap<Address, usize>,
    metrics: PoolMetrics,
}

impl Mempool {
    pub fn new(config: MempoolConfig) -> Self {
        Mempool {
            config,
            entries: VecDeque::new(),
            by_hash: HashSet::new(),
            by_sender_nonce: HashSet::new(),
            per_sender: HashMap::new(),
            metrics: PoolMetrics::default(),
        }
    }

    /// Validates a transaction against the committed account state and
    /// admits it. Returns the transaction hash on acceptance.
    pub fn submit(
        &mut self,
        transaction: Transaction,
        account_nonce: Nonce,
        balance: &Amount,
    ) -> Result<Hash, RejectReason> {
        match self.admit(transaction, account_nonce, balance) {
            Ok(hash) => {
                self.metrics.total_accepted += 1;
                Ok(hash)
            }
            Err(reason) => {
                self.metrics.total_rejected += 1;
                debug!(%reason, "transaction rejected");
                Err(reason)
            }
        }
    }

    fn admit(
        &mut self,
        transaction: Transaction,
        account_nonce: Nonce,
        balance: &Amount,
    ) -> Result<Hash, RejectReason> {
        let hash = transaction.hash();
        if self.by_hash.contains(&hash) {
            return Err(RejectReason::Duplicate);
        }

        transaction
            .validate_basic()
            .map_err(|e| RejectReason::Malformed(e.to_string()))?;

        let valid = transaction
            .verify_signature()
            .map_err(|e| RejectReason::Malformed(e.to_string()))?;
        if !valid {
            return Err(RejectReason::InvalidSignature);
        }

        if transaction.gas_price < self.config.min_gas_price {
            return Err(RejectReason::GasPriceTooLow {
                got: transaction.gas_price,
                min: self.config.min_gas_price,
            });
        }

        let sender = transaction.from;
        let pending = self.per_sender.get(&sender).copied().unwrap_or(0);
        let expected = account_nonce + pending as Nonce;

        if transaction.nonce < account_nonce {
            return Err(RejectReason::NonceTooLow {
                got: transaction.nonce,
                current: account_nonce,
            });
        }
        if transaction.nonce < expected {
            // a pending transaction already claims this nonce
            return Err(RejectReason::Duplicate);
        }
        if transaction.nonce > expected {
            return Err(RejectReason::NonceGap {
                got: transaction.nonce,
                expected,
            });
        }

        let required = transaction.max_cost();
        if balance < &required {
            return Err(RejectReason::InsufficientBalance {
                required: required.to_decimal_string(),
                available: balance.to_decimal_string(),
            });
        }

        if pending >= self.config.max_per_sender {
            return Err(RejectReason::SenderLimit);
        }
        if self.entries.len() >= self.config.max_size {
            return Err(RejectReason::PoolFull);
        }

        self.by_hash.insert(hash);
        self.by_sender_nonce.insert((sender, transaction.nonce));
        *self.per_sender.entry(sender).or_insert(0) += 1;
        self.entries.push_back(PoolEntry {
            transaction,
            hash,
            added_at: now_millis(),
        });
        Ok(hash)
    }

    /// Removes and returns up to `max` transactions in arrival order
    pub fn drain(&mut self, max: usize) -> Vec<Transaction> {
        let take = max.min(self.entries.len());
        let mut drained = Vec::with_capacity(take);
        for _ in 0..take {
            let entry = match self.entries.pop_front() {
                Some(entry) => entry,
                None => break,
            };
            self.unindex(&entry);
            drained.push(entry.transaction);
        }
        drained
    }

    /// Puts transactions from a rejected block back at the head of the
    /// pool, preserving their relative order. Admission checks already
    /// passed once; only duplicates and capacity are re-checked.
    pub fn requeue(&mut self, transactions: Vec<Transaction>) {
        for transaction in transactions.into_iter().rev() {
            let hash = transaction.hash();
            if self.by_hash.contains(&hash) {
                continue;
            }
            if self.entries.len() >= self.config.max_size {
                warn!(tx = %hash, "pool full, dropping requeued transaction");
                self.metrics.total_evicted += 1;
                continue;
            }
            self.by_hash.insert(hash);
            self.by_sender_nonce.insert((transaction.from, transaction.nonce));
            *self.per_sender.entry(transaction.from).or_insert(0) += 1;
            self.entries.push_front(PoolEntry {
                transaction,
                hash,
                added_at: now_millis(),
            });
        }
    }

    /// Drops a single transaction by hash
    pub fn evict(&mut self, hash: &Hash) -> bool {
        let pos = match self.entries.iter().position(|e| e.hash == *hash) {
            Some(pos) => pos,
            None => return false,
        };
        let entry = match self.entries.remove(pos) {
            Some(entry) => entry,
            None => return false,
        };
        self.unindex(&entry);
        self.metrics.total_evicted += 1;
        true
    }

    /// Drops transactions that were confirmed in a committed block
    pub fn remove_confirmed(&mut self, hashes: &[Hash]) {
        let confirmed: HashSet<&Hash> = hashes.iter().collect();
        let mut kept = VecDeque::with_capacity(self.entries.len());
        for entry in std::mem::take(&mut self.entries) {
            if confirmed.contains(&entry.hash) {
                self.unindex(&entry);
            } else {
                kept.push_back(entry);
            }
        }
        self.entries = kept;
    }

    /// Drops transactions older than the configured TTL, returning how
    /// many expired
    pub fn sweep(&mut self, now: TimestampMs) -> usize {
        let ttl_ms = self.config.ttl_secs * 1_000;
        let mut kept = VecDeque::with_capacity(self.entries.len());
        let mut expired = 0usize;
        for entry in std::mem::take(&mut self.entries) {
            if now.saturating_sub(entry.added_at) > ttl_ms {
                self.unindex(&entry);
                expired += 1;
            } else {
                kept.push_back(entry);
            }
        }
        self.entries = kept;
        if expired > 0 {
            self.metrics.total_expired += expired as u64;
            debug!(expired, "expired transactions swept from pool");
        }
        expired
    }

    fn unindex(&mut self, entry: &PoolEntry) {
        self.by_hash.remove(&entry.hash);
        self.by_sender_nonce
            .remove(&(entry.transaction.from, entry.transaction.nonce));
        if let Some(count) = self.per_sender.get_mut(&entry.transaction.from) {
            *count -= 1;
            if *count == 0 {
                self.per_sender.remove(&entry.transaction.from);
            }
        }
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.by_hash.contains(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<&Transaction> {
        self.entries
            .iter()
            .find(|e| e.hash == *hash)
            .map(|e| &e.transaction)
    }

    /// Pending transactions in arrival order, without removing them
    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.entries.iter().map(|e| &e.transaction)
    }

    /// Next usable nonce for a sender: account nonce plus pending count
    pub fn pending_nonce(&self, sender: &Address, account_nonce: Nonce) -> Nonce {
        account_nonce + self.per_sender.get(sender).copied().unwrap_or(0) as Nonce
    }

    pub fn pending_count(&self, sender: &Address) -> usize {
        self.per_sender.get(sender).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn metrics(&self) -> &PoolMetrics {
        &self.metrics
    }
}
