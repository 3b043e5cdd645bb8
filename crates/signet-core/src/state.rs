//! Account state, snapshots, and the committed state store.
//!
//! All reads and writes during execution go through a [`StateSnapshot`]
//! taken from the [`StateStore`]. Snapshots are isolated: nothing is
//! visible to readers until the snapshot is committed, and a snapshot
//! whose base version is no longer the committed version is rejected
//! with [`ChainError::StaleSnapshot`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use signet_crypto::{Address, Hash, HashAlgorithm, Hashable, PublicKey};
use tracing::debug;

use crate::types::{Amount, Height, Nonce, StateVersion};
use crate::{ChainError, ChainResult};

/// Contract storage key, one 32-byte word
pub type StorageKey = [u8; 32];

/// Contract storage value, one 32-byte word
pub type StorageWord = [u8; 32];

/// Balance, nonce, and code reference of one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AccountState {
    pub nonce: Nonce,
    pub balance: Amount,
    pub code_hash: Option<Hash>,
}

impl AccountState {
    pub fn with_balance(balance: Amount) -> Self {
        AccountState {
            nonce: 0,
            balance,
            code_hash: None,
        }
    }

    pub fn is_contract(&self) -> bool {
        self.code_hash.is_some()
    }
}

/// Validator membership entry, part of consensus-critical state.
///
/// `joined_at` is the activation height, which lies after the height of
/// the admitting block by the configured delay. A retired validator keeps
/// its record with `retired_at` set so historic blocks stay verifiable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorRecord {
    pub public_key: PublicKey,
    pub joined_at: Height,
    pub retired_at: Option<Height>,
}

impl ValidatorRecord {
    /// Whether this validator may produce and admit blocks at `height`
    pub fn is_active_at(&self, height: Height) -> bool {
        self.joined_at <= height && self.retired_at.map_or(true, |r| height < r)
    }
}

/// The full materialized chain state: accounts, contract code and
/// storage, and the validator set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ChainState {
    accounts: BTreeMap<Address, AccountState>,
    code: BTreeMap<Hash, Vec<u8>>,
    storage: BTreeMap<Address, BTreeMap<StorageKey, StorageWord>>,
    validators: BTreeMap<Address, ValidatorRecord>,
}

impl ChainState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account(&self, address: &Address) -> Option<&AccountState> {
        self.accounts.get(address)
    }

    pub fn set_account(&mut self, address: Address, account: AccountState) {
        self.accounts.insert(address, account);
    }

    pub fn accounts(&self) -> impl Iterator<Item = (&Address, &AccountState)> {
        self.accounts.iter()
    }

    pub fn code(&self, hash: &Hash) -> Option<&Vec<u8>> {
        self.code.get(hash)
    }

    /// Stores contract code under its hash and returns the hash
    pub fn insert_code(&mut self, code: Vec<u8>) -> Hash {
        let hash = code.hash();
        self.code.insert(hash, code);
        hash
    }

    pub fn remove_code(&mut self, hash: &Hash) {
        self.code.remove(hash);
    }

    pub fn storage_value(&self, address: &Address, key: &StorageKey) -> Option<StorageWord> {
        self.storage.get(address).and_then(|slots| slots.get(key)).copied()
    }

    pub fn set_storage_value(&mut self, address: Address, key: StorageKey, value: StorageWord) {
        self.storage.entry(address).or_default().insert(key, value);
    }

    pub fn clear_storage_value(&mut self, address: &Address, key: &StorageKey) {
        if let Some(slots) = self.storage.get_mut(address) {
            slots.remove(key);
            if slots.is_empty() {
                self.storage.remove(address);
            }
        }
    }

    pub fn validator(&self, address: &Address) -> Option<&ValidatorRecord> {
        self.validators.get(address)
    }

    pub fn set_validator(&mut self, address: Address, record: ValidatorRecord) {
        self.validators.insert(address, record);
    }

    pub fn remove_validator(&mut self, address: &Address) {
        self.validators.remove(address);
    }

    pub fn validators(&self) -> impl Iterator<Item = (&Address, &ValidatorRecord)> {
        self.validators.iter()
    }

    /// Deterministic digest of the whole state.
    ///
    /// Iteration order is fixed by the ordered maps; contract code is
    /// covered through the per-account code hash.
    pub fn root(&self) -> Hash {
        if self.accounts.is_empty() && self.validators.is_empty() {
            return Hash::zero();
        }

        let mut data = Vec::new();
        for (address, account) in &self.accounts {
            data.extend_from_slice(address.as_bytes());
            data.extend_from_slice(&bincode::serialize(account).unwrap());
        }
        for (address, slots) in &self.storage {
            for (key, value) in slots {
                data.extend_from_slice(address.as_bytes());
                data.extend_from_slice(key);
                data.extend_from_slice(value);
            }
        }
        for (address, record) in &self.validators {
            data.extend_from_slice(address.as_bytes());
            data.extend_from_slice(&bincode::serialize(record).unwrap());
        }
        data.hash_with(HashAlgorithm::Blake3)
    }
}

/// Undo record for one mutation inside a snapshot
#[derive(Debug, Clone)]
enum JournalEntry {
    Checkpoint,
    Account {
        address: Address,
        prev: Option<AccountState>,
    },
    Storage {
        address: Address,
        key: StorageKey,
        prev: Option<StorageWord>,
    },
    Code {
        hash: Hash,
        existed: bool,
    },
    Validator {
        address: Address,
        prev: Option<ValidatorRecord>,
    },
}

/// A writable view of the state, isolated from the committed store.
///
/// Mutations are journaled so a failing transaction can be rolled back
/// to the last checkpoint without touching earlier work in the same
/// snapshot. Checkpoints nest.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    base_version: StateVersion,
    state: ChainState,
    journal: Vec<JournalEntry>,
}

impl StateSnapshot {
    fn new(base_version: StateVersion, state: ChainState) -> Self {
        StateSnapshot {
            base_version,
            state,
            journal: Vec::new(),
        }
    }

    /// The committed version this snapshot was taken from
    pub fn base_version(&self) -> StateVersion {
        self.base_version
    }

    pub fn state(&self) -> &ChainState {
        &self.state
    }

    /// Digest of the snapshot's current contents
    pub fn root(&self) -> Hash {
        self.state.root()
    }

    // Reads

    /// Account contents, a zeroed account if it does not exist yet
    pub fn account(&self, address: &Address) -> AccountState {
        self.state.account(address).cloned().unwrap_or_default()
    }

    pub fn balance(&self, address: &Address) -> Amount {
        self.account(address).balance
    }

    pub fn nonce(&self, address: &Address) -> Nonce {
        self.account(address).nonce
    }

    pub fn storage_get(&self, address: &Address, key: &StorageKey) -> Option<StorageWord> {
        self.state.storage_value(address, key)
    }

    pub fn contract_code(&self, address: &Address) -> Option<Vec<u8>> {
        let account = self.state.account(address)?;
        let hash = account.code_hash?;
        self.state.code(&hash).cloned()
    }

    pub fn validator(&self, address: &Address) -> Option<ValidatorRecord> {
        self.state.validator(address).cloned()
    }

    pub fn validators(&self) -> impl Iterator<Item = (&Address, &ValidatorRecord)> {
        self.state.validators()
    }

    // Writes, all journaled

    pub fn set_account(&mut self, address: Address, account: AccountState) {
        self.record_account(address);
        self.state.set_account(address, account);
    }

    pub fn credit(&mut self, address: &Address, amount: &Amount) -> ChainResult<()> {
        let mut account = self.account(address);
        account.balance = account
            .balance
            .checked_add(amount)
            .ok_or(ChainError::BalanceOverflow)?;
        self.set_account(*address, account);
        Ok(())
    }

    pub fn debit(&mut self, address: &Address, amount: &Amount) -> ChainResult<()> {
        let mut account = self.account(address);
        account.balance = account
            .balance
            .checked_sub(amount)
            .ok_or(ChainError::InsufficientBalance)?;
        self.set_account(*address, account);
        Ok(())
    }

    pub fn bump_nonce(&mut self, address: &Address) {
        let mut account = self.account(address);
        account.nonce += 1;
        self.set_account(*address, account);
    }

    pub fn storage_set(&mut self, address: Address, key: StorageKey, value: StorageWord) {
        self.record_storage(address, key);
        self.state.set_storage_value(address, key, value);
    }

    /// Creates the contract account at `address` and stores its code.
    /// The account keeps any balance it already held.
    pub fn deploy_code(&mut self, address: Address, code: Vec<u8>) -> Hash {
        let code_hash = code.hash();
        self.record_code(code_hash);
        self.state.insert_code(code);

        let mut account = self.account(&address);
        account.code_hash = Some(code_hash);
        self.set_account(address, account);
        code_hash
    }

    pub fn set_validator(&mut self, address: Address, record: ValidatorRecord) {
        self.record_validator(address);
        self.state.set_validator(address, record);
    }

    // Checkpointing

    /// Marks a rollback point
    pub fn checkpoint(&mut self) {
        self.journal.push(JournalEntry::Checkpoint);
    }

    /// Discards everything written since the last checkpoint
    pub fn revert_to_checkpoint(&mut self) {
        while let Some(entry) = self.journal.pop() {
            match entry {
                JournalEntry::Checkpoint => break,
                JournalEntry::Account { address, prev } => match prev {
                    Some(account) => self.state.set_account(address, account),
                    None => {
                        self.state.accounts.remove(&address);
                    }
                },
                JournalEntry::Storage { address, key, prev } => match prev {
                    Some(value) => self.state.set_storage_value(address, key, value),
                    None => self.state.clear_storage_value(&address, &key),
                },
                JournalEntry::Code { hash, existed } => {
                    if !existed {
                        self.state.remove_code(&hash);
                    }
                }
                JournalEntry::Validator { address, prev } => match prev {
                    Some(record) => self.state.set_validator(address, record),
                    None => self.state.remove_validator(&address),
                },
            }
        }
    }

    /// Keeps everything written since the last checkpoint and merges the
    /// undo records into the enclosing scope
    pub fn commit_checkpoint(&mut self) {
        if let Some(pos) = self
            .journal
            .iter()
            .rposition(|e| matches!(e, JournalEntry::Checkpoint))
        {
            self.journal.remove(pos);
        }
    }

    fn record_account(&mut self, address: Address) {
        for entry in self.journal.iter().rev() {
            match entry {
                JournalEntry::Checkpoint => break,
                JournalEntry::Account { address: a, .. } if *a == address => return,
                _ => {}
            }
        }
        let prev = self.state.account(&address).cloned();
        self.journal.push(JournalEntry::Account { address, prev });
    }

    fn record_storage(&mut self, address: Address, key: StorageKey) {
        for entry in self.journal.iter().rev() {
            match entry {
                JournalEntry::Checkpoint => break,
                JournalEntry::Storage { address: a, key: k, .. }
                    if *a == address && *k == key =>
                {
                    return
                }
                _ => {}
            }
        }
        let prev = self.state.storage_value(&address, &key);
        self.journal.push(JournalEntry::Storage { address, key, prev });
    }

    fn record_code(&mut self, hash: Hash) {
        for entry in self.journal.iter().rev() {
            match entry {
                JournalEntry::Checkpoint => break,
                JournalEntry::Code { hash: h, .. } if *h == hash => return,
                _ => {}
            }
        }
        let existed = self.state.code(&hash).is_some();
        self.journal.push(JournalEntry::Code { hash, existed });
    }

    fn record_validator(&mut self, address: Address) {
        for entry in self.journal.iter().rev() {
            match entry {
                JournalEntry::Checkpoint => break,
                JournalEntry::Validator { address: a, .. } if *a == address => return,
                _ => {}
            }
        }
        let prev = self.state.validator(&address).cloned();
        self.journal.push(JournalEntry::Validator { address, prev });
    }
}

/// The committed state plus its version counter.
///
/// Commits are all-or-nothing: a snapshot replaces the committed state
/// only if it was taken from the current version, otherwise the writer
/// gets [`ChainError::StaleSnapshot`] and must retry from a fresh
/// snapshot.
#[derive(Debug)]
pub struct StateStore {
    committed: ChainState,
    version: StateVersion,
    root: Hash,
}

impl StateStore {
    /// Wraps an initial (genesis) state at version zero
    pub fn new(genesis: ChainState) -> Self {
        let root = genesis.root();
        StateStore {
            committed: genesis,
            version: 0,
            root,
        }
    }

    /// Takes an isolated snapshot of the committed state
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot::new(self.version, self.committed.clone())
    }

    /// Atomically replaces the committed state with the snapshot's
    /// contents. Fails without side effects if another commit landed
    /// since the snapshot was taken.
    pub fn commit(&mut self, snapshot: StateSnapshot) -> ChainResult<Hash> {
        if snapshot.base_version != self.version {
            return Err(ChainError::StaleSnapshot {
                base: snapshot.base_version,
                head: self.version,
            });
        }
        self.root = snapshot.state.root();
        self.committed = snapshot.state;
        self.version += 1;
        debug!(version = self.version, root = %self.root, "state committed");
        Ok(self.root)
    }

    /// Discards a snapshot. Dropping it does the same; this form exists
    /// for call sites that want the discard visible.
    pub fn rollback(&self, snapshot: StateSnapshot) {
        debug!(base = snapshot.base_version(), "snapshot rolled back");
        drop(snapshot);
    }

    /// Replaces the committed state wholesale, bypassing the version
    /// check. Only for chain reorganizations and startup replay, where
    /// the new state does not descend from the current one.
    pub fn reset(&mut self, state: ChainState) -> Hash {
        self.root = state.root();
        self.committed = state;
        self.version += 1;
        debug!(version = self.version, root = %self.root, "state reset");
        self.root
    }

    pub fn version(&self) -> StateVersion {
        self.version
    }

    /// Root of the committed state
    pub fn root(&self) -> Hash {
        self.root
    }

    pub fn state(&self) -> &ChainState {
        &self.committed
    }

    // Committed reads

    pub fn account(&self, address: &Address) -> Option<AccountState> {
        self.committed.account(address).cloned()
    }

    pub fn balance(&self, address: &Address) -> Amount {
        self.committed
            .account(address)
            .map(|a| a.balance.clone())
            .unwrap_or_default()
    }

    pub fn nonce(&self, address: &Address) -> Nonce {
        self.committed.account(address).map(|a| a.nonce).unwrap_or(0)
    }

    pub fn storage_value(&self, address: &Address, key: &StorageKey) -> Option<StorageWord> {
        self.committed.storage_value(address, key)
    }

    pub fn contract_code(&self, address: &Address) -> Option<Vec<u8>> {
        let account = self.committed.account(address)?;
        let hash = account.code_hash?;
        self.committed.code(&hash).cloned()
    }

    pub fn validator(&self, address: &Address) -> Option<ValidatorRecord> {
        self.committed.validator(address).cloned()
    }
}
