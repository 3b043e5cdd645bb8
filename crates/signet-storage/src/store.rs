//! The chain store: blocks, receipts, and contract metadata on sled.

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Serialize;
use signet_consensus::{BlockSink, SinkError};
use signet_core::block::Block;
use signet_core::transaction::{Receipt, TxKind};
use signet_core::types::Height;
use signet_crypto::{Address, Hash, Hashable};
use signet_execution::ContractMeta;
use tracing::{debug, info};

use crate::{StorageError, StorageResult};

const HEAD_KEY: &[u8] = b"head";
const GENESIS_KEY: &[u8] = b"genesis";

/// Record families, one sled tree each
#[derive(Debug, Clone, Copy)]
pub enum Tree {
    /// Block hash -> block
    Blocks,
    /// Big-endian height -> block hash
    Heights,
    /// Transaction hash -> receipt
    Receipts,
    /// Contract address -> registry metadata
    Contracts,
    /// Address ++ height ++ index -> transaction hash
    ContractTxs,
    /// Head and genesis pointers
    Meta,
}

impl Tree {
    fn as_str(&self) -> &'static str {
        match self {
            Tree::Blocks => "blocks",
            Tree::Heights => "heights",
            Tree::Receipts => "receipts",
            Tree::Contracts => "contracts",
            Tree::ContractTxs => "contract_txs",
            Tree::Meta => "meta",
        }
    }
}

/// Store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    /// Sled page cache budget in bytes
    pub cache_capacity: u64,
    /// Background flush cadence; `None` keeps sled's default
    pub flush_every_ms: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/chain"),
            cache_capacity: 64 * 1024 * 1024, // 64 MB
            flush_every_ms: Some(1_000),
        }
    }
}

/// Persistent store for the committed chain.
///
/// Writes for one block go out as per-tree batches with the head
/// pointer last. Sled applies each batch atomically, so a crash can
/// leave orphaned block data but never a head pointing at a block that
/// was not fully written.
pub struct ChainStore {
    db: sled::Db,
    blocks: sled::Tree,
    heights: sled::Tree,
    receipts: sled::Tree,
    contracts: sled::Tree,
    contract_txs: sled::Tree,
    meta: sled::Tree,
}

fn encode<T: Serialize>(value: &T) -> StorageResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StorageError::Codec(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StorageResult<T> {
    bincode::deserialize(bytes).map_err(|e| StorageError::Codec(e.to_string()))
}

/// Composite key for the per-contract transaction index; the prefix is
/// the address, so a prefix scan yields a contract's history in
/// chronological order.
fn contract_tx_key(address: &Address, height: Height, index: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(address.as_bytes());
    key.extend_from_slice(&height.to_be_bytes());
    key.extend_from_slice(&index.to_be_bytes());
    key
}

/// The contract a transaction touches, for the history index
fn contract_target(tx: &signet_core::transaction::Transaction) -> Option<Address> {
    match &tx.kind {
        TxKind::ContractCall { contract, .. } => Some(*contract),
        TxKind::ContractCreate { code, .. } => {
            Some(Address::for_contract(&tx.from, tx.nonce, &code.hash()))
        }
        _ => None,
    }
}

impl ChainStore {
    /// Opens or creates the store at the configured path
    pub fn open(config: StoreConfig) -> StorageResult<Self> {
        let mut builder = sled::Config::new()
            .path(&config.path)
            .cache_capacity(config.cache_capacity);
        if let Some(ms) = config.flush_every_ms {
            builder = builder.flush_every_ms(Some(ms));
        }
        let db = builder.open()?;

        let store = ChainStore {
            blocks: db.open_tree(Tree::Blocks.as_str())?,
            heights: db.open_tree(Tree::Heights.as_str())?,
            receipts: db.open_tree(Tree::Receipts.as_str())?,
            contracts: db.open_tree(Tree::Contracts.as_str())?,
            contract_txs: db.open_tree(Tree::ContractTxs.as_str())?,
            meta: db.open_tree(Tree::Meta.as_str())?,
            db,
        };
        info!(path = %config.path.display(), "chain store opened");
        Ok(store)
    }

    // Block operations

    /// Stores a committed block with its receipts and advances the head
    /// pointer
    pub fn put_block(&self, block: &Block, receipts: &[Receipt]) -> StorageResult<()> {
        let block_hash = block.hash();
        let height = block.height();

        self.blocks.insert(block_hash.as_bytes(), encode(block)?)?;
        self.heights
            .insert(&height.to_be_bytes()[..], block_hash.as_bytes())?;

        let mut receipt_batch = sled::Batch::default();
        for receipt in receipts {
            receipt_batch.insert(receipt.tx_hash.as_bytes(), encode(receipt)?);
        }
        self.receipts.apply_batch(receipt_batch)?;

        let mut index_batch = sled::Batch::default();
        for (index, tx) in block.transactions.iter().enumerate() {
            if let Some(address) = contract_target(tx) {
                index_batch.insert(
                    contract_tx_key(&address, height, index as u32),
                    tx.hash().as_bytes(),
                );
            }
        }
        self.contract_txs.apply_batch(index_batch)?;

        // head last: everything it points at is already durable-ordered
        self.meta.insert(HEAD_KEY, block_hash.as_bytes())?;

        debug!(height, hash = %block_hash, receipts = receipts.len(), "block stored");
        Ok(())
    }

    pub fn block(&self, hash: &Hash) -> StorageResult<Option<Block>> {
        match self.blocks.get(hash.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn block_by_height(&self, height: Height) -> StorageResult<Option<Block>> {
        let hash_bytes = match self.heights.get(height.to_be_bytes())? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let hash = Hash::from_slice(&hash_bytes)
            .map_err(|_| StorageError::Corrupt(format!("height index entry at {height}")))?;
        self.block(&hash)
    }

    /// The block the head pointer refers to, `None` on a fresh store
    pub fn head(&self) -> StorageResult<Option<Block>> {
        let hash = match self.head_hash()? {
            Some(hash) => hash,
            None => return Ok(None),
        };
        match self.block(&hash)? {
            Some(block) => Ok(Some(block)),
            None => Err(StorageError::Corrupt(format!(
                "head pointer {hash} has no block record"
            ))),
        }
    }

    pub fn head_hash(&self) -> StorageResult<Option<Hash>> {
        match self.meta.get(HEAD_KEY)? {
            Some(bytes) => Ok(Some(Hash::from_slice(&bytes).map_err(|_| {
                StorageError::Corrupt("head pointer is not a hash".into())
            })?)),
            None => Ok(None),
        }
    }

    /// Newest blocks first, paginated over the height index
    pub fn recent_blocks(&self, limit: usize, offset: usize) -> StorageResult<Vec<Block>> {
        let mut out = Vec::with_capacity(limit);
        for entry in self.heights.iter().rev().skip(offset).take(limit) {
            let (key, hash_bytes) = entry?;
            let hash = Hash::from_slice(&hash_bytes).map_err(|_| {
                StorageError::Corrupt(format!("height index entry {:?}", key))
            })?;
            match self.block(&hash)? {
                Some(block) => out.push(block),
                None => {
                    return Err(StorageError::Corrupt(format!(
                        "height index points at missing block {hash}"
                    )))
                }
            }
        }
        Ok(out)
    }

    // Genesis identity

    pub fn set_genesis_hash(&self, hash: &Hash) -> StorageResult<()> {
        self.meta.insert(GENESIS_KEY, hash.as_bytes())?;
        Ok(())
    }

    pub fn genesis_hash(&self) -> StorageResult<Option<Hash>> {
        match self.meta.get(GENESIS_KEY)? {
            Some(bytes) => Ok(Some(Hash::from_slice(&bytes).map_err(|_| {
                StorageError::Corrupt("genesis pointer is not a hash".into())
            })?)),
            None => Ok(None),
        }
    }

    // Receipt operations

    pub fn receipt(&self, tx_hash: &Hash) -> StorageResult<Option<Receipt>> {
        match self.receipts.get(tx_hash.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Withdraws the receipts and index entries of a block displaced by
    /// fork resolution. The block record stays, reachable by hash.
    pub fn retract(&self, block: &Block) -> StorageResult<()> {
        let height = block.height();
        for (index, tx) in block.transactions.iter().enumerate() {
            self.receipts.remove(tx.hash().as_bytes())?;
            if let Some(address) = contract_target(tx) {
                self.contract_txs
                    .remove(contract_tx_key(&address, height, index as u32))?;
            }
        }
        debug!(height, hash = %block.hash(), "displaced block records withdrawn");
        Ok(())
    }

    // Contract registry

    /// Inserts or replaces a contract's registry record
    pub fn put_contract(&self, meta: &ContractMeta) -> StorageResult<()> {
        self.contracts
            .insert(meta.address.as_bytes(), encode(meta)?)?;
        Ok(())
    }

    pub fn contract(&self, address: &Address) -> StorageResult<Option<ContractMeta>> {
        match self.contracts.get(address.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn contracts(&self) -> StorageResult<Vec<ContractMeta>> {
        let mut out = Vec::new();
        for entry in self.contracts.iter() {
            let (_, bytes) = entry?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    /// Transaction hashes touching a contract, newest first
    pub fn contract_transactions(
        &self,
        address: &Address,
        limit: usize,
        offset: usize,
    ) -> StorageResult<Vec<Hash>> {
        let mut out = Vec::with_capacity(limit);
        for entry in self
            .contract_txs
            .scan_prefix(address.as_bytes())
            .rev()
            .skip(offset)
            .take(limit)
        {
            let (_, hash_bytes) = entry?;
            let hash = Hash::from_slice(&hash_bytes).map_err(|_| {
                StorageError::Corrupt("contract transaction index entry".into())
            })?;
            out.push(hash);
        }
        Ok(out)
    }

    /// Forces buffered writes to disk
    pub fn flush(&self) -> StorageResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl BlockSink for ChainStore {
    fn persist_block(&self, block: &Block, receipts: &[Receipt]) -> Result<(), SinkError> {
        self.put_block(block, receipts).map_err(Into::into)
    }

    fn retract_block(&self, block: &Block) -> Result<(), SinkError> {
        self.retract(block).map_err(Into::into)
    }
}
