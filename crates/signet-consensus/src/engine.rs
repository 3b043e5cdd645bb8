//! Block validation and the serial commit path.
//!
//! The [`ConsensusEngine`] is the only component that advances the
//! committed chain. Every block, self-produced or received, goes through
//! the same validation sequence: structural checks against the parent,
//! producer authorization against the validator set, transaction
//! signature checks, and full re-execution with state root comparison.
//! Commits are serialized behind one async mutex, so readers always see
//! either the previous committed state or the next, never a partial one.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use signet_core::block::{Block, BlockHeader};
use signet_core::events::{ChainEvent, EventBus};
use signet_core::state::{ChainState, StateSnapshot, StateStore};
use signet_core::transaction::{Receipt, TxKind};
use signet_core::types::{Gas, Height, Round, TimestampMs};
use signet_core::now_millis;
use signet_crypto::Hash;
use signet_execution::{BlockEnv, ExecutionEngine};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::validator::{ProductionStats, ValidatorSet};
use crate::{ConsensusError, ConsensusResult};

/// Error type sinks may raise; consensus only logs and halts on it
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Durable destination for committed blocks.
///
/// Consensus treats persistence as opaque. A sink failure halts the
/// engine rather than letting the in-memory chain drift away from the
/// durable one.
pub trait BlockSink: Send + Sync {
    /// Stores a committed block together with its receipts
    fn persist_block(&self, block: &Block, receipts: &[Receipt]) -> Result<(), SinkError>;

    /// Withdraws the receipts and indexes of a block displaced by a
    /// head replacement. The block record itself may stay.
    fn retract_block(&self, block: &Block) -> Result<(), SinkError>;
}

/// Consensus timing parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// How long a producer slot lasts before the turn passes to the
    /// next validator in rotation order
    pub round_duration_ms: u64,
    /// Minimum spacing between consecutive block timestamps
    pub min_block_interval_ms: u64,
    /// How far ahead of local time a block timestamp may run
    pub max_clock_drift_ms: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            round_duration_ms: 5_000,
            min_block_interval_ms: 500,
            max_clock_drift_ms: 15_000,
        }
    }
}

/// Committed chain head, as served to readers
#[derive(Debug, Clone, Serialize)]
pub struct HeadInfo {
    pub height: Height,
    pub hash: Hash,
    pub timestamp: TimestampMs,
    pub round: Round,
}

/// What a successful commit produced
#[derive(Debug)]
pub struct CommitOutcome {
    pub block_hash: Hash,
    pub height: Height,
    pub receipts: Vec<Receipt>,
    /// The previous head, when this commit replaced it in a fork
    pub replaced: Option<Block>,
}

/// Parent of the current head, kept for one-deep fork resolution
struct ParentCache {
    header: BlockHeader,
    hash: Hash,
    /// Committed state as of the parent, before the head was applied
    state: ChainState,
}

struct ChainTip {
    head: Block,
    head_hash: Hash,
    parent: Option<ParentCache>,
}

/// Deterministic fork choice between two blocks at the same height with
/// the same parent: the lower round wins, ties broken by the lower
/// block hash. Strict, so an identical key keeps the incumbent.
pub fn fork_prefers_challenger(head: (Round, Hash), challenger: (Round, Hash)) -> bool {
    challenger < head
}

/// Validates and commits blocks, one at a time.
pub struct ConsensusEngine {
    config: ConsensusConfig,
    state: Arc<RwLock<StateStore>>,
    exec: ExecutionEngine,
    bus: EventBus,
    sink: Arc<dyn BlockSink>,
    tip: Mutex<ChainTip>,
    stats: RwLock<ProductionStats>,
    halted: AtomicBool,
}

impl ConsensusEngine {
    /// Wires the engine around an existing head block. The parent cache
    /// starts empty; it fills as soon as the first block commits, which
    /// is also what bounds fork recovery to one block after a restart.
    pub fn new(
        config: ConsensusConfig,
        state: Arc<RwLock<StateStore>>,
        exec: ExecutionEngine,
        bus: EventBus,
        sink: Arc<dyn BlockSink>,
        head: Block,
    ) -> Self {
        let head_hash = head.hash();
        ConsensusEngine {
            config,
            state,
            exec,
            bus,
            sink,
            tip: Mutex::new(ChainTip {
                head,
                head_hash,
                parent: None,
            }),
            stats: RwLock::new(ProductionStats::default()),
            halted: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// The committed chain head
    pub async fn head(&self) -> HeadInfo {
        let tip = self.tip.lock().await;
        HeadInfo {
            height: tip.head.height(),
            hash: tip.head_hash,
            timestamp: tip.head.header.timestamp,
            round: tip.head.header.round,
        }
    }

    /// The validator set effective for the next block
    pub async fn validator_set(&self) -> ValidatorSet {
        let next = {
            let tip = self.tip.lock().await;
            tip.head.height() + 1
        };
        let state = self.state.read().await;
        ValidatorSet::active_at(state.state(), next)
    }

    /// Per-validator produced and missed counters
    pub async fn stats(&self) -> ProductionStats {
        self.stats.read().await.clone()
    }

    /// Stops all further commits. Used when persistence fails or an
    /// operator intervenes; reads stay available.
    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Validates a block and commits it as the new head.
    ///
    /// A block at the head's own height triggers fork resolution: the
    /// challenger replaces the head only if it wins the `(round, hash)`
    /// order and the parent state is still cached. The caller gets the
    /// displaced block back through [`CommitOutcome::replaced`] so its
    /// transactions can be returned to the mempool.
    pub async fn commit_block(&self, block: Block) -> ConsensusResult<CommitOutcome> {
        if self.is_halted() {
            return Err(ConsensusError::Halted);
        }
        let mut tip = self.tip.lock().await;
        let head_height = tip.head.height();
        let height = block.height();

        if height == head_height {
            return self.commit_fork(&mut tip, block).await;
        }
        if height < head_height {
            return Err(ConsensusError::StaleHeight {
                height,
                head: head_height,
            });
        }
        if height > head_height + 1 {
            return Err(ConsensusError::FutureHeight {
                height,
                head: head_height,
            });
        }

        let snapshot = self.state.read().await.snapshot();
        // kept as the fork-resolution base once this block is the head
        let parent_state = snapshot.state().clone();
        let set = ValidatorSet::active_at(snapshot.state(), height);
        let (snapshot, mut receipts) =
            self.validate_and_execute(&block, &tip.head.header, tip.head_hash, &set, snapshot)?;

        self.state.write().await.commit(snapshot)?;

        let block_hash = block.hash();
        for receipt in &mut receipts {
            receipt.block_hash = block_hash;
        }

        if let Err(err) = self.sink.persist_block(&block, &receipts) {
            self.halt();
            error!(height, hash = %block_hash, %err, "block persistence failed, halting");
            return Err(ConsensusError::Storage(err.to_string()));
        }

        let prev_head = std::mem::replace(&mut tip.head, block);
        tip.parent = Some(ParentCache {
            header: prev_head.header,
            hash: tip.head_hash,
            state: parent_state,
        });
        tip.head_hash = block_hash;

        self.record_production(&tip.head, &set).await;
        self.publish_commit(&tip.head, block_hash, &receipts);

        info!(
            height,
            hash = %block_hash,
            txs = tip.head.transactions.len(),
            gas = tip.head.header.gas_used,
            producer = %tip.head.header.producer,
            round = tip.head.header.round,
            "block committed"
        );

        Ok(CommitOutcome {
            block_hash,
            height,
            receipts,
            replaced: None,
        })
    }

    /// Resolves a competing block at the head's height.
    async fn commit_fork(
        &self,
        tip: &mut ChainTip,
        block: Block,
    ) -> ConsensusResult<CommitOutcome> {
        let height = block.height();
        let block_hash = block.hash();
        let incumbent = (tip.head.header.round, tip.head_hash);
        let challenger = (block.header.round, block_hash);

        if !fork_prefers_challenger(incumbent, challenger) {
            debug!(
                height,
                incumbent = %incumbent.1,
                challenger = %challenger.1,
                "competing block loses fork choice"
            );
            return Err(ConsensusError::ForkLost {
                winner: tip.head_hash,
            });
        }

        // The challenger would win, but it can only displace the head
        // while the pre-head state is cached. After a restart it is not,
        // and the incumbent keeps the height.
        let (parent_header, parent_hash, parent_state) = match &tip.parent {
            Some(parent) => (parent.header.clone(), parent.hash, parent.state.clone()),
            None => {
                warn!(
                    height,
                    challenger = %block_hash,
                    "fork winner arrived without a cached parent state, keeping current head"
                );
                return Err(ConsensusError::ForkLost {
                    winner: tip.head_hash,
                });
            }
        };

        let base = StateStore::new(parent_state);
        let snapshot = base.snapshot();
        let set = ValidatorSet::active_at(snapshot.state(), height);
        let (snapshot, mut receipts) =
            self.validate_and_execute(&block, &parent_header, parent_hash, &set, snapshot)?;

        for receipt in &mut receipts {
            receipt.block_hash = block_hash;
        }

        let replacement = snapshot.state().clone();
        self.state.write().await.reset(replacement);

        // withdraw the displaced block's records before the winner lands
        // so the two cannot collide in the per-contract indexes
        if let Err(err) = self.sink.retract_block(&tip.head) {
            self.halt();
            error!(height, %err, "record cleanup failed during fork resolution, halting");
            return Err(ConsensusError::Storage(err.to_string()));
        }
        if let Err(err) = self.sink.persist_block(&block, &receipts) {
            self.halt();
            error!(height, hash = %block_hash, %err, "block persistence failed, halting");
            return Err(ConsensusError::Storage(err.to_string()));
        }

        let replaced = std::mem::replace(&mut tip.head, block);
        tip.head_hash = block_hash;
        // same parent as before, the cache stays

        self.record_production(&tip.head, &set).await;
        self.publish_commit(&tip.head, block_hash, &receipts);

        warn!(
            height,
            winner = %block_hash,
            displaced = %replaced.hash(),
            "fork resolved, head replaced"
        );

        Ok(CommitOutcome {
            block_hash,
            height,
            receipts,
            replaced: Some(replaced),
        })
    }

    /// The full validation sequence against a known parent, ending in
    /// re-execution of every transaction. Returns the post-execution
    /// snapshot and the receipts, in block order.
    fn validate_and_execute(
        &self,
        block: &Block,
        parent_header: &BlockHeader,
        parent_hash: Hash,
        set: &ValidatorSet,
        mut snapshot: StateSnapshot,
    ) -> ConsensusResult<(StateSnapshot, Vec<Receipt>)> {
        let height = block.height();

        if block.header.parent_hash != parent_hash {
            return Err(ConsensusError::ParentMismatch {
                got: block.header.parent_hash,
                head: parent_hash,
            });
        }
        block.validate_structure(parent_header)?;

        let now = now_millis();
        if block.header.timestamp > now + self.config.max_clock_drift_ms {
            return Err(ConsensusError::TimestampInFuture {
                timestamp: block.header.timestamp,
                now,
            });
        }
        if block.header.timestamp < parent_header.timestamp + self.config.min_block_interval_ms {
            return Err(ConsensusError::IntervalViolation {
                timestamp: block.header.timestamp,
                parent: parent_header.timestamp,
            });
        }

        let producer = block.header.producer;
        let key = set
            .public_key(&producer)
            .ok_or(ConsensusError::UnknownValidator(producer))?;
        let expected = set
            .producer_for(height, block.header.round)
            .ok_or(ConsensusError::EmptyValidatorSet(height))?;
        if expected.address != producer {
            return Err(ConsensusError::WrongProducer {
                height,
                round: block.header.round,
                expected: expected.address,
                got: producer,
            });
        }
        if !block.verify_signature(key)? {
            return Err(ConsensusError::InvalidBlockSignature);
        }

        let mut seen = HashSet::new();
        for tx in &block.transactions {
            if !tx.verify_signature()? {
                return Err(ConsensusError::InvalidTransaction(format!(
                    "signature of {} does not verify",
                    tx.hash()
                )));
            }
            if !seen.insert((tx.from, tx.nonce)) {
                return Err(ConsensusError::DuplicateNonce {
                    sender: tx.from,
                    nonce: tx.nonce,
                });
            }
        }

        let env = BlockEnv {
            height,
            timestamp: block.header.timestamp,
            producer,
        };
        let mut receipts = Vec::with_capacity(block.transactions.len());
        let mut gas_total: Gas = 0;
        for tx in &block.transactions {
            let receipt = self.exec.apply(&mut snapshot, tx, &env)?;
            gas_total = gas_total.saturating_add(receipt.gas_used);
            receipts.push(receipt);
        }

        if gas_total != block.header.gas_used {
            return Err(ConsensusError::GasMismatch {
                declared: block.header.gas_used,
                computed: gas_total,
            });
        }
        let computed = snapshot.root();
        if computed != block.header.state_root {
            return Err(ConsensusError::StateRootMismatch {
                declared: block.header.state_root,
                computed,
            });
        }

        Ok((snapshot, receipts))
    }

    /// Produced counter for the signer, missed counters for the
    /// validators whose earlier rounds at this height timed out.
    /// Bounded to one rotation: a long stall counts as one missed turn
    /// per validator, not thousands.
    async fn record_production(&self, block: &Block, set: &ValidatorSet) {
        let mut stats = self.stats.write().await;
        stats.record_produced(block.header.producer);
        let first = block.header.round.saturating_sub(set.len() as u64);
        for round in first..block.header.round {
            if let Some(skipped) = set.producer_for(block.height(), round) {
                stats.record_missed(skipped.address);
            }
        }
    }

    fn publish_commit(&self, block: &Block, block_hash: Hash, receipts: &[Receipt]) {
        self.bus.publish(ChainEvent::BlockCommitted {
            height: block.height(),
            hash: block_hash,
            tx_count: block.transactions.len(),
            timestamp: block.header.timestamp,
        });
        for (tx, receipt) in block.transactions.iter().zip(receipts) {
            self.bus.publish(ChainEvent::TransactionConfirmed {
                tx_hash: receipt.tx_hash,
                block_hash,
                height: block.height(),
                status: receipt.status,
            });
            for log in &receipt.logs {
                self.bus.publish(ChainEvent::ContractEvent {
                    address: log.address,
                    topics: log.topics.clone(),
                    data: log.data.clone(),
                    tx_hash: receipt.tx_hash,
                    height: block.height(),
                });
            }
            if matches!(tx.kind, TxKind::ContractCreate { .. }) {
                if let Some(address) = receipt.contract_address {
                    self.bus.publish(ChainEvent::ContractDeployed {
                        address,
                        tx_hash: receipt.tx_hash,
                        success: receipt.status.is_success(),
                    });
                }
            }
        }
    }
}
