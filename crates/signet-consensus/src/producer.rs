//! Block production on the local validator's turn.
//!
//! The producer runs a timer loop. Each tick it derives the current
//! round from the time elapsed since the head block and checks whether
//! the rotation points at this node; if so it drains the mempool,
//! executes the transactions against a snapshot, assembles and signs a
//! block, and hands it to the consensus engine. Transactions from a
//! rejected block go back into the pool.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use signet_core::block::Block;
use signet_core::mempool::Mempool;
use signet_core::now_millis;
use signet_core::state::StateStore;
use signet_core::transaction::Transaction;
use signet_core::types::{Gas, Height, Round};
use signet_crypto::{Address, KeyPair};
use signet_execution::{BlockEnv, ExecutionEngine};
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::engine::{CommitOutcome, ConsensusEngine};
use crate::{ConsensusError, ConsensusResult};

/// The timer loop polls faster than the block cadence; the due-time
/// check against the head timestamp enforces the configured interval.
const POLL_INTERVAL_MS: u64 = 500;

/// Where the producer is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerPhase {
    Idle,
    Producing,
    Proposed,
    Committed,
    Rejected,
}

/// Block production parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerConfig {
    /// Target spacing between blocks this node signs
    pub block_interval_ms: u64,
    /// Most transactions pulled into one block
    pub max_block_transactions: usize,
    /// Gas budget per block, reserved by transaction gas limit
    pub block_gas_limit: Gas,
    /// Whether to sign blocks with no transactions
    pub produce_empty_blocks: bool,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            block_interval_ms: 3_000,
            max_block_transactions: 500,
            block_gas_limit: 30_000_000,
            produce_empty_blocks: true,
        }
    }
}

/// Drives this validator's turns in the rotation.
pub struct BlockProducer {
    config: ProducerConfig,
    keypair: KeyPair,
    engine: Arc<ConsensusEngine>,
    state: Arc<RwLock<StateStore>>,
    exec: ExecutionEngine,
    mempool: Arc<RwLock<Mempool>>,
    phase: RwLock<ProducerPhase>,
}

impl BlockProducer {
    pub fn new(
        config: ProducerConfig,
        keypair: KeyPair,
        engine: Arc<ConsensusEngine>,
        state: Arc<RwLock<StateStore>>,
        exec: ExecutionEngine,
        mempool: Arc<RwLock<Mempool>>,
    ) -> Self {
        BlockProducer {
            config,
            keypair,
            engine,
            state,
            exec,
            mempool,
            phase: RwLock::new(ProducerPhase::Idle),
        }
    }

    pub fn address(&self) -> Address {
        self.keypair.address()
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    pub async fn phase(&self) -> ProducerPhase {
        *self.phase.read().await
    }

    async fn set_phase(&self, phase: ProducerPhase) {
        *self.phase.write().await = phase;
    }

    /// The production loop. Runs until consensus halts or the task is
    /// aborted.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(Duration::from_millis(POLL_INTERVAL_MS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            address = %self.keypair.address(),
            interval_ms = self.config.block_interval_ms,
            "block producer started"
        );
        loop {
            ticker.tick().await;
            if self.engine.is_halted() {
                warn!("consensus halted, block producer stopping");
                break;
            }
            if let Err(err) = self.tick().await {
                warn!(%err, "block production attempt failed");
            }
        }
    }

    /// One poll: checks whether the rotation currently points at this
    /// node and produces if it does.
    async fn tick(&self) -> ConsensusResult<()> {
        let head = self.engine.head().await;
        let now = now_millis();
        let due = head.timestamp + self.config.block_interval_ms;
        if now < due {
            return Ok(());
        }
        let round = (now - due) / self.engine.config().round_duration_ms.max(1);
        let height = head.height + 1;

        let set = self.engine.validator_set().await;
        let ours = set
            .producer_for(height, round)
            .map(|entry| entry.address == self.keypair.address())
            .unwrap_or(false);
        if !ours {
            self.set_phase(ProducerPhase::Idle).await;
            return Ok(());
        }

        self.produce_once(height, round).await.map(|_| ())
    }

    /// Builds, signs, and submits one block for `(height, round)`.
    ///
    /// Returns `Ok(None)` when nothing was produced (empty pool with
    /// empty blocks disabled, or the head moved). Transactions that do
    /// not fit the gas budget stay pooled; transactions whose apply is
    /// fatal (stale nonce, unpayable fee) are dropped, not block-fatal.
    pub async fn produce_once(
        &self,
        height: Height,
        round: Round,
    ) -> ConsensusResult<Option<CommitOutcome>> {
        self.set_phase(ProducerPhase::Producing).await;

        let head = self.engine.head().await;
        if head.height + 1 != height {
            self.set_phase(ProducerPhase::Idle).await;
            return Err(if height <= head.height {
                ConsensusError::StaleHeight {
                    height,
                    head: head.height,
                }
            } else {
                ConsensusError::FutureHeight {
                    height,
                    head: head.height,
                }
            });
        }

        let drained = {
            let mut pool = self.mempool.write().await;
            pool.drain(self.config.max_block_transactions)
        };
        if drained.is_empty() && !self.config.produce_empty_blocks {
            self.set_phase(ProducerPhase::Idle).await;
            return Ok(None);
        }

        let timestamp = now_millis().max(
            head.timestamp + self.engine.config().min_block_interval_ms.max(1),
        );
        let env = BlockEnv {
            height,
            timestamp,
            producer: self.keypair.address(),
        };

        let mut snapshot = self.state.read().await.snapshot();
        let mut included: Vec<Transaction> = Vec::new();
        let mut leftovers: Vec<Transaction> = Vec::new();
        // senders with a deferred transaction: later nonces must defer
        // too or they would become unexecutable gaps
        let mut deferred_senders: HashSet<Address> = HashSet::new();
        let mut gas_total: Gas = 0;

        for tx in drained {
            if deferred_senders.contains(&tx.from)
                || gas_total.saturating_add(tx.gas_limit) > self.config.block_gas_limit
            {
                deferred_senders.insert(tx.from);
                leftovers.push(tx);
                continue;
            }
            match self.exec.apply(&mut snapshot, &tx, &env) {
                Ok(receipt) => {
                    gas_total += receipt.gas_used;
                    included.push(tx);
                }
                Err(err) => {
                    debug!(tx = %tx.hash(), %err, "transaction dropped during production");
                }
            }
        }

        if included.is_empty() && !self.config.produce_empty_blocks {
            if !leftovers.is_empty() {
                self.mempool.write().await.requeue(leftovers);
            }
            self.set_phase(ProducerPhase::Idle).await;
            return Ok(None);
        }

        let mut block = Block::new(
            height,
            head.hash,
            snapshot.root(),
            self.keypair.address(),
            round,
            timestamp,
            included,
            gas_total,
        );
        block.sign(&self.keypair)?;
        self.set_phase(ProducerPhase::Proposed).await;
        debug!(
            height,
            round,
            txs = block.transactions.len(),
            gas = gas_total,
            "block proposed"
        );

        if !leftovers.is_empty() {
            self.mempool.write().await.requeue(leftovers);
        }

        // the engine re-executes from its own snapshot; ours was only
        // for the state root and gas totals
        drop(snapshot);

        let backup = block.transactions.clone();
        match self.engine.commit_block(block).await {
            Ok(outcome) => {
                self.set_phase(ProducerPhase::Committed).await;
                if let Some(replaced) = &outcome.replaced {
                    self.mempool
                        .write()
                        .await
                        .requeue(replaced.transactions.clone());
                }
                Ok(Some(outcome))
            }
            Err(err) => {
                warn!(height, round, %err, "produced block rejected, transactions returned to pool");
                self.mempool.write().await.requeue(backup);
                self.set_phase(ProducerPhase::Rejected).await;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{BlockSink, ConsensusConfig, SinkError};
    use signet_core::mempool::MempoolConfig;
    use signet_core::state::{AccountState, ChainState, ValidatorRecord};
    use signet_core::transaction::{Receipt, TxKind};
    use signet_core::types::Amount;
    use signet_core::events::EventBus;
    use signet_crypto::SignatureScheme;

    struct NullSink;

    impl BlockSink for NullSink {
        fn persist_block(&self, _: &Block, _: &[Receipt]) -> Result<(), SinkError> {
            Ok(())
        }
        fn retract_block(&self, _: &Block) -> Result<(), SinkError> {
            Ok(())
        }
    }

    struct Ctx {
        producer: BlockProducer,
        engine: Arc<ConsensusEngine>,
        state: Arc<RwLock<StateStore>>,
        mempool: Arc<RwLock<Mempool>>,
        validators: Vec<KeyPair>,
    }

    /// Node keyed as the validator scheduled for height 1 round 0 when
    /// `in_rotation`, otherwise as the other validator
    fn ctx(
        validator_count: usize,
        funded: &[(Address, u64)],
        config: ProducerConfig,
        in_rotation: bool,
    ) -> Ctx {
        let mut validators: Vec<KeyPair> = (0..validator_count)
            .map(|_| KeyPair::generate(SignatureScheme::Ed25519).unwrap())
            .collect();
        validators.sort_by_key(|kp| kp.address());

        let mut chain = ChainState::new();
        for kp in &validators {
            chain.set_validator(
                kp.address(),
                ValidatorRecord {
                    public_key: kp.public_key().clone(),
                    joined_at: 0,
                    retired_at: None,
                },
            );
        }
        for (address, balance) in funded {
            chain.set_account(*address, AccountState::with_balance(Amount::from_u64(*balance)));
        }

        let genesis = Block::genesis(1_000, chain.root());
        let state = Arc::new(RwLock::new(StateStore::new(chain)));
        let exec = ExecutionEngine::with_defaults(1);
        let bus = EventBus::new(64);
        let engine = Arc::new(ConsensusEngine::new(
            ConsensusConfig::default(),
            state.clone(),
            exec.clone(),
            bus,
            Arc::new(NullSink),
            genesis,
        ));
        let mempool = Arc::new(RwLock::new(Mempool::new(MempoolConfig::default())));

        // rotation for height 1 round 0 points at index 1 % count
        let scheduled = 1 % validator_count;
        let key_index = if in_rotation {
            scheduled
        } else {
            (scheduled + 1) % validator_count
        };
        let producer = BlockProducer::new(
            config,
            validators[key_index].clone(),
            engine.clone(),
            state.clone(),
            exec,
            mempool.clone(),
        );
        Ctx {
            producer,
            engine,
            state,
            mempool,
            validators,
        }
    }

    fn transfer(from: &KeyPair, nonce: u64, to: Address, amount: u64) -> Transaction {
        let mut tx = Transaction::new(
            from.address(),
            from.public_key().clone(),
            nonce,
            TxKind::Transfer {
                to,
                amount: Amount::from_u64(amount),
            },
            30_000,
            1,
        );
        tx.sign(from).unwrap();
        tx
    }

    async fn submit(ctx: &Ctx, tx: Transaction) {
        let (nonce, balance) = {
            let state = ctx.state.read().await;
            (state.nonce(&tx.from), state.balance(&tx.from))
        };
        ctx.mempool
            .write()
            .await
            .submit(tx, nonce, &balance)
            .unwrap();
    }

    #[tokio::test]
    async fn test_produces_block_from_pool() {
        let sender = KeyPair::generate(SignatureScheme::Ed25519).unwrap();
        let recipient = Address::new([7; 20]);
        let c = ctx(
            1,
            &[(sender.address(), 1_000_000)],
            ProducerConfig::default(),
            true,
        );

        submit(&c, transfer(&sender, 0, recipient, 250)).await;
        submit(&c, transfer(&sender, 1, recipient, 250)).await;

        let outcome = c.producer.produce_once(1, 0).await.unwrap().unwrap();
        assert_eq!(outcome.height, 1);
        assert_eq!(outcome.receipts.len(), 2);
        assert_eq!(c.producer.phase().await, ProducerPhase::Committed);
        assert!(c.mempool.read().await.is_empty());

        let state = c.state.read().await;
        assert_eq!(state.balance(&recipient), Amount::from_u64(500));
        assert_eq!(state.nonce(&sender.address()), 2);
    }

    #[tokio::test]
    async fn test_empty_pool_skips_when_disabled() {
        let config = ProducerConfig {
            produce_empty_blocks: false,
            ..ProducerConfig::default()
        };
        let c = ctx(1, &[], config, true);

        let outcome = c.producer.produce_once(1, 0).await.unwrap();
        assert!(outcome.is_none());
        assert_eq!(c.producer.phase().await, ProducerPhase::Idle);
        assert_eq!(c.engine.head().await.height, 0);
    }

    #[tokio::test]
    async fn test_produces_empty_block_by_default() {
        let c = ctx(1, &[], ProducerConfig::default(), true);

        let outcome = c.producer.produce_once(1, 0).await.unwrap().unwrap();
        assert_eq!(outcome.height, 1);
        assert!(outcome.receipts.is_empty());
        assert_eq!(c.engine.head().await.height, 1);
    }

    #[tokio::test]
    async fn test_stale_transaction_dropped_not_block_fatal() {
        let sender = KeyPair::generate(SignatureScheme::Ed25519).unwrap();
        let c = ctx(
            1,
            &[(sender.address(), 1_000_000)],
            ProducerConfig::default(),
            true,
        );

        let tx = transfer(&sender, 0, Address::new([7; 20]), 10);
        submit(&c, tx.clone()).await;
        c.producer.produce_once(1, 0).await.unwrap().unwrap();

        // the same transaction reappears, e.g. requeued after a race;
        // its nonce is now stale and production must drop it
        c.mempool.write().await.requeue(vec![tx]);
        let outcome = c.producer.produce_once(2, 0).await.unwrap().unwrap();
        assert!(outcome.receipts.is_empty());
        assert!(c.mempool.read().await.is_empty());
        assert_eq!(c.engine.head().await.height, 2);
    }

    #[tokio::test]
    async fn test_rejected_block_returns_transactions() {
        let sender = KeyPair::generate(SignatureScheme::Ed25519).unwrap();
        // two validators, but this node holds the out-of-turn key
        let c = ctx(
            2,
            &[(sender.address(), 1_000_000)],
            ProducerConfig::default(),
            false,
        );

        submit(&c, transfer(&sender, 0, Address::new([7; 20]), 10)).await;
        let err = c.producer.produce_once(1, 0).await.unwrap_err();
        assert!(matches!(err, ConsensusError::WrongProducer { .. }));
        assert_eq!(c.producer.phase().await, ProducerPhase::Rejected);
        assert_eq!(c.mempool.read().await.len(), 1);
        assert_eq!(c.engine.head().await.height, 0);
    }

    #[tokio::test]
    async fn test_gas_budget_defers_overflow() {
        let sender = KeyPair::generate(SignatureScheme::Ed25519).unwrap();
        let config = ProducerConfig {
            // one 30k-limit transfer fits, a second does not
            block_gas_limit: 40_000,
            ..ProducerConfig::default()
        };
        let c = ctx(1, &[(sender.address(), 1_000_000)], config, true);

        submit(&c, transfer(&sender, 0, Address::new([7; 20]), 1)).await;
        submit(&c, transfer(&sender, 1, Address::new([7; 20]), 1)).await;

        let outcome = c.producer.produce_once(1, 0).await.unwrap().unwrap();
        assert_eq!(outcome.receipts.len(), 1);
        assert_eq!(c.mempool.read().await.len(), 1);

        // the deferred transaction is still valid for the next block
        let outcome = c.producer.produce_once(2, 0).await.unwrap().unwrap();
        assert_eq!(outcome.receipts.len(), 1);
        assert!(c.mempool.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_height_request_is_refused() {
        let c = ctx(1, &[], ProducerConfig::default(), true);
        let err = c.producer.produce_once(5, 0).await.unwrap_err();
        assert!(matches!(err, ConsensusError::FutureHeight { height: 5, head: 0 }));
    }

    #[tokio::test]
    async fn test_takeover_round_produces() {
        // the node holds the round 1 key for height 1
        let c = ctx(2, &[], ProducerConfig::default(), false);
        let expected = c.validators[(1 + 1) % 2].address();
        assert_eq!(c.producer.address(), expected);

        let outcome = c.producer.produce_once(1, 1).await.unwrap().unwrap();
        assert_eq!(outcome.height, 1);
        assert_eq!(c.engine.head().await.round, 1);
    }
}
