//! Wiring and lifecycle of a running node.
//!
//! [`Node::open`] assembles every component around the data directory:
//! it bootstraps or verifies the genesis block, replays the stored
//! chain to rebuild committed state, and hands the result to the
//! consensus engine. [`Node::start`] then spawns the background loops
//! (producer, API server, event watcher, mempool sweep).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use signet_api::{ApiConfig, ApiContext, ApiServer};
use signet_consensus::{BlockProducer, BlockSink, ConsensusEngine, GossipSink, NullGossip};
use signet_core::block::Block;
use signet_core::events::{ChainEvent, EventBus, EventFilter};
use signet_core::mempool::Mempool;
use signet_core::now_millis;
use signet_core::state::{AccountState, ChainState, StateStore, ValidatorRecord};
use signet_core::types::{Amount, Height};
use signet_crypto::{Address, Hash, KeyPair, PublicKey, SecretKey, SignatureScheme};
use signet_execution::{
    BlockEnv, CommandCompiler, ContractCompiler, DisabledCompiler, ExecutionEngine,
};
use signet_storage::ChainStore;

use crate::config::{GenesisConfig, NodeConfig};

// ==================== KEY FILES ====================

#[derive(Debug, Serialize, Deserialize)]
struct KeyFile {
    scheme: String,
    address: String,
    public_key: String,
    secret_key: String,
}

fn scheme_name(scheme: SignatureScheme) -> &'static str {
    match scheme {
        SignatureScheme::Ed25519 => "ed25519",
        SignatureScheme::Secp256k1 => "secp256k1",
    }
}

fn parse_scheme(raw: Option<&str>) -> anyhow::Result<SignatureScheme> {
    match raw {
        None | Some("ed25519") => Ok(SignatureScheme::Ed25519),
        Some("secp256k1") => Ok(SignatureScheme::Secp256k1),
        Some(other) => bail!("unknown signature scheme: {}", other),
    }
}

pub fn save_keypair(path: &Path, keypair: &KeyPair) -> anyhow::Result<()> {
    let file = KeyFile {
        scheme: scheme_name(keypair.scheme()).to_string(),
        address: keypair.address().to_hex(),
        public_key: keypair.public_key().to_hex(),
        secret_key: keypair.secret_key().to_hex(),
    };
    std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
    warn!(path = %path.display(), "key file holds the secret key, keep it private");
    Ok(())
}

pub fn load_keypair(path: &Path) -> anyhow::Result<KeyPair> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read key file {}", path.display()))?;
    let file: KeyFile = serde_json::from_str(&raw)
        .with_context(|| format!("malformed key file {}", path.display()))?;

    let scheme = parse_scheme(Some(&file.scheme))?;
    let hex = file.secret_key.strip_prefix("0x").unwrap_or(&file.secret_key);
    let keypair = KeyPair::from_secret_key(SecretKey::from_hex(scheme, hex)?)?;

    let claimed = Address::from_hex(&file.address)?;
    if keypair.address() != claimed {
        bail!(
            "key file {} claims address {} but the secret key derives {}",
            path.display(),
            claimed,
            keypair.address()
        );
    }
    Ok(keypair)
}

// ==================== GENESIS ====================

/// Builds the height-zero chain state described in the config
fn genesis_state(genesis: &GenesisConfig) -> anyhow::Result<ChainState> {
    let mut state = ChainState::new();

    for account in &genesis.accounts {
        let address = Address::from_hex(&account.address)
            .with_context(|| format!("genesis account {}", account.address))?;
        let balance = Amount::from_decimal_string(&account.balance)
            .with_context(|| format!("genesis balance {:?}", account.balance))?;
        state.set_account(address, AccountState::with_balance(balance));
    }

    for validator in &genesis.validators {
        let scheme = parse_scheme(validator.scheme.as_deref())?;
        let hex = validator
            .public_key
            .strip_prefix("0x")
            .unwrap_or(&validator.public_key);
        let public_key = PublicKey::from_hex(scheme, hex)
            .with_context(|| format!("genesis validator key for {}", validator.address))?;
        let address = Address::from_hex(&validator.address)?;
        if Address::from_public_key(&public_key) != address {
            bail!(
                "genesis validator {} does not match its public key",
                validator.address
            );
        }
        state.set_validator(
            address,
            ValidatorRecord {
                public_key,
                joined_at: 0,
                retired_at: None,
            },
        );
    }

    Ok(state)
}

/// Re-executes stored blocks 1..=head against `state`, verifying each
/// block's state root along the way
fn replay(
    state: &mut StateStore,
    store: &ChainStore,
    exec: &ExecutionEngine,
    head_height: Height,
) -> anyhow::Result<()> {
    for height in 1..=head_height {
        let block = store
            .block_by_height(height)?
            .with_context(|| format!("missing block {} during replay", height))?;
        let env = BlockEnv {
            height,
            timestamp: block.header.timestamp,
            producer: block.header.producer,
        };

        let mut snapshot = state.snapshot();
        for tx in &block.transactions {
            exec.apply(&mut snapshot, tx, &env)
                .with_context(|| format!("replay failed in block {}", height))?;
        }
        if snapshot.root() != block.header.state_root {
            bail!(
                "state root mismatch at block {}: stored chain is corrupt",
                height
            );
        }
        state.commit(snapshot)?;
    }
    if head_height > 0 {
        info!(height = head_height, "chain replayed");
    }
    Ok(())
}

// ==================== NODE ====================

pub struct Node {
    config: NodeConfig,
    keypair: Option<KeyPair>,
    state: Arc<RwLock<StateStore>>,
    mempool: Arc<RwLock<Mempool>>,
    store: Arc<ChainStore>,
    exec: ExecutionEngine,
    bus: EventBus,
    engine: Arc<ConsensusEngine>,
    compiler: Arc<dyn ContractCompiler>,
    gossip: Arc<dyn GossipSink>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Opens the data directory and assembles all components. A fresh
    /// directory gets the genesis block written; an existing one must
    /// match the configured genesis and is replayed into memory.
    pub fn open(config: NodeConfig) -> anyhow::Result<Self> {
        info!(chain = %config.chain_id, data_dir = %config.data_dir, "opening node");

        let keypair = match &config.key_file {
            Some(path) => Some(load_keypair(Path::new(path))?),
            None => None,
        };

        let store = Arc::new(ChainStore::open(config.store_config())?);
        let chain = genesis_state(&config.genesis)?;
        let genesis_block = Block::genesis(config.genesis.timestamp, chain.root());
        let genesis_hash = genesis_block.hash();

        let exec = ExecutionEngine::with_defaults(config.consensus.validator_delay);
        let mut state_store = StateStore::new(chain);

        let head_block = match store.genesis_hash()? {
            None => {
                store.put_block(&genesis_block, &[])?;
                store.set_genesis_hash(&genesis_hash)?;
                info!(hash = %genesis_hash, "genesis block written");
                genesis_block
            }
            Some(stored) => {
                if stored != genesis_hash {
                    bail!(
                        "data directory belongs to a different chain \
                         (stored genesis {}, config derives {})",
                        stored,
                        genesis_hash
                    );
                }
                let head = store
                    .head()?
                    .context("store has a genesis hash but no head block")?;
                replay(&mut state_store, &store, &exec, head.height())?;
                head
            }
        };

        let bus = EventBus::default();
        let state = Arc::new(RwLock::new(state_store));
        let engine = Arc::new(ConsensusEngine::new(
            config.consensus.engine.clone(),
            state.clone(),
            exec.clone(),
            bus.clone(),
            store.clone() as Arc<dyn BlockSink>,
            head_block,
        ));
        let mempool = Arc::new(RwLock::new(Mempool::new(config.mempool_config())));

        let compiler: Arc<dyn ContractCompiler> = match &config.compiler.command {
            Some(command) => Arc::new(
                CommandCompiler::new(command.clone()).with_args(config.compiler.args.clone()),
            ),
            None => Arc::new(DisabledCompiler),
        };

        Ok(Node {
            config,
            keypair,
            state,
            mempool,
            store,
            exec,
            bus,
            engine,
            compiler,
            gossip: Arc::new(NullGossip),
        })
    }

    /// Spawns the background loops. Returns once everything is running;
    /// the caller owns shutdown.
    pub async fn start(self: Arc<Self>) -> anyhow::Result<()> {
        self.spawn_event_watcher();
        self.spawn_mempool_sweep();

        if let Some(keypair) = &self.keypair {
            let set = self.engine.validator_set().await;
            if set.contains(&keypair.address()) {
                info!(address = %keypair.address(), "validator mode");
            } else {
                // the producer checks the rotation every tick, so it
                // picks the key up if a later block admits it
                info!(address = %keypair.address(), "key loaded, not yet in the validator set");
            }
            let producer = Arc::new(BlockProducer::new(
                self.config.producer.clone(),
                keypair.clone(),
                self.engine.clone(),
                self.state.clone(),
                self.exec.clone(),
                self.mempool.clone(),
            ));
            tokio::spawn(producer.run());
        } else {
            info!("no key file configured, observer mode");
        }

        if self.config.api.enabled {
            let server = ApiServer::new(
                ApiConfig {
                    listen_addr: self.config.api.listen_addr,
                },
                self.api_context(),
            );
            tokio::spawn(async move {
                if let Err(e) = server.start().await {
                    error!(%e, "API server exited");
                }
            });
        }

        let head = self.engine.head().await;
        info!(
            chain = %self.config.chain_id,
            height = head.height,
            head = %head.hash,
            "node started"
        );
        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        info!("shutting down");
        self.engine.halt();
        self.store.flush()?;
        info!("node stopped");
        Ok(())
    }

    /// Shared state handed to the API server
    pub fn api_context(&self) -> ApiContext {
        ApiContext {
            chain_id: self.config.chain_id.clone(),
            node_key: self.keypair.clone(),
            state: self.state.clone(),
            mempool: self.mempool.clone(),
            store: self.store.clone(),
            engine: self.engine.clone(),
            exec: self.exec.clone(),
            bus: self.bus.clone(),
            compiler: self.compiler.clone(),
            gossip: self.gossip.clone(),
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn keypair(&self) -> Option<&KeyPair> {
        self.keypair.as_ref()
    }

    pub fn engine(&self) -> &Arc<ConsensusEngine> {
        &self.engine
    }

    pub fn state(&self) -> &Arc<RwLock<StateStore>> {
        &self.state
    }

    pub fn mempool(&self) -> &Arc<RwLock<Mempool>> {
        &self.mempool
    }

    pub fn store(&self) -> &Arc<ChainStore> {
        &self.store
    }

    pub fn exec(&self) -> &ExecutionEngine {
        &self.exec
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    // ==================== BACKGROUND TASKS ====================

    /// Watches committed-chain events: announces blocks, clears
    /// confirmed transactions from the pool, and stamps the contract
    /// registry when deployments land.
    fn spawn_event_watcher(self: &Arc<Self>) {
        let node = self.clone();
        tokio::spawn(async move {
            let mut events = node.bus.subscribe(EventFilter::All);
            while let Some(event) = events.next().await {
                node.handle_event(event).await;
            }
            debug!("event bus closed, watcher stopping");
        });
    }

    async fn handle_event(&self, event: ChainEvent) {
        match event {
            ChainEvent::BlockCommitted { height, hash, .. } => {
                self.gossip.announce_block(height, hash).await;
            }
            ChainEvent::TransactionConfirmed { tx_hash, .. } => {
                self.mempool.write().await.remove_confirmed(&[tx_hash]);
            }
            ChainEvent::ContractDeployed {
                address,
                tx_hash,
                success,
            } => {
                if success {
                    if let Err(e) = self.mark_deployed(&address, &tx_hash) {
                        warn!(%address, %e, "contract registry update failed");
                    }
                }
            }
            _ => {}
        }
    }

    /// Stamps the registry entry with the deployment height
    fn mark_deployed(&self, address: &Address, tx_hash: &Hash) -> anyhow::Result<()> {
        let mut meta = match self.store.contract(address)? {
            Some(meta) => meta,
            // deployed through a raw transaction, never registered
            None => return Ok(()),
        };
        if let Some(receipt) = self.store.receipt(tx_hash)? {
            meta.deployed_at = receipt.block_height;
            self.store.put_contract(&meta)?;
            debug!(%address, height = receipt.block_height, "contract deployment recorded");
        }
        Ok(())
    }

    fn spawn_mempool_sweep(self: &Arc<Self>) {
        let mempool = self.mempool.clone();
        let every = Duration::from_secs(self.config.mempool.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = interval(every);
            loop {
                ticker.tick().await;
                let dropped = mempool.write().await.sweep(now_millis());
                if dropped > 0 {
                    debug!(dropped, "expired transactions swept from the pool");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_keypair_round_trips_through_key_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("node_key.json");
        let keypair = KeyPair::generate(SignatureScheme::Ed25519).unwrap();

        save_keypair(&path, &keypair).unwrap();
        let loaded = load_keypair(&path).unwrap();
        assert_eq!(loaded.address(), keypair.address());
        assert_eq!(loaded.public_key(), keypair.public_key());
    }

    #[test]
    fn test_key_file_address_mismatch_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("node_key.json");
        let keypair = KeyPair::generate(SignatureScheme::Ed25519).unwrap();
        save_keypair(&path, &keypair).unwrap();

        // swap in a different address
        let raw = std::fs::read_to_string(&path).unwrap();
        let mut file: serde_json::Value = serde_json::from_str(&raw).unwrap();
        file["address"] = serde_json::Value::String(Address::new([9u8; 20]).to_hex());
        std::fs::write(&path, file.to_string()).unwrap();

        assert!(load_keypair(&path).is_err());
    }

    #[test]
    fn test_genesis_state_funds_and_registers() {
        let keypair = KeyPair::generate(SignatureScheme::Ed25519).unwrap();
        let genesis = GenesisConfig {
            timestamp: 1_000,
            accounts: vec![crate::config::GenesisAccount {
                address: keypair.address().to_hex(),
                balance: "5000".to_string(),
            }],
            validators: vec![crate::config::GenesisValidator {
                address: keypair.address().to_hex(),
                public_key: keypair.public_key().to_hex(),
                scheme: None,
            }],
        };

        let state = genesis_state(&genesis).unwrap();
        let account = state.account(&keypair.address()).unwrap();
        assert_eq!(account.balance, Amount::from_u64(5_000));
        assert!(state.validator(&keypair.address()).is_some());
    }

    #[test]
    fn test_genesis_rejects_mismatched_validator_key() {
        let keypair = KeyPair::generate(SignatureScheme::Ed25519).unwrap();
        let other = KeyPair::generate(SignatureScheme::Ed25519).unwrap();
        let genesis = GenesisConfig {
            timestamp: 1_000,
            accounts: vec![],
            validators: vec![crate::config::GenesisValidator {
                address: other.address().to_hex(),
                public_key: keypair.public_key().to_hex(),
                scheme: None,
            }],
        };
        assert!(genesis_state(&genesis).is_err());
    }

    #[test]
    fn test_open_refuses_foreign_data_dir() {
        let dir = TempDir::new().unwrap();
        let mut config = NodeConfig::default();
        config.data_dir = dir.path().to_string_lossy().into_owned();
        config.api.enabled = false;
        config.genesis.timestamp = 1_000;

        // first open writes the genesis
        let node = Node::open(config.clone()).unwrap();
        drop(node);

        // a different genesis timestamp derives a different chain
        config.genesis.timestamp = 2_000;
        let err = Node::open(config).unwrap_err();
        assert!(err.to_string().contains("different chain"));
    }
}
