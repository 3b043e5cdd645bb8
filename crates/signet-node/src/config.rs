//! Node configuration, loaded from a TOML file.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use signet_consensus::{ConsensusConfig, ProducerConfig};
use signet_core::types::{GasPrice, Height, TimestampMs};
use signet_core::MempoolConfig;
use signet_storage::StoreConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Chain identity; a node refuses a data directory whose genesis
    /// does not match
    pub chain_id: String,
    pub data_dir: String,
    /// Key file holding this node's signing key; absent for observers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_file: Option<String>,
    pub genesis: GenesisConfig,
    pub mempool: MempoolSection,
    pub consensus: ConsensusSection,
    pub producer: ProducerConfig,
    pub storage: StorageSection,
    pub api: ApiSection,
    #[serde(default)]
    pub compiler: CompilerSection,
}

/// The genesis block every node of the chain must agree on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisConfig {
    /// Millisecond timestamp stamped on the genesis block
    pub timestamp: TimestampMs,
    #[serde(default)]
    pub accounts: Vec<GenesisAccount>,
    #[serde(default)]
    pub validators: Vec<GenesisValidator>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisAccount {
    pub address: String,
    /// Decimal token balance
    pub balance: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisValidator {
    pub address: String,
    pub public_key: String,
    /// `ed25519` (default) or `secp256k1`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MempoolSection {
    pub max_size: usize,
    pub max_per_sender: usize,
    pub min_gas_price: GasPrice,
    /// Seconds a transaction may wait pooled before the sweep drops it
    pub ttl_secs: u64,
    /// How often the expiry sweep runs
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusSection {
    #[serde(flatten)]
    pub engine: ConsensusConfig,
    /// Blocks between a validator change committing and taking effect
    pub validator_delay: Height,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    pub cache_mb: u64,
    /// Background flush cadence; zero disables the background flusher
    pub flush_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSection {
    pub enabled: bool,
    pub listen_addr: SocketAddr,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompilerSection {
    /// External compiler binary; unset disables source deployments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            chain_id: "signet-dev".into(),
            data_dir: "./data".into(),
            key_file: None,
            genesis: GenesisConfig {
                timestamp: 0,
                accounts: vec![],
                validators: vec![],
            },
            mempool: MempoolSection {
                max_size: 10_000,
                max_per_sender: 100,
                min_gas_price: 1,
                ttl_secs: 3_600,
                sweep_interval_secs: 30,
            },
            consensus: ConsensusSection {
                engine: ConsensusConfig::default(),
                validator_delay: 1,
            },
            producer: ProducerConfig::default(),
            storage: StorageSection {
                cache_mb: 64,
                flush_interval_ms: 1_000,
            },
            api: ApiSection {
                enabled: true,
                listen_addr: "127.0.0.1:8080".parse().unwrap(),
            },
            compiler: CompilerSection::default(),
        }
    }
}

impl NodeConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("chain")
    }

    pub fn mempool_config(&self) -> MempoolConfig {
        MempoolConfig {
            max_size: self.mempool.max_size,
            max_per_sender: self.mempool.max_per_sender,
            min_gas_price: self.mempool.min_gas_price,
            ttl_secs: self.mempool.ttl_secs,
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            path: self.db_path(),
            cache_capacity: self.storage.cache_mb * 1024 * 1024,
            flush_every_ms: match self.storage.flush_interval_ms {
                0 => None,
                ms => Some(ms),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let config = NodeConfig::default();
        let rendered = toml::to_string_pretty(&config).unwrap();
        let parsed: NodeConfig = toml::from_str(&rendered).unwrap();

        assert_eq!(parsed.chain_id, config.chain_id);
        assert_eq!(parsed.mempool.max_size, config.mempool.max_size);
        assert_eq!(
            parsed.consensus.engine.round_duration_ms,
            config.consensus.engine.round_duration_ms
        );
        assert_eq!(parsed.consensus.validator_delay, 1);
        assert_eq!(parsed.api.listen_addr, config.api.listen_addr);
    }

    #[test]
    fn test_genesis_sections_parse() {
        let raw = r#"
chain_id = "signet-test"
data_dir = "/tmp/signet"

[genesis]
timestamp = 1700000000000

[[genesis.accounts]]
address = "0x0101010101010101010101010101010101010101"
balance = "1000000"

[[genesis.validators]]
address = "0x0101010101010101010101010101010101010101"
public_key = "aabbcc"

[mempool]
max_size = 100
max_per_sender = 10
min_gas_price = 1
ttl_secs = 60
sweep_interval_secs = 5

[consensus]
round_duration_ms = 5000
min_block_interval_ms = 500
max_clock_drift_ms = 15000
validator_delay = 2

[producer]
block_interval_ms = 3000
max_block_transactions = 500
block_gas_limit = 30000000
produce_empty_blocks = true

[storage]
cache_mb = 16
flush_interval_ms = 0

[api]
enabled = false
listen_addr = "127.0.0.1:9090"
"#;
        let config: NodeConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.genesis.accounts.len(), 1);
        assert_eq!(config.genesis.validators.len(), 1);
        assert_eq!(config.consensus.validator_delay, 2);
        assert!(config.compiler.command.is_none());
        assert!(config.store_config().flush_every_ms.is_none());
        assert_eq!(config.mempool_config().max_size, 100);
    }

    #[test]
    fn test_zero_flush_interval_disables_flusher() {
        let mut config = NodeConfig::default();
        config.storage.flush_interval_ms = 0;
        assert!(config.store_config().flush_every_ms.is_none());

        config.storage.flush_interval_ms = 250;
        assert_eq!(config.store_config().flush_every_ms, Some(250));
    }
}
