// signet-node/src/main.rs
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "signet-node")]
#[command(about = "Proof-of-Authority Blockchain Node", version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node
    Start {
        /// Configuration file path
        #[arg(short, long, default_value = "./config.toml")]
        config: String,

        /// Override data directory
        #[arg(long)]
        data_dir: Option<String>,
    },

    /// Initialize a data directory with a key, a genesis and a config
    Init {
        /// Data directory
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Chain identifier
        #[arg(long, default_value = "signet-dev")]
        chain_id: String,
    },

    /// Generate a signing keypair
    Keygen {
        /// Output path
        #[arg(short, long, default_value = "./node_key.json")]
        output: String,
    },

    /// Show the stored chain head
    Status {
        /// Configuration file path
        #[arg(short, long, default_value = "./config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},hyper=warn,tower=warn", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Start { config, data_dir } => {
            start_node(&config, data_dir).await?;
        }
        Commands::Init { data_dir, chain_id } => {
            init_node(&data_dir, &chain_id)?;
        }
        Commands::Keygen { output } => {
            keygen(&output)?;
        }
        Commands::Status { config } => {
            show_status(&config)?;
        }
    }

    Ok(())
}

async fn start_node(config_path: &str, data_dir_override: Option<String>) -> anyhow::Result<()> {
    use signet_node::{Node, NodeConfig};
    use std::sync::Arc;

    tracing::info!("loading configuration from {}", config_path);
    let mut config = NodeConfig::from_file(config_path)?;

    if let Some(data_dir) = data_dir_override {
        config.data_dir = data_dir;
    }

    let node = Arc::new(Node::open(config)?);
    node.clone().start().await?;

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    node.stop().await?;

    Ok(())
}

fn init_node(data_dir: &str, chain_id: &str) -> anyhow::Result<()> {
    use signet_crypto::{KeyPair, SignatureScheme};
    use signet_node::{save_keypair, GenesisAccount, GenesisValidator, NodeConfig};

    let dir = std::path::Path::new(data_dir);
    let config_path = dir.join("config.toml");
    if config_path.exists() {
        anyhow::bail!(
            "{} already exists, refusing to overwrite",
            config_path.display()
        );
    }
    std::fs::create_dir_all(dir)?;

    let keypair = KeyPair::generate(SignatureScheme::Ed25519)?;
    let key_path = dir.join("node_key.json");
    save_keypair(&key_path, &keypair)?;

    // Single-validator genesis around the freshly generated key
    let mut config = NodeConfig::default();
    config.chain_id = chain_id.to_string();
    config.data_dir = data_dir.to_string();
    config.key_file = Some(key_path.to_string_lossy().into_owned());
    config.genesis.timestamp = signet_core::now_millis();
    config.genesis.accounts.push(GenesisAccount {
        address: keypair.address().to_hex(),
        balance: "1000000000".to_string(),
    });
    config.genesis.validators.push(GenesisValidator {
        address: keypair.address().to_hex(),
        public_key: keypair.public_key().to_hex(),
        scheme: None,
    });
    config.to_file(&config_path.to_string_lossy())?;

    tracing::info!("validator address: {}", keypair.address());
    tracing::info!("node initialized at {}", data_dir);
    tracing::info!("edit {} to configure your node", config_path.display());

    Ok(())
}

fn keygen(output: &str) -> anyhow::Result<()> {
    use signet_crypto::{KeyPair, SignatureScheme};

    let keypair = KeyPair::generate(SignatureScheme::Ed25519)?;
    signet_node::save_keypair(std::path::Path::new(output), &keypair)?;

    tracing::info!("address: {}", keypair.address());
    tracing::info!("keypair saved to {}", output);

    Ok(())
}

fn show_status(config_path: &str) -> anyhow::Result<()> {
    use anyhow::Context;
    use signet_node::NodeConfig;
    use signet_storage::ChainStore;

    let config = NodeConfig::from_file(config_path)?;
    let store = ChainStore::open(config.store_config())
        .context("cannot open chain store (is the node running?)")?;

    match store.head()? {
        Some(head) => {
            tracing::info!("chain:     {}", config.chain_id);
            tracing::info!("height:    {}", head.height());
            tracing::info!("head:      {}", head.hash());
            tracing::info!("timestamp: {}", head.header.timestamp);
            tracing::info!("txs:       {}", head.transactions.len());
        }
        None => {
            tracing::info!("empty data directory");
        }
    }

    Ok(())
}
