//! End-to-end pipeline: boot a node from a config, produce blocks,
//! then restart from disk and check the replayed state.

use std::sync::Arc;

use tempfile::TempDir;

use signet_consensus::BlockProducer;
use signet_core::transaction::{Transaction, TxKind};
use signet_core::types::Amount;
use signet_crypto::{Address, KeyPair, SignatureScheme};
use signet_node::{GenesisAccount, GenesisValidator, Node, NodeConfig};

fn node_config(dir: &TempDir, validator: &KeyPair) -> NodeConfig {
    let mut config = NodeConfig::default();
    config.chain_id = "signet-test".to_string();
    config.data_dir = dir.path().to_string_lossy().into_owned();
    config.api.enabled = false;
    config.genesis.timestamp = 1_000;
    config.genesis.accounts.push(GenesisAccount {
        address: validator.address().to_hex(),
        balance: "1000000000".to_string(),
    });
    config.genesis.validators.push(GenesisValidator {
        address: validator.address().to_hex(),
        public_key: validator.public_key().to_hex(),
        scheme: None,
    });
    config
}

fn producer_for(node: &Node, keypair: &KeyPair) -> BlockProducer {
    BlockProducer::new(
        node.config().producer.clone(),
        keypair.clone(),
        node.engine().clone(),
        node.state().clone(),
        node.exec().clone(),
        node.mempool().clone(),
    )
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

async fn submit(node: &Node, tx: Transaction) {
    let (nonce, balance) = {
        let state = node.state().read().await;
        (state.nonce(&tx.from), state.balance(&tx.from))
    };
    node.mempool()
        .write()
        .await
        .submit(tx, nonce, &balance)
        .unwrap();
}

#[tokio::test]
async fn test_chain_survives_restart() {
    let dir = TempDir::new().unwrap();
    let validator = KeyPair::generate(SignatureScheme::Ed25519).unwrap();
    let recipient = Address::new([3; 20]);
    let config = node_config(&dir, &validator);

    {
        let node = Arc::new(Node::open(config.clone()).unwrap());
        assert!(node.store().block_by_height(0).unwrap().is_some());
        let producer = producer_for(&node, &validator);

        // empty block first
        let outcome = producer.produce_once(1, 0).await.unwrap().unwrap();
        assert_eq!(outcome.height, 1);

        // then a funded transfer
        let tx = transfer(&validator, 0, recipient, 12_345);
        let tx_hash = tx.hash();
        submit(&node, tx).await;

        let outcome = producer.produce_once(2, 0).await.unwrap().unwrap();
        assert_eq!(outcome.height, 2);
        assert_eq!(outcome.receipts.len(), 1);

        let receipt = node.store().receipt(&tx_hash).unwrap().unwrap();
        assert!(receipt.status.is_success());
        assert_eq!(
            node.state().read().await.balance(&recipient),
            Amount::from_u64(12_345)
        );

        node.stop().await.unwrap();
    }

    // reopen: replay rebuilds the committed state from disk
    let node = Node::open(config).unwrap();
    assert_eq!(node.engine().head().await.height, 2);

    let state = node.state().read().await;
    assert_eq!(state.balance(&recipient), Amount::from_u64(12_345));
    assert_eq!(state.nonce(&validator.address()), 1);
}

#[tokio::test]
async fn test_observer_boots_without_key() {
    let dir = TempDir::new().unwrap();
    let validator = KeyPair::generate(SignatureScheme::Ed25519).unwrap();
    let config = node_config(&dir, &validator);

    // no key_file: the node serves reads but never produces
    let node = Arc::new(Node::open(config).unwrap());
    assert!(node.keypair().is_none());
    assert_eq!(node.engine().head().await.height, 0);

    node.clone().start().await.unwrap();
    node.stop().await.unwrap();
}
