//! End-to-end coverage for the library surface behind the CLI: creating a
//! chain, mining through `makeblock`, reindexing, and the mempool admin
//! commands, all against a throwaway data directory.

use demo_node::config::ResolvedConfig;
use demo_node::{admin, node};
use demo_node_chain::ChainManager;
use demo_node_crypto::KeyPair;
use demo_node_mempool::Mempool;
use demo_node_store::Store;
use demo_node_types::{Transaction, TxInput, TxOutput};
use std::sync::Arc;
use tempfile::tempdir;

fn resolved_config(minter: &str) -> ResolvedConfig {
    ResolvedConfig {
        minter_address: Some(minter.to_string()),
        host: "127.0.0.1".to_string(),
        port: 7000,
        nodes: Vec::new(),
        auth_token: String::new(),
        target_bits: 8,
        min_tx: 1,
        bootstrap_url: None,
    }
}

#[tokio::test]
async fn create_blockchain_writes_a_mined_genesis() {
    let dir = tempdir().unwrap();
    let miner = KeyPair::generate();

    admin::create_blockchain(dir.path(), &miner.address(), "integration test genesis", 8).await.unwrap();

    let store = Arc::new(Store::open(dir.path()).await.unwrap());
    let chain = ChainManager::new(Arc::clone(&store));
    assert_eq!(chain.get_best_height().await.unwrap(), 0);

    let tip = chain.get_tip().await.unwrap();
    let mut it = chain.iterate_from(tip);
    let genesis = it.next().await.unwrap().unwrap();
    assert!(genesis.prev_block_hash.is_none());
    assert_eq!(genesis.transactions.len(), 1);
    assert!(it.next().await.unwrap().is_none());
}

#[tokio::test]
async fn makeblock_mines_pending_mempool_transactions() {
    let dir = tempdir().unwrap();
    let miner = KeyPair::generate();
    let recipient = KeyPair::generate();

    admin::create_blockchain(dir.path(), &miner.address(), "genesis", 8).await.unwrap();

    let store = Arc::new(Store::open(dir.path()).await.unwrap());
    let chain = ChainManager::new(Arc::clone(&store));
    let tip_hash = chain.get_tip().await.unwrap();
    let genesis = chain.iterate_from(tip_hash).next().await.unwrap().unwrap();
    let coinbase = genesis.coinbase().unwrap();

    let spend = Transaction::new(
        vec![TxInput {
            prev_tx_id: Some(coinbase.id),
            vout_index: 0,
            signature: Vec::new(),
            pubkey: miner.public_key_bytes(),
        }],
        vec![TxOutput { value: 10.0, pubkey_hash: demo_node_crypto::pubkey_hash(&recipient.public_key_bytes()) }],
        1,
    );
    let mempool = Mempool::new(Arc::clone(&store));
    assert!(mempool.add(spend).await.unwrap());

    let config = resolved_config(&miner.address());
    let outcome = node::make_one_block(dir.path(), config).await.unwrap();
    let demo_node_miner::MineOutcome::Built(block) = outcome else {
        panic!("expected a block to be mined from a non-empty mempool");
    };
    assert_eq!(block.height, 1);
    assert_eq!(block.transactions.len(), 2);
    assert!(mempool.iterate().await.unwrap().is_empty());
}

#[tokio::test]
async fn reindex_unspent_is_idempotent_with_online_indices() {
    let dir = tempdir().unwrap();
    let miner = KeyPair::generate();
    admin::create_blockchain(dir.path(), &miner.address(), "genesis", 8).await.unwrap();

    let store = Arc::new(Store::open(dir.path()).await.unwrap());
    let chain = ChainManager::new(Arc::clone(&store));
    let utxo_before: Vec<_> = store.iterate(demo_node_store::Bucket::Utxo).await.unwrap();

    chain.reindex().await.unwrap();

    let utxo_after: Vec<_> = store.iterate(demo_node_store::Bucket::Utxo).await.unwrap();
    assert_eq!(utxo_before.len(), utxo_after.len());
    assert_eq!(utxo_before, utxo_after);
}

#[tokio::test]
async fn cancel_transaction_removes_it_from_the_mempool() {
    let dir = tempdir().unwrap();
    let miner = KeyPair::generate();
    admin::create_blockchain(dir.path(), &miner.address(), "genesis", 8).await.unwrap();

    let store = Arc::new(Store::open(dir.path()).await.unwrap());
    let chain = ChainManager::new(Arc::clone(&store));
    let tip_hash = chain.get_tip().await.unwrap();
    let genesis = chain.iterate_from(tip_hash).next().await.unwrap().unwrap();
    let coinbase_id = genesis.coinbase().unwrap().id;

    let spend = Transaction::new(
        vec![TxInput { prev_tx_id: Some(coinbase_id), vout_index: 0, signature: Vec::new(), pubkey: miner.public_key_bytes() }],
        vec![TxOutput { value: 5.0, pubkey_hash: demo_node_crypto::pubkey_hash(&miner.public_key_bytes()) }],
        1,
    );
    let tx_id = spend.id;
    let mempool = Mempool::new(Arc::clone(&store));
    mempool.add(spend).await.unwrap();

    admin::cancel_transaction(dir.path(), &hex::encode(tx_id)).await.unwrap();
    assert!(mempool.exists(&tx_id).await.unwrap().is_none());
}

#[tokio::test]
async fn cancel_transaction_rejects_unknown_id() {
    let dir = tempdir().unwrap();
    let miner = KeyPair::generate();
    admin::create_blockchain(dir.path(), &miner.address(), "genesis", 8).await.unwrap();

    let unknown = "ab".repeat(32);
    let err = admin::cancel_transaction(dir.path(), &unknown).await.unwrap_err();
    assert!(matches!(err, demo_node::error::NodeError::UnknownMempoolTx(_)));
}
