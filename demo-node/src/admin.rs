//! Local admin commands: `createblockchain`, `initblockchain`, `printchain`,
//! `makeblock`, `dropblock`, `reindexunspent`, `unapprovedtransactions`,
//! `canceltransaction`. These operate directly on the local data directory
//! rather than over the gossip wire — the same split the original's CLI
//! makes between commands that touch local storage and commands that talk
//! to a running node (`original_source/node/cli.go`'s dispatch table).

use crate::config::ResolvedConfig;
use crate::error::{NodeError, NodeResult};
use crate::node::Node;
use demo_node_chain::ChainManager;
use demo_node_store::Store;
use demo_node_types::{Block, Transaction};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

fn now_nanos() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before 1970").as_nanos() as i64
}

pub async fn create_blockchain(data_dir: &Path, address: &str, genesis_text: &str, target_bits: u32) -> NodeResult<()> {
    let pubkey_hash = demo_node_crypto::address_to_pubkey_hash(address)?;
    let store = Arc::new(Store::open(data_dir).await?);
    let chain = ChainManager::new(Arc::clone(&store));

    let coinbase = Transaction::coinbase(pubkey_hash, genesis_text.as_bytes().to_vec(), now_nanos());
    let mut genesis = Block::new_unmined(now_nanos(), vec![coinbase], None, 0);
    let cancel = AtomicBool::new(false);
    demo_node_pow::mine(&mut genesis, target_bits, &cancel).expect("mining with no cancellation always succeeds");

    chain.create(genesis.clone()).await?;
    println!("genesis block created: {}", hex::encode(genesis.hash));
    Ok(())
}

pub async fn init_blockchain(data_dir: &Path, nodehost: &str, nodeport: u16) -> NodeResult<()> {
    let addr = format!("{nodehost}:{nodeport}");
    let response = demo_node_net::client::request_first_blocks(&addr).await?;
    if response.blocks.is_empty() {
        println!("peer reported an empty chain, nothing to bootstrap");
        return Ok(());
    }

    let store = Arc::new(Store::open(data_dir).await?);
    let chain = ChainManager::new(Arc::clone(&store));

    let mut blocks = response.blocks.into_iter();
    let genesis = blocks.next().expect("checked non-empty above");
    match chain.create(genesis).await {
        Ok(()) => {}
        Err(demo_node_chain::ChainError::AlreadyInitialized) => {
            println!("local chain already initialized, skipping genesis import");
        }
        Err(e) => return Err(e.into()),
    }

    let mut imported = 0u32;
    for block in blocks {
        match chain.add_block(block).await? {
            demo_node_chain::AddState::AddedToTop => imported += 1,
            other => {
                tracing::warn!(?other, "bootstrap block landed somewhere other than the tip");
            }
        }
    }
    println!("imported {imported} blocks, chain height now {}", chain.get_best_height().await?);
    Ok(())
}

pub async fn print_chain(data_dir: &Path, view: &str) -> NodeResult<()> {
    let store = Arc::new(Store::open(data_dir).await?);
    let chain = ChainManager::new(Arc::clone(&store));
    let tip = chain.get_tip().await?;
    let mut it = chain.iterate_from(tip);
    while let Some(block) = it.next().await? {
        match view {
            "long" => {
                println!(
                    "height {} hash {} prev {} nonce {} tx_count {}",
                    block.height,
                    hex::encode(block.hash),
                    block.prev_block_hash.map(hex::encode).unwrap_or_else(|| "none".to_string()),
                    block.nonce,
                    block.transactions.len(),
                );
                for tx in &block.transactions {
                    println!("  tx {} ({} in, {} out)", hex::encode(tx.id), tx.vin.len(), tx.vout.len());
                    for out in &tx.vout {
                        println!(
                            "    -> {} : {}",
                            demo_node_crypto::address_from_pubkey_hash(&out.pubkey_hash),
                            out.value
                        );
                    }
                }
            }
            _ => println!("height {} hash {} tx_count {}", block.height, hex::encode(block.hash), block.transactions.len()),
        }
    }
    Ok(())
}

pub async fn make_block(data_dir: &Path, config: ResolvedConfig) -> NodeResult<()> {
    match crate::node::make_one_block(data_dir, config).await? {
        demo_node_miner::MineOutcome::Built(block) => {
            println!("mined block {} at height {}", hex::encode(block.hash), block.height);
            Ok(())
        }
        other => Err(NodeError::NothingMined(other)),
    }
}

pub async fn drop_block(data_dir: &Path) -> NodeResult<()> {
    let store = Arc::new(Store::open(data_dir).await?);
    let chain = ChainManager::new(Arc::clone(&store));
    let removed = chain.delete_top().await?;
    println!("dropped block {} (height {})", hex::encode(removed.hash), removed.height);
    Ok(())
}

pub async fn reindex_unspent(data_dir: &Path) -> NodeResult<()> {
    let store = Arc::new(Store::open(data_dir).await?);
    let chain = ChainManager::new(Arc::clone(&store));
    chain.reindex().await?;
    println!("reindexed tx-index, tx-spent, and utxo buckets from genesis to tip");
    Ok(())
}

pub async fn unapproved_transactions(data_dir: &Path) -> NodeResult<()> {
    let store = Arc::new(Store::open(data_dir).await?);
    let mempool = demo_node_mempool::Mempool::new(Arc::clone(&store));
    let txs = mempool.iterate().await?;
    if txs.is_empty() {
        println!("no pending transactions");
    }
    for tx in txs {
        println!(
            "{} : {} in, {} out, value {}",
            hex::encode(tx.id),
            tx.vin.len(),
            tx.vout.len(),
            tx.vout.iter().map(|o| o.value).sum::<f64>()
        );
    }
    Ok(())
}

pub async fn cancel_transaction(data_dir: &Path, tx_id_hex: &str) -> NodeResult<()> {
    let tx_id = parse_hash(tx_id_hex)?;
    let store = Arc::new(Store::open(data_dir).await?);
    let mempool = demo_node_mempool::Mempool::new(Arc::clone(&store));
    if mempool.exists(&tx_id).await?.is_none() {
        return Err(NodeError::UnknownMempoolTx(tx_id_hex.to_string()));
    }
    mempool.delete(&tx_id).await?;
    println!("removed {tx_id_hex} from the mempool");
    Ok(())
}

fn parse_hash(s: &str) -> NodeResult<demo_node_types::Hash32> {
    let bytes = hex::decode(s).map_err(|_| {
        NodeError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, "transaction id must be hex"))
    })?;
    bytes
        .try_into()
        .map_err(|_| NodeError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, "transaction id must be 32 bytes")))
}
