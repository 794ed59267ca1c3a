//! Node facade (C12): wires the store, chain manager, mempool, miner, peer
//! set, and gossip server into one running process.
//!
//! Grounded on `original_source/node/nodeserver.go`'s `StartServer`, which
//! performs the same composition (open store, load chain, start
//! `BlockBuilder`, start the listener, install a signal handler) before
//! blocking until shutdown.

use crate::config::ResolvedConfig;
use crate::error::{NodeError, NodeResult};
use demo_node_chain::ChainManager;
use demo_node_mempool::Mempool;
use demo_node_miner::{Miner, MinerConfig};
use demo_node_net::{server, GossipConfig, NodeContext, PeerSet};
use demo_node_store::Store;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Everything `startnode`/`startintnode`/`makeblock` share: an opened store
/// with its chain manager, mempool, and miner built on top.
pub struct Node {
    pub store: Arc<Store>,
    pub chain: Arc<ChainManager>,
    pub mempool: Arc<Mempool>,
    pub miner: Arc<Miner>,
    pub peers: Arc<PeerSet>,
    pub gossip_config: GossipConfig,
}

impl Node {
    pub async fn open(data_dir: &Path, config: &ResolvedConfig) -> NodeResult<Self> {
        let minter_address = config
            .minter_address
            .clone()
            .ok_or_else(|| NodeError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, "minter address required (-minter or config.json MinterAddress)")))?;
        let minter_pubkey_hash = demo_node_crypto::address_to_pubkey_hash(&minter_address)?;

        let store = Arc::new(Store::open(data_dir).await?);
        let chain = Arc::new(ChainManager::new(Arc::clone(&store)));
        let mempool = Arc::new(Mempool::new(Arc::clone(&store)));
        let peers = Arc::new(PeerSet::load(Arc::clone(&store)).await?);

        let miner_config = MinerConfig {
            target_bits: config.target_bits,
            min_tx: config.min_tx,
            ..MinerConfig::new(minter_pubkey_hash)
        };
        let miner = Arc::new(Miner::new(Arc::clone(&chain), Arc::clone(&mempool), miner_config));

        let gossip_config =
            GossipConfig { self_addr: config.listen_addr(), auth_token: config.auth_token.clone(), target_bits: config.target_bits };

        for addr in &config.nodes {
            peers.add(addr).await?;
        }

        if let Some(url) = &config.bootstrap_url {
            if peers.list().await.is_empty() {
                let genesis_hash = chain.get_genesis_hash().await?;
                let client = reqwest::Client::new();
                match peers.bootstrap(&client, url, genesis_hash).await {
                    Ok(added) => tracing::info!(added, url, "bootstrapped peer list"),
                    Err(e) => tracing::warn!(url, error = %e, "peer-list bootstrap failed"),
                }
            }
        }

        Ok(Node { store, chain, mempool, miner, peers, gossip_config })
    }
}

/// Run the gossip server and block-builder in the foreground until `Ctrl-C`
/// or a peer-initiated shutdown arrives. Used by both `startnode` and
/// `startintnode` — the two differ only in whether a PID file is written
/// (spec.md documents them as separate commands but doesn't distinguish
/// their runtime behavior beyond that).
pub async fn run_foreground(data_dir: &Path, config: ResolvedConfig, write_pidfile: bool) -> NodeResult<()> {
    let node = Node::open(data_dir, &config).await?;
    let (build_tx, build_rx) = mpsc::channel(16);
    let (stop_tx, stop_rx_server) = broadcast::channel(1);
    let stop_rx_builder = stop_tx.subscribe();

    let ctx = Arc::new(NodeContext::new(
        Arc::clone(&node.chain),
        Arc::clone(&node.mempool),
        Arc::clone(&node.miner),
        Arc::clone(&node.peers),
        node.gossip_config.clone(),
        build_tx.clone(),
    ));

    if write_pidfile {
        crate::pidfile::write(data_dir)?;
    }

    for addr in node.peers.list().await {
        let addr = addr.clone();
        let self_addr = node.gossip_config.self_addr.clone();
        let height = node.chain.get_best_height().await.unwrap_or(0);
        tokio::spawn(async move {
            let _ = demo_node_net::client::send_version(&addr, &self_addr, height).await;
        });
    }

    let listen_addr = node.gossip_config.self_addr.clone();
    let server_ctx = Arc::clone(&ctx);
    let server_task = tokio::spawn(async move { server::serve(server_ctx, &listen_addr, stop_rx_server).await });
    let builder_task = tokio::spawn(server::run_block_builder(Arc::clone(&ctx), build_rx, stop_rx_builder));

    // Nudge the builder once at startup so a non-empty mempool inherited
    // from a previous run gets a chance to mine immediately.
    let _ = build_tx.try_send(());

    wait_for_shutdown_signal().await;
    tracing::info!("received shutdown signal");
    let _ = stop_tx.send(());
    let _ = server_task.await;
    let _ = builder_task.await;

    if write_pidfile {
        crate::pidfile::remove(data_dir);
    }
    Ok(())
}

/// Waits for `Ctrl-C` or, on unix, the `SIGTERM` that `stopnode` sends via
/// `pidfile::terminate`.
#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// A single mining attempt without starting the server, for the `makeblock`
/// CLI command.
pub async fn make_one_block(data_dir: &Path, config: ResolvedConfig) -> NodeResult<demo_node_miner::MineOutcome> {
    let node = Node::open(data_dir, &config).await?;
    let cancel = std::sync::atomic::AtomicBool::new(false);
    Ok(node.miner.try_make_block(&cancel).await?)
}
