//! Aggregate error type for the `demo-node` CLI surface: every library
//! crate's error composed with `thiserror`, the same composition style each
//! library crate already uses for its own dependencies.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Store(#[from] demo_node_store::StoreError),
    #[error(transparent)]
    Chain(#[from] demo_node_chain::ChainError),
    #[error(transparent)]
    Mempool(#[from] demo_node_mempool::MempoolError),
    #[error(transparent)]
    Verify(#[from] demo_node_verify::VerifyError),
    #[error(transparent)]
    Miner(#[from] demo_node_miner::MinerError),
    #[error(transparent)]
    Crypto(#[from] demo_node_crypto::CryptoError),
    #[error(transparent)]
    Peer(#[from] demo_node_net::PeerError),
    #[error(transparent)]
    Protocol(#[from] demo_node_net::ProtocolError),
    #[error("node is not running for this data directory")]
    NotRunning,
    #[error("a node is already running for this data directory (pid {0})")]
    AlreadyRunning(u32),
    #[error("mining attempt did not produce a block: {0:?}")]
    NothingMined(demo_node_miner::MineOutcome),
    #[error("transaction {0} not found in the mempool")]
    UnknownMempoolTx(String),
}

pub type NodeResult<T> = Result<T, NodeError>;
