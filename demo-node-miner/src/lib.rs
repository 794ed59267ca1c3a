//! Block producer (C9): assembles a candidate block out of pending
//! transactions, mines it, and hands the result to the chain manager.
//!
//! Grounded on `original_source/node/consensus/node_blockmaking.go`'s
//! `PrepareNewBlock`/`CompleteBlock`/`FinalBlockCheck` flow — gate on
//! mempool count, deep-verify each candidate against the ones already
//! accepted earlier in this same pass, drop conflicts, mine, then re-check
//! that the parent hasn't moved before committing — generalized into the
//! nine-step cooperative flow spec.md §4.6 describes, and `labs/48-proof-of-
//! work`'s mine-then-push shape for the surrounding plumbing.

use demo_node_chain::{AddState, ChainError, ChainManager};
use demo_node_mempool::{Mempool, MempoolError};
use demo_node_types::{constants, Block, PubkeyHash, Transaction};
use demo_node_verify::VerifyError;
use rand::RngCore;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MinerError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Mempool(#[from] MempoolError),
    #[error(transparent)]
    Verify(#[from] VerifyError),
}

/// Fixed configuration for one minting address on this node.
#[derive(Clone, Debug)]
pub struct MinerConfig {
    pub minter_pubkey_hash: PubkeyHash,
    pub target_bits: u32,
    pub min_tx: usize,
    pub max_tx: usize,
    /// Testing aid: a mined block is held until at least this much wall
    /// time has elapsed since mining began (§4.6 step 7).
    pub minimum_build_time: Duration,
}

impl MinerConfig {
    pub fn new(minter_pubkey_hash: PubkeyHash) -> Self {
        MinerConfig {
            minter_pubkey_hash,
            target_bits: constants::DEFAULT_TARGET_BITS,
            min_tx: constants::MIN_TX_PER_BLOCK,
            max_tx: constants::MAX_TX_PER_BLOCK,
            minimum_build_time: Duration::ZERO,
        }
    }
}

/// Outcome of one `Miner::try_make_block` attempt.
#[derive(Debug)]
pub enum MineOutcome {
    /// Fewer than `min_tx` transactions survived selection; nothing mined.
    NotReady,
    /// The chain's tip moved while this block was being mined; the
    /// candidate is discarded rather than chained onto a stale parent.
    StaleParent,
    /// Mined and accepted directly onto the tip. Callers should broadcast
    /// it as `inv` to peers.
    Built(Block),
    /// Mined, but by the time it was submitted something else had already
    /// taken the tip (or a side branch); not broadcast.
    Discarded(AddState),
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before 1970")
        .as_nanos() as i64
}

/// Selects pending transactions, mines a candidate block, and submits it to
/// the chain manager.
pub struct Miner {
    chain: Arc<ChainManager>,
    mempool: Arc<Mempool>,
    config: MinerConfig,
}

impl Miner {
    pub fn new(chain: Arc<ChainManager>, mempool: Arc<Mempool>, config: MinerConfig) -> Self {
        Miner { chain, mempool, config }
    }

    /// Run one mining attempt. `cancel` is checked at the proof-of-work
    /// iteration boundary so a caller can interrupt mid-search (e.g. on
    /// node shutdown, or because a competing block just arrived).
    pub async fn try_make_block(&self, cancel: &AtomicBool) -> Result<MineOutcome, MinerError> {
        let pending_count = self.mempool.count().await?;
        if pending_count < self.config.min_tx {
            return Ok(MineOutcome::NotReady);
        }

        let tip_before = self.chain.get_tip().await?;
        let candidates = self.mempool.get_transactions(self.config.max_tx).await?;

        let mut accepted: Vec<Transaction> = Vec::with_capacity(candidates.len());
        for tx in candidates {
            match demo_node_verify::verify_transaction_deep(&tx, &accepted, tip_before, &self.chain).await {
                Ok(()) => accepted.push(tx),
                Err(_) => {
                    tracing::trace!(tx_id = ?tx.id, "minting: dropping transaction that fails deep verification");
                    self.mempool.delete(&tx.id).await?;
                }
            }
        }

        let (keep, drop) = Mempool::detect_conflicts(&accepted);
        for tx in &drop {
            tracing::trace!(tx_id = ?tx.id, "minting: dropping conflicting transaction");
            self.mempool.delete(&tx.id).await?;
        }

        if keep.len() < self.config.min_tx {
            return Ok(MineOutcome::NotReady);
        }

        let tip_block = self
            .chain
            .get_block(tip_before)
            .await?
            .ok_or(ChainError::NotFound)?;

        let coinbase = Transaction::coinbase(
            self.config.minter_pubkey_hash,
            random_coinbase_data(),
            now_nanos(),
        );
        let mut transactions = keep;
        transactions.push(coinbase);

        let mut candidate = Block::new_unmined(
            now_nanos(),
            transactions,
            Some(tip_before),
            tip_block.height + 1,
        );

        let start = Instant::now();
        let Some(_report) = demo_node_pow::mine(&mut candidate, self.config.target_bits, cancel) else {
            return Ok(MineOutcome::StaleParent);
        };

        if self.config.minimum_build_time > Duration::ZERO {
            let elapsed = start.elapsed();
            if elapsed < self.config.minimum_build_time {
                tokio::time::sleep(self.config.minimum_build_time - elapsed).await;
            }
        }

        // final_block_check (§4.6 step 8): abort if the tip moved while we
        // were mining, rather than chaining onto a parent nobody wants
        // anymore.
        if self.chain.get_tip().await? != tip_before {
            return Ok(MineOutcome::StaleParent);
        }

        let state = self.chain.add_block(candidate.clone()).await?;
        match state {
            AddState::AddedToTop => {
                for tx in &candidate.transactions {
                    if !tx.is_coinbase() {
                        self.mempool.delete(&tx.id).await?;
                    }
                }
                Ok(MineOutcome::Built(candidate))
            }
            other => Ok(MineOutcome::Discarded(other)),
        }
    }
}

fn random_coinbase_data() -> Vec<u8> {
    let mut data = vec![0u8; 20];
    rand::thread_rng().fill_bytes(&mut data);
    data
}
