//! Transaction and block verification (C8): quick (mempool-admission) and
//! deep (block-inclusion) checks, plus whole-block acceptance.
//!
//! Grounded on `labs/10-transaction-validation`'s input-lookup →
//! signature-check → balance-check flow and `labs/49-digital-signatures`'s
//! `verify_signature`, generalized to the P-256/SHA-256 combination and the
//! UTXO-and-mempool dual lookup spec.md requires.

use demo_node_chain::ChainManager;
use demo_node_crypto::{verify_signature, CryptoError};
use demo_node_mempool::Mempool;
use demo_node_types::{constants, Hash32, PubkeyHash, Transaction};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error(transparent)]
    Chain(#[from] demo_node_chain::ChainError),
    #[error(transparent)]
    Mempool(#[from] demo_node_mempool::MempoolError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("input references an unknown or unreachable output")]
    UnknownInput,
    #[error("input spends an output already spent under the chain tip")]
    DoubleSpend,
    #[error("signature does not verify")]
    BadSignature,
    #[error("output value below the smallest representable unit")]
    ValueUnderflow,
    #[error("sum of inputs does not match sum of outputs")]
    ImbalancedAmounts,
    #[error("transaction is a coinbase where one isn't allowed, or a block's coinbase is malformed")]
    BadCoinbase,
    #[error("transaction count outside the allowed range for this height")]
    BadTransactionCount,
    #[error("proof-of-work target not met")]
    BadProofOfWork,
}

struct ResolvedOutput {
    value: f64,
    pubkey_hash: PubkeyHash,
}

fn check_balance(tx: &Transaction, resolved: &[ResolvedOutput]) -> Result<(), VerifyError> {
    for out in &tx.vout {
        if out.value < constants::SMALLEST_UNIT {
            return Err(VerifyError::ValueUnderflow);
        }
    }
    let sum_in: f64 = resolved.iter().map(|r| r.value).sum();
    let sum_out: f64 = tx.vout.iter().map(|o| o.value).sum();
    if (sum_in - sum_out).abs() >= constants::SMALLEST_UNIT {
        return Err(VerifyError::ImbalancedAmounts);
    }
    Ok(())
}

fn check_signatures(tx: &Transaction, resolved: &[ResolvedOutput]) -> Result<(), VerifyError> {
    for (index, input) in tx.vin.iter().enumerate() {
        let digest = tx.sign_hash(index, &resolved[index].pubkey_hash);
        if !verify_signature(&digest, &input.signature, &input.pubkey)? {
            return Err(VerifyError::BadSignature);
        }
    }
    Ok(())
}

/// Mempool-admission verification: each input must be backed by an entry in
/// the UTXO set or, failing that, an output of a still-pending mempool
/// transaction.
pub async fn verify_transaction_quick(
    tx: &Transaction,
    chain: &ChainManager,
    mempool: &Mempool,
) -> Result<(), VerifyError> {
    if tx.is_coinbase() {
        return Err(VerifyError::BadCoinbase);
    }

    let mut resolved = Vec::with_capacity(tx.vin.len());
    for input in &tx.vin {
        let prev_id = input.prev_tx_id.expect("non-coinbase input has a previous tx");
        let out_index = input.vout_index as u32;

        let from_utxo = chain
            .get_utxo(prev_id)
            .await?
            .into_iter()
            .find(|e| e.out_index == out_index)
            .map(|e| ResolvedOutput { value: e.value, pubkey_hash: e.pubkey_hash });

        let output = match from_utxo {
            Some(o) => o,
            None => {
                let prev_tx = mempool.exists(&prev_id).await?.ok_or(VerifyError::UnknownInput)?;
                let out = prev_tx
                    .vout
                    .get(out_index as usize)
                    .ok_or(VerifyError::UnknownInput)?;
                ResolvedOutput { value: out.value, pubkey_hash: out.pubkey_hash }
            }
        };
        resolved.push(output);
    }

    check_signatures(tx, &resolved)?;
    check_balance(tx, &resolved)?;
    Ok(())
}

/// Block-inclusion verification: inputs are resolved against chain state
/// reachable from `tip`, falling back to `earlier_in_block` — transactions
/// already listed earlier in the same candidate block.
pub async fn verify_transaction_deep(
    tx: &Transaction,
    earlier_in_block: &[Transaction],
    tip: Hash32,
    chain: &ChainManager,
) -> Result<(), VerifyError> {
    if tx.is_coinbase() {
        return Err(VerifyError::BadCoinbase);
    }

    let mut resolved = Vec::with_capacity(tx.vin.len());
    for input in &tx.vin {
        let prev_id = input.prev_tx_id.expect("non-coinbase input has a previous tx");
        let out_index = input.vout_index as u32;

        let candidates = chain.get_tx_index(prev_id).await?;
        let output = match chain.choose_hash_under_tip(&candidates, tip).await? {
            Some(block_hash) => {
                let block = chain.get_block(block_hash).await?.ok_or(VerifyError::UnknownInput)?;
                let prev_tx = block
                    .transactions
                    .iter()
                    .find(|t| t.id == prev_id)
                    .ok_or(VerifyError::UnknownInput)?;
                let out = prev_tx
                    .vout
                    .get(out_index as usize)
                    .ok_or(VerifyError::UnknownInput)?;
                ResolvedOutput { value: out.value, pubkey_hash: out.pubkey_hash }
            }
            None => {
                let prev_tx = earlier_in_block
                    .iter()
                    .find(|t| t.id == prev_id)
                    .ok_or(VerifyError::UnknownInput)?;
                let out = prev_tx
                    .vout
                    .get(out_index as usize)
                    .ok_or(VerifyError::UnknownInput)?;
                ResolvedOutput { value: out.value, pubkey_hash: out.pubkey_hash }
            }
        };
        resolved.push(output);

        let spent = chain.get_tx_spent(prev_id).await?;
        for entry in spent.iter().filter(|e| e.out_index == out_index) {
            let reachable = chain
                .choose_hash_under_tip(std::slice::from_ref(&entry.spender_block_hash), tip)
                .await?
                .is_some();
            if reachable {
                return Err(VerifyError::DoubleSpend);
            }
        }
    }

    check_signatures(tx, &resolved)?;
    check_balance(tx, &resolved)?;
    Ok(())
}

/// Whole-block acceptance: exactly one coinbase, a transaction count within
/// the allowed range for `block.height`, proof-of-work satisfied, and every
/// non-coinbase transaction deep-verified against the transactions preceding
/// it in the block.
pub async fn verify_block(
    block: &demo_node_types::Block,
    target_bits: u32,
    chain: &ChainManager,
) -> Result<(), VerifyError> {
    let coinbase_count = block.transactions.iter().filter(|t| t.is_coinbase()).count();
    if coinbase_count != 1 {
        return Err(VerifyError::BadCoinbase);
    }
    let coinbase = block.coinbase().expect("exactly one coinbase checked above");
    if coinbase.vout[0].value != constants::BLOCK_REWARD {
        return Err(VerifyError::BadCoinbase);
    }

    let min_tx = constants::min_tx_for_height(block.height);
    let non_coinbase_count = block.transactions.len() - coinbase_count;
    if non_coinbase_count < min_tx || block.transactions.len() > constants::MAX_TX_PER_BLOCK {
        return Err(VerifyError::BadTransactionCount);
    }

    if !demo_node_pow::is_valid(block, target_bits) {
        return Err(VerifyError::BadProofOfWork);
    }

    let Some(tip) = block.prev_block_hash else {
        return Ok(());
    };

    for i in 0..block.transactions.len() {
        let tx = &block.transactions[i];
        if tx.is_coinbase() {
            continue;
        }
        if let Err(e) = verify_transaction_deep(tx, &block.transactions[..i], tip, chain).await {
            tracing::debug!(tx_id = ?tx.id, error = %e, "block rejected: transaction failed deep verification");
            return Err(e);
        }
    }

    Ok(())
}
