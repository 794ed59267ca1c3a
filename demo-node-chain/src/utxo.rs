//! UTXO index (C6): tx-id → the subset of its outputs still unspent under
//! `tip`.
//!
//! Grounded on `node/transactions_unspent.go`'s `UnspentTransactions` bucket
//! (one record per tx-id holding its live outputs, rewritten in full on every
//! update — `UpdateOnBlockAdd`/`UpdateOnBlockCancel`) and `labs/14-utxo-model`'s
//! `UtxoSet::apply_transaction`, generalized from a flat `HashMap<UtxoId, Utxo>`
//! to the per-tx-id `Vec<UtxoEntry>` shape the spec calls for.

use demo_node_store::{Bucket, Store, StoreError};
use demo_node_types::{Block, Hash32, PubkeyHash, Transaction};
use ripemd::Ripemd160;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// One still-unspent output, as tracked by the UTXO index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UtxoEntry {
    pub out_index: u32,
    pub value: f64,
    pub pubkey_hash: PubkeyHash,
    /// The pubkey hash of whoever funded this output (empty for coinbase);
    /// mirrors the Go original's `sender` field on `TXOutputIndependent`.
    pub sender_pubkey_hash: Option<PubkeyHash>,
    pub is_coinbase: bool,
    pub block_hash: Hash32,
}

fn pubkey_hash_of(pubkey: &[u8]) -> PubkeyHash {
    let sha = Sha256::digest(pubkey);
    let ripe = Ripemd160::digest(sha);
    let mut out = [0u8; 20];
    out.copy_from_slice(&ripe);
    out
}

fn sender_of(tx: &Transaction) -> Option<PubkeyHash> {
    if tx.is_coinbase() {
        return None;
    }
    tx.vin.first().map(|input| pubkey_hash_of(&input.pubkey))
}

pub(crate) async fn read_utxo(store: &Store, tx_id: &Hash32) -> Result<Vec<UtxoEntry>, StoreError> {
    Ok(store
        .get_decoded::<Vec<UtxoEntry>>(Bucket::Utxo, tx_id)
        .await?
        .unwrap_or_default())
}

/// Stage the UTXO updates for a block being *applied* to the main branch:
/// consumed outputs are removed (or the whole entry dropped if it becomes
/// empty), and every output of every transaction in the block is inserted.
pub(crate) async fn plan_apply_block(
    store: &Store,
    block: &Block,
) -> Result<HashMap<Hash32, Option<Vec<UtxoEntry>>>, StoreError> {
    let mut updates: HashMap<Hash32, Option<Vec<UtxoEntry>>> = HashMap::new();

    for tx in &block.transactions {
        let sender = sender_of(tx);

        if !tx.is_coinbase() {
            for input in &tx.vin {
                let prev_id = input.prev_tx_id.expect("non-coinbase input has a previous tx");
                let mut outs = match updates.remove(&prev_id) {
                    Some(existing) => existing.unwrap_or_default(),
                    None => read_utxo(store, &prev_id).await?,
                };
                outs.retain(|o| o.out_index != input.vout_index as u32);
                updates.insert(prev_id, if outs.is_empty() { None } else { Some(outs) });
            }
        }

        let new_outs: Vec<UtxoEntry> = tx
            .vout
            .iter()
            .enumerate()
            .map(|(i, out)| UtxoEntry {
                out_index: i as u32,
                value: out.value,
                pubkey_hash: out.pubkey_hash,
                sender_pubkey_hash: sender,
                is_coinbase: tx.is_coinbase(),
                block_hash: block.hash,
            })
            .collect();
        updates.insert(tx.id, Some(new_outs));
    }

    Ok(updates)
}

/// One consumed input resolved against the chain's new state, ready to be
/// folded into an unwind plan: `prev_tx` is the transaction the input
/// spends (absent if it isn't reachable from the chain at all, in which
/// case there is nothing to restore), and `still_spent` is whether some
/// other block still reachable from the new tip spends the same output.
pub(crate) struct ResolvedInput {
    pub prev_tx_id: Hash32,
    pub out_index: u32,
    pub prev_tx: Option<Transaction>,
    pub still_spent: bool,
}

/// Stage the inverse of `plan_apply_block`: used both for a plain top-drop
/// and for unwinding a block during reorg. Every output the block minted is
/// removed; every output it consumed is restored unless `still_spent`.
pub(crate) async fn plan_unwind_block(
    store: &Store,
    block: &Block,
    resolved_inputs: &[ResolvedInput],
) -> Result<HashMap<Hash32, Option<Vec<UtxoEntry>>>, StoreError> {
    let mut updates: HashMap<Hash32, Option<Vec<UtxoEntry>>> = HashMap::new();

    for tx in &block.transactions {
        updates.insert(tx.id, None);
    }

    for resolved in resolved_inputs {
        let Some(prev_tx) = &resolved.prev_tx else {
            continue;
        };
        let mut outs = match updates.remove(&resolved.prev_tx_id) {
            Some(existing) => existing.unwrap_or_default(),
            None => read_utxo(store, &resolved.prev_tx_id).await?,
        };

        if !resolved.still_spent && !outs.iter().any(|o| o.out_index == resolved.out_index) {
            if let Some(out) = prev_tx.vout.get(resolved.out_index as usize) {
                outs.push(UtxoEntry {
                    out_index: resolved.out_index,
                    value: out.value,
                    pubkey_hash: out.pubkey_hash,
                    sender_pubkey_hash: sender_of(prev_tx),
                    is_coinbase: prev_tx.is_coinbase(),
                    block_hash: block.hash,
                });
            }
        }
        updates.insert(resolved.prev_tx_id, if outs.is_empty() { None } else { Some(outs) });
    }

    Ok(updates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use demo_node_types::{TxInput, TxOutput};

    fn block_with(txs: Vec<Transaction>, height: u32, hash: Hash32) -> Block {
        let mut b = Block::new_unmined(1, txs, Some([1u8; 32]), height);
        b.hash = hash;
        b
    }

    #[tokio::test]
    async fn apply_block_inserts_outputs_and_removes_consumed() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).await.unwrap();

        let coinbase = Transaction::coinbase([1u8; 20], b"g".to_vec(), 0);
        let genesis = block_with(vec![coinbase.clone()], 0, [9u8; 32]);
        let plan = plan_apply_block(&store, &genesis).await.unwrap();
        assert_eq!(plan.len(), 1);
        assert!(plan.get(&coinbase.id).unwrap().is_some());

        let spend = Transaction::new(
            vec![TxInput {
                prev_tx_id: Some(coinbase.id),
                vout_index: 0,
                signature: vec![],
                pubkey: vec![7u8; 5],
            }],
            vec![TxOutput {
                value: 10.0,
                pubkey_hash: [2u8; 20],
            }],
            1,
        );
        store
            .transact(|batch| {
                batch.put_encoded(
                    Bucket::Utxo,
                    coinbase.id.to_vec(),
                    &vec![UtxoEntry {
                        out_index: 0,
                        value: 10.0,
                        pubkey_hash: [1u8; 20],
                        sender_pubkey_hash: None,
                        is_coinbase: true,
                        block_hash: genesis.hash,
                    }],
                )
            })
            .await
            .unwrap();

        let block2 = block_with(vec![spend.clone()], 1, [8u8; 32]);
        let plan2 = plan_apply_block(&store, &block2).await.unwrap();
        assert_eq!(plan2.get(&coinbase.id).unwrap(), &None);
        let new_outs = plan2.get(&spend.id).unwrap().as_ref().unwrap();
        assert_eq!(new_outs.len(), 1);
        assert_eq!(new_outs[0].pubkey_hash, [2u8; 20]);
    }

    #[tokio::test]
    async fn unwind_restores_output_when_not_still_spent() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).await.unwrap();

        let coinbase = Transaction::coinbase([1u8; 20], b"g".to_vec(), 0);
        let spend = Transaction::new(
            vec![TxInput {
                prev_tx_id: Some(coinbase.id),
                vout_index: 0,
                signature: vec![],
                pubkey: vec![],
            }],
            vec![TxOutput {
                value: 10.0,
                pubkey_hash: [2u8; 20],
            }],
            1,
        );
        let block = block_with(vec![spend.clone()], 1, [8u8; 32]);

        let resolved = vec![ResolvedInput {
            prev_tx_id: coinbase.id,
            out_index: 0,
            prev_tx: Some(coinbase.clone()),
            still_spent: false,
        }];
        let plan = plan_unwind_block(&store, &block, &resolved).await.unwrap();
        assert_eq!(plan.get(&spend.id).unwrap(), &None);
        let restored = plan.get(&coinbase.id).unwrap().as_ref().unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].pubkey_hash, [1u8; 20]);
    }
}
