//! Transaction index (C5): tx-id → containing block hash(es), and the
//! spent-output ledger (tx-id → who spent which of its outputs, and where).

use demo_node_store::{Bucket, Store, StoreError};
use demo_node_types::{Block, Hash32};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A record of one output being consumed: which input, in which spending
/// transaction and block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TxSpentEntry {
    pub out_index: u32,
    pub spender_tx_id: Hash32,
    pub input_index: u32,
    pub spender_block_hash: Hash32,
}

pub(crate) async fn read_tx_index(store: &Store, tx_id: &Hash32) -> Result<Vec<Hash32>, StoreError> {
    Ok(store
        .get_decoded::<Vec<Hash32>>(Bucket::TxIndex, tx_id)
        .await?
        .unwrap_or_default())
}

pub(crate) async fn read_tx_spent(
    store: &Store,
    tx_id: &Hash32,
) -> Result<Vec<TxSpentEntry>, StoreError> {
    Ok(store
        .get_decoded::<Vec<TxSpentEntry>>(Bucket::TxSpent, tx_id)
        .await?
        .unwrap_or_default())
}

/// Stage the tx-index and spent-ledger updates for a block being added, in
/// either branch: every transaction's id gets `block.hash` appended to its
/// tx-index entry, and every non-coinbase input's referenced output gets a
/// spent-entry appended, regardless of whether this block ends up on the
/// main branch.
pub(crate) async fn plan_record_block(
    store: &Store,
    block: &Block,
) -> Result<(HashMap<Hash32, Vec<Hash32>>, HashMap<Hash32, Vec<TxSpentEntry>>), StoreError> {
    let mut index_updates: HashMap<Hash32, Vec<Hash32>> = HashMap::new();
    let mut spent_updates: HashMap<Hash32, Vec<TxSpentEntry>> = HashMap::new();

    for tx in &block.transactions {
        let mut containing = read_tx_index(store, &tx.id).await?;
        if !containing.contains(&block.hash) {
            containing.push(block.hash);
        }
        index_updates.insert(tx.id, containing);

        if tx.is_coinbase() {
            continue;
        }
        for (input_index, input) in tx.vin.iter().enumerate() {
            let prev_id = input.prev_tx_id.expect("non-coinbase input has a previous tx");
            let mut spent = match spent_updates.remove(&prev_id) {
                Some(existing) => existing,
                None => read_tx_spent(store, &prev_id).await?,
            };
            spent.push(TxSpentEntry {
                out_index: input.vout_index as u32,
                spender_tx_id: tx.id,
                input_index: input_index as u32,
                spender_block_hash: block.hash,
            });
            spent_updates.insert(prev_id, spent);
        }
    }

    Ok((index_updates, spent_updates))
}

/// Stage the inverse: strip `block.hash` out of every tx-index entry the
/// block contributed, and remove the spent-entries it recorded. Used when a
/// block is fully forgotten (top-drop or reorg unwind).
pub(crate) async fn plan_forget_block(
    store: &Store,
    block: &Block,
) -> Result<
    (
        HashMap<Hash32, Option<Vec<Hash32>>>,
        HashMap<Hash32, Option<Vec<TxSpentEntry>>>,
    ),
    StoreError,
> {
    let mut index_updates: HashMap<Hash32, Option<Vec<Hash32>>> = HashMap::new();
    let mut spent_updates: HashMap<Hash32, Option<Vec<TxSpentEntry>>> = HashMap::new();

    for tx in &block.transactions {
        let mut containing = read_tx_index(store, &tx.id).await?;
        containing.retain(|h| h != &block.hash);
        index_updates.insert(tx.id, if containing.is_empty() { None } else { Some(containing) });

        if tx.is_coinbase() {
            continue;
        }
        for input in &tx.vin {
            let prev_id = input.prev_tx_id.expect("non-coinbase input has a previous tx");
            let mut spent = match spent_updates.remove(&prev_id) {
                Some(existing) => existing.unwrap_or_default(),
                None => read_tx_spent(store, &prev_id).await?,
            };
            spent.retain(|e| e.spender_block_hash != block.hash);
            spent_updates.insert(prev_id, if spent.is_empty() { None } else { Some(spent) });
        }
    }

    Ok((index_updates, spent_updates))
}
