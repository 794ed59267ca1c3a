//! Mempool (C7): pending, not-yet-confirmed transactions, with same-pool
//! conflict detection.
//!
//! Grounded on `node/transactions/pending.go`'s `UnApprovedTransactions`
//! (one bucket of serialized pending transactions, iterated and sorted
//! oldest-first for `GetTransactions`) and `labs/25-transaction-pool`'s
//! `TransactionPool` shape, but reworked per spec.md §9: this system has no
//! fee market, so ordering is strictly by creation `time` (nanosecond,
//! tie-broken by tx-id) rather than by fee.

use demo_node_store::{Bucket, Store, StoreError};
use demo_node_types::{Hash32, PubkeyHash, Transaction, TxInput};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MempoolError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Encoding(#[from] bincode::Error),
    #[error("conflicts with mempool transaction {with:?}")]
    Conflict { with: Hash32 },
    #[error("input transaction {0:?} is not prepared")]
    MissingInput(Hash32),
    #[error("duplicate usage of output {out_index} of transaction {tx_id:?}")]
    DuplicateInput { tx_id: Hash32, out_index: u32 },
}

fn pubkey_hash_of(pubkey: &[u8]) -> PubkeyHash {
    let sha = Sha256::digest(pubkey);
    let ripe = Ripemd160::digest(sha);
    let mut out = [0u8; 20];
    out.copy_from_slice(&ripe);
    out
}

/// A mempool output addressed to some pubkey hash, reported by
/// `get_prepared_by`.
#[derive(Clone, Debug, PartialEq)]
pub struct PreparedOutput {
    pub tx_id: Hash32,
    pub out_index: u32,
    pub value: f64,
    pub pubkey_hash: PubkeyHash,
    pub sender_pubkey_hash: Option<PubkeyHash>,
}

/// The result of `Mempool::get_prepared_by`: everything the wallet-facing
/// balance and new-transaction flows need for one address.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PreparedBy {
    pub all_inputs: Vec<TxInput>,
    pub unreferenced_outputs: Vec<PreparedOutput>,
    pub inputs_on_confirmed: Vec<TxInput>,
}

pub struct Mempool {
    store: Arc<Store>,
}

impl Mempool {
    pub fn new(store: Arc<Store>) -> Self {
        Mempool { store }
    }

    /// Admit `tx`. Returns `Ok(false)` without error if a transaction with
    /// the same id is already pending (silent duplicate rejection). Returns
    /// `Err(Conflict)` if any input is already spent by another pending
    /// transaction.
    pub async fn add(&self, tx: Transaction) -> Result<bool, MempoolError> {
        if self.exists(&tx.id).await?.is_some() {
            return Ok(false);
        }

        for other in self.iterate().await? {
            for input in &tx.vin {
                if input.is_coinbase() {
                    continue;
                }
                for other_input in &other.vin {
                    if other_input.is_coinbase() {
                        continue;
                    }
                    if other_input.prev_tx_id == input.prev_tx_id
                        && other_input.vout_index == input.vout_index
                    {
                        tracing::trace!(tx_id = ?tx.id, conflicts_with = ?other.id, "rejecting conflicting transaction");
                        return Err(MempoolError::Conflict { with: other.id });
                    }
                }
            }
        }

        let encoded = bincode::serialize(&tx)?;
        self.store.put(Bucket::Mempool, &tx.id, &encoded).await?;
        tracing::trace!(tx_id = ?tx.id, "admitted transaction to mempool");
        Ok(true)
    }

    pub async fn delete(&self, tx_id: &Hash32) -> Result<(), MempoolError> {
        self.store.delete(Bucket::Mempool, tx_id).await?;
        Ok(())
    }

    pub async fn exists(&self, tx_id: &Hash32) -> Result<Option<Transaction>, MempoolError> {
        Ok(self.store.get_decoded(Bucket::Mempool, tx_id).await?)
    }

    pub async fn count(&self) -> Result<usize, MempoolError> {
        Ok(self.store.iterate(Bucket::Mempool).await?.len())
    }

    /// All pending transactions, oldest-first by `time` (ties broken by
    /// tx-id) so iteration order is deterministic.
    pub async fn iterate(&self) -> Result<Vec<Transaction>, MempoolError> {
        let raw = self.store.iterate(Bucket::Mempool).await?;
        let mut txs: Vec<Transaction> = raw
            .into_iter()
            .map(|(_, v)| bincode::deserialize(&v))
            .collect::<Result<_, _>>()?;
        txs.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.id.cmp(&b.id)));
        Ok(txs)
    }

    /// Up to `n` oldest pending transactions.
    pub async fn get_transactions(&self, n: usize) -> Result<Vec<Transaction>, MempoolError> {
        let mut all = self.iterate().await?;
        all.truncate(n);
        Ok(all)
    }

    /// Everything the wallet needs for `pubkey_hash`: every pending input it
    /// spends, every pending output addressed to it not yet consumed by
    /// another pending input, and the subset of those inputs that spend an
    /// output *not* itself pending (so presumably already confirmed).
    pub async fn get_prepared_by(&self, pubkey_hash: &PubkeyHash) -> Result<PreparedBy, MempoolError> {
        let txs = self.iterate().await?;
        let mut all_inputs: Vec<TxInput> = Vec::new();
        let mut outputs: Vec<PreparedOutput> = Vec::new();

        for tx in &txs {
            let sender = if tx.is_coinbase() {
                None
            } else {
                tx.vin.first().map(|i| pubkey_hash_of(&i.pubkey))
            };

            if !tx.is_coinbase() {
                for input in &tx.vin {
                    if &pubkey_hash_of(&input.pubkey) == pubkey_hash {
                        all_inputs.push(input.clone());
                    }
                }
            }
            for (i, out) in tx.vout.iter().enumerate() {
                if &out.pubkey_hash == pubkey_hash {
                    outputs.push(PreparedOutput {
                        tx_id: tx.id,
                        out_index: i as u32,
                        value: out.value,
                        pubkey_hash: out.pubkey_hash,
                        sender_pubkey_hash: sender,
                    });
                }
            }
        }

        let is_referenced = |o: &PreparedOutput| {
            all_inputs
                .iter()
                .any(|i| i.prev_tx_id == Some(o.tx_id) && i.vout_index as u32 == o.out_index)
        };
        let unreferenced_outputs: Vec<PreparedOutput> =
            outputs.iter().filter(|o| !is_referenced(o)).cloned().collect();

        let spends_pending_output = |i: &TxInput| {
            outputs
                .iter()
                .any(|o| Some(o.tx_id) == i.prev_tx_id && o.out_index == i.vout_index as u32)
        };
        let inputs_on_confirmed: Vec<TxInput> = all_inputs
            .iter()
            .filter(|i| !spends_pending_output(i))
            .cloned()
            .collect();

        Ok(PreparedBy {
            all_inputs,
            unreferenced_outputs,
            inputs_on_confirmed,
        })
    }

    /// Partition a candidate block's transaction list into those that keep
    /// no output double-spent (`keep`) and those that lose the conflict
    /// (`drop`), deterministic by iteration order: the first transaction to
    /// claim an output wins.
    pub fn detect_conflicts(tx_list: &[Transaction]) -> (Vec<Transaction>, Vec<Transaction>) {
        let mut used: HashMap<Hash32, Vec<u32>> = HashMap::new();
        let mut keep = Vec::new();
        let mut drop = Vec::new();

        for tx in tx_list {
            let conflict = tx.vin.iter().filter(|i| !i.is_coinbase()).any(|input| {
                let prev_id = input.prev_tx_id.expect("non-coinbase input has a previous tx");
                used.get(&prev_id)
                    .is_some_and(|outs| outs.contains(&(input.vout_index as u32)))
            });

            if conflict {
                drop.push(tx.clone());
                continue;
            }
            for input in tx.vin.iter().filter(|i| !i.is_coinbase()) {
                let prev_id = input.prev_tx_id.expect("non-coinbase input has a previous tx");
                used.entry(prev_id).or_default().push(input.vout_index as u32);
            }
            keep.push(tx.clone());
        }

        (keep, drop)
    }

    /// Resolve `missing_inputs` (input-index → input) against the mempool
    /// itself, failing if any referenced transaction isn't pending or if two
    /// inputs claim the same output.
    pub async fn check_inputs_are_prepared(
        &self,
        missing_inputs: &HashMap<usize, TxInput>,
    ) -> Result<HashMap<usize, Transaction>, MempoolError> {
        let mut claimed: HashMap<Hash32, Vec<u32>> = HashMap::new();
        let mut resolved = HashMap::new();

        for (&index, input) in missing_inputs {
            let prev_id = input.prev_tx_id.expect("non-coinbase input has a previous tx");
            let out_index = input.vout_index as u32;
            if claimed.get(&prev_id).is_some_and(|outs| outs.contains(&out_index)) {
                return Err(MempoolError::DuplicateInput { tx_id: prev_id, out_index });
            }
            let tx = self
                .exists(&prev_id)
                .await?
                .ok_or(MempoolError::MissingInput(prev_id))?;
            resolved.insert(index, tx);
            claimed.entry(prev_id).or_default().push(out_index);
        }

        Ok(resolved)
    }

    /// Resolve `missing_inputs` against `earlier_in_block` — transactions
    /// already listed earlier in the same candidate block — rather than the
    /// mempool, for deep (block-inclusion) verification.
    pub fn check_inputs_were_before(
        missing_inputs: &HashMap<usize, TxInput>,
        earlier_in_block: &[Transaction],
    ) -> Result<HashMap<usize, Transaction>, MempoolError> {
        let mut claimed: HashMap<Hash32, Vec<u32>> = HashMap::new();
        let mut resolved = HashMap::new();

        for (&index, input) in missing_inputs {
            let prev_id = input.prev_tx_id.expect("non-coinbase input has a previous tx");
            let out_index = input.vout_index as u32;
            if claimed.get(&prev_id).is_some_and(|outs| outs.contains(&out_index)) {
                return Err(MempoolError::DuplicateInput { tx_id: prev_id, out_index });
            }
            let tx = earlier_in_block
                .iter()
                .find(|t| t.id == prev_id)
                .cloned()
                .ok_or(MempoolError::MissingInput(prev_id))?;
            resolved.insert(index, tx);
            claimed.entry(prev_id).or_default().push(out_index);
        }

        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use demo_node_types::TxOutput;

    fn input(prev: Hash32, vout: i32, pubkey: Vec<u8>) -> TxInput {
        TxInput {
            prev_tx_id: Some(prev),
            vout_index: vout,
            signature: vec![],
            pubkey,
        }
    }

    fn output(value: f64, hash: PubkeyHash) -> TxOutput {
        TxOutput { value, pubkey_hash: hash }
    }

    async fn mempool() -> Mempool {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).await.unwrap());
        Mempool::new(store)
    }

    #[tokio::test]
    async fn add_then_exists_round_trips() {
        let pool = mempool().await;
        let tx = Transaction::coinbase([1u8; 20], b"x".to_vec(), 1);
        assert!(pool.add(tx.clone()).await.unwrap());
        assert_eq!(pool.exists(&tx.id).await.unwrap(), Some(tx));
    }

    #[tokio::test]
    async fn duplicate_by_id_is_silently_rejected() {
        let pool = mempool().await;
        let tx = Transaction::coinbase([1u8; 20], b"x".to_vec(), 1);
        assert!(pool.add(tx.clone()).await.unwrap());
        assert!(!pool.add(tx).await.unwrap());
        assert_eq!(pool.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn conflicting_spend_is_rejected() {
        let pool = mempool().await;
        let prev = [9u8; 32];
        let tx1 = Transaction::new(
            vec![input(prev, 0, vec![1])],
            vec![output(1.0, [2u8; 20])],
            1,
        );
        let tx2 = Transaction::new(
            vec![input(prev, 0, vec![1])],
            vec![output(1.0, [3u8; 20])],
            2,
        );
        assert!(pool.add(tx1).await.unwrap());
        let err = pool.add(tx2).await.unwrap_err();
        assert!(matches!(err, MempoolError::Conflict { .. }));
    }

    #[tokio::test]
    async fn get_transactions_returns_oldest_first() {
        let pool = mempool().await;
        let tx_new = Transaction::coinbase([1u8; 20], b"a".to_vec(), 100);
        let tx_old = Transaction::coinbase([2u8; 20], b"b".to_vec(), 1);
        pool.add(tx_new.clone()).await.unwrap();
        pool.add(tx_old.clone()).await.unwrap();
        let ordered = pool.get_transactions(10).await.unwrap();
        assert_eq!(ordered[0].id, tx_old.id);
        assert_eq!(ordered[1].id, tx_new.id);
    }

    #[test]
    fn detect_conflicts_keeps_first_claimant() {
        let prev = [9u8; 32];
        let tx1 = Transaction::new(vec![input(prev, 0, vec![1])], vec![output(1.0, [2u8; 20])], 1);
        let tx2 = Transaction::new(vec![input(prev, 0, vec![1])], vec![output(1.0, [3u8; 20])], 2);
        let (keep, drop) = Mempool::detect_conflicts(&[tx1.clone(), tx2.clone()]);
        assert_eq!(keep, vec![tx1]);
        assert_eq!(drop, vec![tx2]);
    }

    #[tokio::test]
    async fn get_prepared_by_separates_pending_and_confirmed_inputs() {
        let pool = mempool().await;
        let addr = [5u8; 20];
        let confirmed_prev = [1u8; 32];
        let spend_confirmed = Transaction::new(
            vec![input(confirmed_prev, 0, b"pk".to_vec())],
            vec![output(2.0, [6u8; 20])],
            1,
        );
        pool.add(spend_confirmed.clone()).await.unwrap();

        let funding = Transaction::new(vec![], vec![output(5.0, addr)], 2);
        pool.add(funding.clone()).await.unwrap();

        let prepared = pool.get_prepared_by(&addr).await.unwrap();
        assert_eq!(prepared.unreferenced_outputs.len(), 1);
        assert_eq!(prepared.unreferenced_outputs[0].tx_id, funding.id);
    }

    #[tokio::test]
    async fn check_inputs_are_prepared_detects_duplicate_usage() {
        let pool = mempool().await;
        let funding = Transaction::coinbase([1u8; 20], b"x".to_vec(), 1);
        pool.add(funding.clone()).await.unwrap();

        let mut missing = HashMap::new();
        missing.insert(0usize, input(funding.id, 0, vec![]));
        missing.insert(1usize, input(funding.id, 0, vec![]));
        let err = pool.check_inputs_are_prepared(&missing).await.unwrap_err();
        assert!(matches!(err, MempoolError::DuplicateInput { .. }));
    }

    #[tokio::test]
    async fn check_inputs_are_prepared_rejects_unknown_input() {
        let pool = mempool().await;
        let mut missing = HashMap::new();
        missing.insert(0usize, input([3u8; 32], 0, vec![]));
        let err = pool.check_inputs_are_prepared(&missing).await.unwrap_err();
        assert!(matches!(err, MempoolError::MissingInput(_)));
    }

    #[test]
    fn check_inputs_were_before_resolves_from_block_prefix() {
        let prior = Transaction::coinbase([1u8; 20], b"x".to_vec(), 1);
        let mut missing = HashMap::new();
        missing.insert(0usize, input(prior.id, 0, vec![]));
        let resolved = Mempool::check_inputs_were_before(&missing, std::slice::from_ref(&prior)).unwrap();
        assert_eq!(resolved.get(&0).unwrap().id, prior.id);
    }
}
