//! Canonical block and transaction types shared by every other crate in the
//! workspace: on-disk records, wire payloads, and hash/signature inputs all
//! serialize through the same `bincode` encoding of these structs, so the
//! field order below *is* the wire format. Don't reorder fields casually.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub mod constants {
    /// Fixed block reward paid to the coinbase output (`PaymentForBlockMade`
    /// in the original implementation).
    pub const BLOCK_REWARD: f64 = 10.0;
    /// Minimum representable amount; used to tolerate floating-point drift
    /// when comparing sums of `f64` values.
    pub const SMALLEST_UNIT: f64 = 0.000_000_01;
    /// Address version byte used by Base58Check encoding.
    pub const ADDRESS_VERSION: u8 = 0x00;
    /// Default proof-of-work difficulty (leading zero bits required).
    pub const DEFAULT_TARGET_BITS: u32 = 16;
    /// Minimum non-coinbase transactions per block (below `height`, see
    /// `min_tx_for_height`).
    pub const MIN_TX_PER_BLOCK: usize = 3;
    /// Maximum transactions per block.
    pub const MAX_TX_PER_BLOCK: usize = 10_000;

    /// `min(height, MIN_TX_PER_BLOCK)`, per the block transaction-count
    /// invariant (a young chain cannot yet have accumulated enough pending
    /// transactions to hit the steady-state minimum).
    pub fn min_tx_for_height(height: u32) -> usize {
        (height as usize).min(MIN_TX_PER_BLOCK)
    }
}

/// A SHA-256 digest, used for block hashes and transaction ids alike.
pub type Hash32 = [u8; 32];

/// A RIPEMD-160 digest of a public key, used to lock transaction outputs.
pub type PubkeyHash = [u8; 20];

fn sha256(data: &[u8]) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// A transaction input, referencing a previously unspent output.
///
/// A coinbase input has an empty `prev_tx_id` and `vout_index == -1`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub prev_tx_id: Option<Hash32>,
    pub vout_index: i32,
    pub signature: Vec<u8>,
    pub pubkey: Vec<u8>,
}

impl TxInput {
    pub fn is_coinbase(&self) -> bool {
        self.prev_tx_id.is_none() && self.vout_index == -1
    }
}

/// A transaction output, assigning value to a pubkey hash.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: f64,
    pub pubkey_hash: PubkeyHash,
}

/// A signed value-transfer transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Hash32,
    pub vin: Vec<TxInput>,
    pub vout: Vec<TxOutput>,
    /// Creation time in nanoseconds UTC; used to order mempool iteration.
    pub time: i64,
}

impl Transaction {
    /// Build a transaction and stamp its `id` from the canonical encoding
    /// (with `id` held at all-zero during the hash).
    pub fn new(vin: Vec<TxInput>, vout: Vec<TxOutput>, time: i64) -> Self {
        let mut tx = Transaction {
            id: [0u8; 32],
            vin,
            vout,
            time,
        };
        tx.id = tx.compute_id();
        tx
    }

    /// Build the single coinbase transaction for a block: one input with an
    /// empty previous tx and `vout_index == -1`, one output of the fixed
    /// block reward to `pubkey_hash`.
    pub fn coinbase(pubkey_hash: PubkeyHash, data: Vec<u8>, time: i64) -> Self {
        let vin = vec![TxInput {
            prev_tx_id: None,
            vout_index: -1,
            signature: data,
            pubkey: Vec::new(),
        }];
        let vout = vec![TxOutput {
            value: constants::BLOCK_REWARD,
            pubkey_hash,
        }];
        Transaction::new(vin, vout, time)
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].is_coinbase() && self.vout.len() == 1
    }

    /// SHA-256 over the canonical encoding with `id` cleared to all-zero.
    pub fn compute_id(&self) -> Hash32 {
        let mut trimmed = self.clone();
        trimmed.id = [0u8; 32];
        let encoded = bincode::serialize(&trimmed).expect("transaction encodes");
        sha256(&encoded)
    }

    /// The message that must be signed/verified for input `input_index`:
    /// a copy of the transaction with every input's signature and pubkey
    /// cleared, except `input_index`'s pubkey field, which is set to the
    /// pubkey hash of the output it spends. Canonically encoded, then
    /// SHA-256'd.
    ///
    /// This fixes the original implementation's MD5 sign-data digest to
    /// SHA-256, per design note: the MD5 variant must never be reproduced.
    pub fn sign_hash(&self, input_index: usize, prev_pubkey_hash: &PubkeyHash) -> Hash32 {
        let mut trimmed = self.clone();
        for (i, input) in trimmed.vin.iter_mut().enumerate() {
            input.signature = Vec::new();
            if i == input_index {
                input.pubkey = prev_pubkey_hash.to_vec();
            } else {
                input.pubkey = Vec::new();
            }
        }
        let encoded = bincode::serialize(&trimmed).expect("transaction encodes");
        sha256(&encoded)
    }
}

/// A block in the chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub timestamp: i64,
    pub transactions: Vec<Transaction>,
    pub prev_block_hash: Option<Hash32>,
    pub hash: Hash32,
    pub nonce: i64,
    pub height: u32,
}

impl Block {
    /// Construct an unmined block (hash/nonce are zeroed; call proof-of-work
    /// from `demo-node-pow` to fill them in).
    pub fn new_unmined(
        timestamp: i64,
        transactions: Vec<Transaction>,
        prev_block_hash: Option<Hash32>,
        height: u32,
    ) -> Self {
        Block {
            timestamp,
            transactions,
            prev_block_hash,
            hash: [0u8; 32],
            nonce: 0,
            height,
        }
    }

    /// The genesis block: empty `prev_block_hash`, height 0, one coinbase
    /// transaction. Still needs mining before it can be inserted.
    pub fn genesis(coinbase: Transaction, timestamp: i64) -> Self {
        Block::new_unmined(timestamp, vec![coinbase], None, 0)
    }

    /// The fixed-order byte prefix that proof-of-work hashes together with
    /// a candidate nonce: `prev_block_hash || merkle_root || timestamp_be ||
    /// target_bits_be`.
    pub fn pow_prefix(&self, target_bits: u32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32 + 32 + 8 + 4);
        if let Some(prev) = &self.prev_block_hash {
            buf.extend_from_slice(prev);
        }
        buf.extend_from_slice(&self.merkle_root());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&target_bits.to_be_bytes());
        buf
    }

    /// Recompute the block hash from `pow_prefix` and the stored nonce.
    pub fn recompute_hash(&self, target_bits: u32) -> Hash32 {
        let mut buf = self.pow_prefix(target_bits);
        buf.extend_from_slice(&self.nonce.to_be_bytes());
        sha256(&buf)
    }

    /// Merkle root over transaction ids, pairing bottom-up and duplicating
    /// the last hash when the level has an odd count. Empty block ⇒
    /// all-zero root.
    pub fn merkle_root(&self) -> Hash32 {
        merkle_root(self.transactions.iter().map(|tx| tx.id))
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.iter().find(|tx| tx.is_coinbase())
    }
}

/// Compute a Merkle root over an iterator of leaf hashes.
pub fn merkle_root(leaves: impl Iterator<Item = Hash32>) -> Hash32 {
    let mut level: Vec<Hash32> = leaves.collect();
    if level.is_empty() {
        return [0u8; 32];
    }
    while level.len() > 1 {
        if level.len() % 2 != 0 {
            level.push(*level.last().unwrap());
        }
        let mut next = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks(2) {
            let mut buf = Vec::with_capacity(64);
            buf.extend_from_slice(&pair[0]);
            buf.extend_from_slice(&pair[1]);
            next.push(sha256(&buf));
        }
        level = next;
    }
    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pubkey_hash(byte: u8) -> PubkeyHash {
        [byte; 20]
    }

    #[test]
    fn transaction_id_is_deterministic() {
        let tx = Transaction::coinbase(pubkey_hash(1), b"data".to_vec(), 100);
        assert_eq!(tx.id, tx.compute_id());
        let tx2 = Transaction::coinbase(pubkey_hash(1), b"data".to_vec(), 100);
        assert_eq!(tx.id, tx2.id);
    }

    #[test]
    fn coinbase_predicate() {
        let tx = Transaction::coinbase(pubkey_hash(2), b"x".to_vec(), 1);
        assert!(tx.is_coinbase());
        assert!(tx.vin[0].is_coinbase());
    }

    #[test]
    fn merkle_root_single_tx_is_its_id() {
        let tx = Transaction::coinbase(pubkey_hash(3), b"x".to_vec(), 1);
        let root = merkle_root(std::iter::once(tx.id));
        assert_eq!(root, tx.id);
    }

    #[test]
    fn merkle_root_empty_is_zero() {
        assert_eq!(merkle_root(std::iter::empty()), [0u8; 32]);
    }

    #[test]
    fn merkle_root_odd_count_duplicates_last() {
        let a = Transaction::coinbase(pubkey_hash(1), b"a".to_vec(), 1);
        let b = Transaction::coinbase(pubkey_hash(2), b"b".to_vec(), 2);
        let c = Transaction::coinbase(pubkey_hash(3), b"c".to_vec(), 3);
        let root3 = merkle_root([a.id, b.id, c.id].into_iter());
        let root4 = merkle_root([a.id, b.id, c.id, c.id].into_iter());
        assert_eq!(root3, root4);
    }

    #[test]
    fn block_hash_round_trips_through_recompute() {
        let tx = Transaction::coinbase(pubkey_hash(1), b"genesis".to_vec(), 0);
        let mut block = Block::genesis(tx, 0);
        block.nonce = 42;
        block.hash = block.recompute_hash(8);
        assert_eq!(block.hash, block.recompute_hash(8));
    }

    #[test]
    fn sign_hash_changes_when_input_index_differs() {
        let out = TxOutput {
            value: 1.0,
            pubkey_hash: pubkey_hash(9),
        };
        let input_a = TxInput {
            prev_tx_id: Some([1u8; 32]),
            vout_index: 0,
            signature: vec![],
            pubkey: vec![],
        };
        let input_b = input_a.clone();
        let tx = Transaction::new(vec![input_a, input_b], vec![out], 5);
        let h0 = tx.sign_hash(0, &pubkey_hash(9));
        let h1 = tx.sign_hash(1, &pubkey_hash(9));
        assert_ne!(h0, h1);
    }
}
