//! Proof-of-work: nonce search and validation.
//!
//! Grounded on `labs/48-proof-of-work`'s `Block::mine`/`is_valid`, generalized
//! two ways: the difficulty target is expressed in leading zero *bits* (not
//! hex leading-zero characters) compared numerically against the full
//! 256-bit hash, and the search loop accepts a shared cancellation flag so a
//! miner can be interrupted as soon as a competing block arrives.

use demo_node_types::{Block, Hash32};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Statistics from a completed mining attempt.
#[derive(Debug, Clone)]
pub struct MiningReport {
    pub nonce: i64,
    pub hash: Hash32,
    pub attempts: u64,
    pub duration: Duration,
    pub hash_rate: f64,
}

/// The numeric threshold a hash must fall under to satisfy `target_bits`
/// leading zero bits, expressed as the big-endian bytes of
/// `2^(256 - target_bits)`'s single set bit (bit index `target_bits - 1`
/// counted from the most significant bit).
///
/// `target_bits == 0` means no restriction: every hash qualifies.
fn target_bytes(target_bits: u32) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    if target_bits == 0 {
        bytes = [0xff; 32];
        return bytes;
    }
    let bit_index = (target_bits - 1) as usize;
    let byte_index = bit_index / 8;
    let bit_in_byte = 7 - (bit_index % 8);
    if byte_index < 32 {
        bytes[byte_index] = 1 << bit_in_byte;
    }
    bytes
}

/// Whether `hash`, read as a big-endian 256-bit number, is strictly less
/// than the `target_bits` threshold.
pub fn meets_target(hash: &Hash32, target_bits: u32) -> bool {
    if target_bits == 0 {
        return true;
    }
    let target = target_bytes(target_bits);
    hash < &target
}

fn sha256(data: &[u8]) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Search for a nonce satisfying `target_bits`, mutating `block` in place on
/// success. Checks `cancel` every 4096 attempts; returns `None` if `cancel`
/// is set before a valid nonce is found.
pub fn mine(block: &mut Block, target_bits: u32, cancel: &AtomicBool) -> Option<MiningReport> {
    let prefix = block.pow_prefix(target_bits);
    let start = Instant::now();
    let mut attempts: u64 = 0;
    let mut nonce: i64 = 0;

    loop {
        if attempts % 4096 == 0 && cancel.load(Ordering::Relaxed) {
            return None;
        }
        let mut buf = prefix.clone();
        buf.extend_from_slice(&nonce.to_be_bytes());
        let hash = sha256(&buf);
        attempts += 1;

        if meets_target(&hash, target_bits) {
            block.nonce = nonce;
            block.hash = hash;
            let duration = start.elapsed();
            let hash_rate = if duration.as_secs_f64() > 0.0 {
                attempts as f64 / duration.as_secs_f64()
            } else {
                0.0
            };
            tracing::debug!(nonce, attempts, ?duration, hash_rate, "proof of work found");
            return Some(MiningReport {
                nonce,
                hash,
                attempts,
                duration,
                hash_rate,
            });
        }

        nonce = nonce.wrapping_add(1);
    }
}

/// Validate a mined block: its stored hash must both meet `target_bits` and
/// match the hash recomputed from its contents and nonce.
pub fn is_valid(block: &Block, target_bits: u32) -> bool {
    meets_target(&block.hash, target_bits) && block.hash == block.recompute_hash(target_bits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use demo_node_types::Transaction;

    fn sample_block() -> Block {
        let tx = Transaction::coinbase([7u8; 20], b"genesis".to_vec(), 0);
        Block::genesis(tx, 1_000)
    }

    #[test]
    fn mined_block_passes_validation() {
        let mut block = sample_block();
        let cancel = AtomicBool::new(false);
        let report = mine(&mut block, 8, &cancel).expect("mining succeeds");
        assert_eq!(block.hash, report.hash);
        assert!(is_valid(&block, 8));
    }

    #[test]
    fn tampered_hash_fails_validation() {
        let mut block = sample_block();
        let cancel = AtomicBool::new(false);
        mine(&mut block, 8, &cancel).unwrap();
        block.hash[0] ^= 0xff;
        assert!(!is_valid(&block, 8));
    }

    #[test]
    fn tampered_nonce_fails_validation() {
        let mut block = sample_block();
        let cancel = AtomicBool::new(false);
        mine(&mut block, 8, &cancel).unwrap();
        block.nonce = block.nonce.wrapping_add(1);
        assert!(!is_valid(&block, 8));
    }

    #[test]
    fn zero_target_bits_always_meets() {
        assert!(meets_target(&[0xffu8; 32], 0));
    }

    #[test]
    fn cancellation_stops_the_search() {
        let mut block = sample_block();
        let cancel = AtomicBool::new(true);
        assert!(mine(&mut block, 32, &cancel).is_none());
    }

    #[test]
    fn higher_target_bits_is_strictly_harder() {
        let low_target = target_bytes(8);
        let high_target = target_bytes(16);
        assert!(high_target.as_slice() < low_target.as_slice());
    }
}
