//! Chain manager, transaction index, and UTXO index.
//!
//! Grounded on `labs/52-blockchain-node`'s `Blockchain`/`UTXOSet` and
//! `labs/14-utxo-model`'s `UtxoSet::apply_transaction`, generalized from a
//! single linear `Vec<Block>` to a branch-aware store: every block is kept
//! (never just the main-branch subset), a `ChainEdge` record tracks forward
//! links, and the UTXO/transaction indices are derived caches rebuilt from
//! those blocks rather than held as the sole source of truth.

mod chain;
mod txindex;
mod utxo;

pub use chain::{AddState, ChainError, ChainIter, ChainManager, ReorgReport};
pub use txindex::TxSpentEntry;
pub use utxo::UtxoEntry;
